//! Whole-graph writer
//!
//! Builds complete node, edge and data images in memory and swaps them in.
//! Used by marshalling, store creation and defragmentation.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::constants::{HEADER_SIZE, MAX_EDGE_DATA_OFFSET};
use crate::core::codec::{encode_data_header, encode_edge_record, encode_header, encode_node_record};
use crate::core::data::{encode_entry, Payload};
use crate::core::metadata::{DecisionMetadata, EdgeOp, ExpressionMetadata, GraphMetadata};
use crate::core::storage::{replace_contents, MappedStorage};
use crate::error::{GraphError, Result};
use crate::types::{
  DataHeader, EdgeRecord, GraphKind, NodeId, NodeRecord, RecordFile, RecordHeader,
};

// ============================================================================
// Builder
// ============================================================================

/// In-memory graph to be marshalled
#[derive(Debug, Clone)]
pub struct GraphBuilder {
  kind: GraphKind,
  nodes: Vec<(NodeId, Option<Payload>)>,
  ids: HashSet<NodeId>,
  edges: Vec<(NodeId, NodeId, Option<Payload>)>,
  root_id: Option<NodeId>,
  tree_type: Option<String>,
  decision: DecisionMetadata,
  expression_ops: BTreeMap<NodeId, String>,
  next_id: NodeId,
}

impl GraphBuilder {
  pub fn new(kind: GraphKind) -> Self {
    Self {
      kind,
      nodes: Vec::new(),
      ids: HashSet::new(),
      edges: Vec::new(),
      root_id: None,
      tree_type: None,
      decision: DecisionMetadata::default(),
      expression_ops: BTreeMap::new(),
      next_id: 1,
    }
  }

  pub fn kind(&self) -> GraphKind {
    self.kind
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn edge_count(&self) -> usize {
    self.edges.len()
  }

  /// Largest node id, 0 for an empty graph
  pub fn max_node_id(&self) -> NodeId {
    self.nodes.iter().map(|(id, _)| *id).max().unwrap_or(0)
  }

  /// Add a node with the next free id
  pub fn add_node(&mut self, data: Option<Payload>) -> NodeId {
    let id = self.next_id;
    self.next_id += 1;
    self.ids.insert(id);
    self.nodes.push((id, data));
    id
  }

  /// Add a node with a caller-chosen positive id
  pub fn add_node_with_id(&mut self, id: NodeId, data: Option<Payload>) -> Result<()> {
    if id <= 0 {
      return Err(GraphError::InvalidArgument(format!(
        "node ids must be positive, got {id}"
      )));
    }
    if !self.ids.insert(id) {
      return Err(GraphError::InvalidArgument(format!("duplicate node id {id}")));
    }
    self.next_id = self.next_id.max(id + 1);
    self.nodes.push((id, data));
    Ok(())
  }

  pub fn add_edge(&mut self, from: NodeId, to: NodeId, data: Option<Payload>) -> Result<()> {
    self.require(from)?;
    self.require(to)?;
    self.edges.push((from, to, data));
    Ok(())
  }

  pub fn set_root(&mut self, id: NodeId) -> Result<()> {
    self.require(id)?;
    self.root_id = Some(id);
    Ok(())
  }

  pub fn set_tree_type(&mut self, tree_type: impl Into<String>) {
    self.tree_type = Some(tree_type.into());
  }

  /// Name the operation evaluated at a decision node
  pub fn set_decision_node_op(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
    self.require(id)?;
    self.decision.node_ops.insert(id, name.into());
    Ok(())
  }

  /// Name the predicate guarding the edge `parent -> child`
  pub fn set_decision_edge_op(
    &mut self,
    parent: NodeId,
    child: NodeId,
    name: impl Into<String>,
  ) -> Result<()> {
    if !self.edges.iter().any(|(f, t, _)| *f == parent && *t == child) {
      return Err(GraphError::EdgeNotFound {
        from: parent,
        to: child,
      });
    }
    let name = name.into();
    match self
      .decision
      .edge_ops
      .iter_mut()
      .find(|op| op.parent_id == parent && op.child_id == child)
    {
      Some(op) => op.op_name = name,
      None => self.decision.edge_ops.push(EdgeOp {
        parent_id: parent,
        child_id: child,
        op_name: name,
      }),
    }
    Ok(())
  }

  /// Name the operation computing an expression node
  pub fn set_expression_op(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
    self.require(id)?;
    self.expression_ops.insert(id, name.into());
    Ok(())
  }

  /// Metadata entry describing this graph
  pub fn metadata(&self) -> GraphMetadata {
    let mut metadata = GraphMetadata::for_kind(self.kind);
    metadata.root_id = self.root_id;
    metadata.tree_type = self.tree_type.clone();
    if self.kind == GraphKind::DecisionTree
      || !self.decision.node_ops.is_empty()
      || !self.decision.edge_ops.is_empty()
    {
      metadata.decision = Some(self.decision.clone());
    }
    if self.kind == GraphKind::ExpressionGraph || !self.expression_ops.is_empty() {
      let root_id = self.root_id.or_else(|| self.source_node()).unwrap_or(0);
      metadata.expression = Some(ExpressionMetadata {
        node_ops: self.expression_ops.clone(),
        root_id,
      });
    }
    metadata
  }

  /// First node, in insertion order, with no incoming edge
  fn source_node(&self) -> Option<NodeId> {
    let targets: HashSet<NodeId> = self.edges.iter().map(|(_, to, _)| *to).collect();
    self
      .nodes
      .iter()
      .map(|(id, _)| *id)
      .find(|id| !targets.contains(id))
  }

  fn require(&self, id: NodeId) -> Result<()> {
    if self.ids.contains(&id) {
      Ok(())
    } else {
      Err(GraphError::NodeNotFound(id))
    }
  }
}

// ============================================================================
// Images
// ============================================================================

/// Data file image under construction
pub(crate) struct DataImage {
  bytes: Vec<u8>,
  entries: u64,
}

impl DataImage {
  pub(crate) fn new() -> Self {
    Self {
      bytes: vec![0u8; HEADER_SIZE],
      entries: 0,
    }
  }

  /// Append an encoded entry; returns its offset
  pub(crate) fn push_entry(&mut self, entry: &[u8]) -> u64 {
    let offset = self.bytes.len() as u64;
    self.bytes.extend_from_slice(entry);
    self.entries += 1;
    offset
  }

  pub(crate) fn push_payload(&mut self, payload: &Payload) -> Result<u64> {
    Ok(self.push_entry(&encode_entry(payload)?))
  }

  pub(crate) fn finish(mut self) -> Vec<u8> {
    let header = DataHeader {
      entry_count: self.entries,
      ..DataHeader::default()
    };
    self.bytes[..HEADER_SIZE].copy_from_slice(&encode_data_header(&header));
    self.bytes
  }
}

pub(crate) fn edge_offset(offset: u64) -> Result<u32> {
  if offset > MAX_EDGE_DATA_OFFSET {
    return Err(GraphError::InvalidArgument(format!(
      "edge payload offset {offset} does not fit the 32-bit edge offset field"
    )));
  }
  Ok(offset as u32)
}

pub(crate) fn node_image(header: &RecordHeader, records: &[NodeRecord]) -> Vec<u8> {
  let mut bytes = encode_header(RecordFile::Nodes, header).to_vec();
  for record in records {
    bytes.extend_from_slice(&encode_node_record(record));
  }
  bytes
}

pub(crate) fn edge_image(header: &RecordHeader, records: &[EdgeRecord]) -> Vec<u8> {
  let mut bytes = encode_header(RecordFile::Edges, header).to_vec();
  for record in records {
    bytes.extend_from_slice(&encode_edge_record(record));
  }
  bytes
}

/// Stage all three replacements, then swap them in
///
/// If any staging fails every staged copy is discarded and the live files are
/// left untouched. If a swap fails, the files already swapped get their
/// previous contents back so the three never mix layouts.
pub(crate) fn install_images(
  node: &dyn MappedStorage,
  edge: &dyn MappedStorage,
  data: &dyn MappedStorage,
  images: [&[u8]; 3],
) -> Result<()> {
  let storages = [node, edge, data];
  let previous = storages
    .iter()
    .map(|storage| storage.map(0, 0))
    .collect::<Result<Vec<_>>>()?;
  for (i, (storage, image)) in storages.iter().zip(images).enumerate() {
    if let Err(err) = storage.stage_replacement(image) {
      for staged in &storages[..=i] {
        let _ = staged.discard_replacement();
      }
      return Err(err);
    }
  }
  for (i, storage) in storages.iter().enumerate() {
    if let Err(err) = storage.commit_replacement() {
      for pending in &storages[i..] {
        let _ = pending.discard_replacement();
      }
      for (swapped, contents) in storages[..i].iter().zip(&previous) {
        if let Err(restore) = replace_contents(*swapped, contents.bytes()) {
          warn!(error = %restore, "failed to restore contents after a partial swap");
        }
      }
      return Err(err);
    }
  }
  Ok(())
}

/// Write `builder` as a complete graph over the three storages
pub fn write_graph(
  node: &dyn MappedStorage,
  edge: &dyn MappedStorage,
  data: &dyn MappedStorage,
  builder: &GraphBuilder,
) -> Result<()> {
  let mut image = DataImage::new();

  let mut node_records = Vec::with_capacity(builder.nodes.len());
  for (id, payload) in &builder.nodes {
    let offset = match payload {
      Some(payload) => image.push_payload(payload)?,
      None => 0,
    };
    node_records.push(NodeRecord::new(*id, offset));
  }

  let mut edge_records = Vec::with_capacity(builder.edges.len());
  for (from, to, payload) in &builder.edges {
    let offset = match payload {
      Some(payload) => edge_offset(image.push_payload(payload)?)?,
      None => 0,
    };
    edge_records.push(EdgeRecord::new(*from, *to, offset));
  }

  let metadata = builder.metadata();
  let metadata_offset = image.push_payload(&metadata.to_payload())?;

  let mut node_header = RecordHeader::new(builder.kind);
  node_header.max_id = builder.max_node_id();
  node_header.count = node_records.len() as u64;
  node_header.data_file_offset = metadata_offset;

  let mut edge_header = RecordHeader::new(builder.kind);
  edge_header.max_id = edge_records.len() as i64;
  edge_header.count = edge_records.len() as u64;
  edge_header.data_file_offset = metadata_offset;

  let nodes = node_image(&node_header, &node_records);
  let edges = edge_image(&edge_header, &edge_records);
  let data_bytes = image.finish();
  install_images(node, edge, data, [&nodes, &edges, &data_bytes])?;

  debug!(
    kind = builder.kind.name(),
    nodes = node_records.len(),
    edges = edge_records.len(),
    data_bytes = data_bytes.len(),
    "wrote graph"
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::format::{open_data_file, open_edge_file, open_node_file};
  use crate::core::metadata::read_metadata;
  use crate::core::storage::{MemoryStorage, Region};
  use crate::core::value::Value;
  use std::io;

  /// Memory storage whose swaps always fail
  struct FailingSwap(MemoryStorage);

  impl MappedStorage for FailingSwap {
    fn map(&self, offset: u64, length: u64) -> Result<Region> {
      self.0.map(offset, length)
    }

    fn size(&self) -> Result<u64> {
      self.0.size()
    }

    fn close(&self) -> Result<()> {
      self.0.close()
    }

    fn is_read_only(&self) -> bool {
      false
    }

    fn stage_replacement(&self, contents: &[u8]) -> Result<()> {
      self.0.stage_replacement(contents)
    }

    fn commit_replacement(&self) -> Result<()> {
      Err(GraphError::storage(
        "rename",
        io::Error::new(io::ErrorKind::Other, "disk full"),
      ))
    }

    fn discard_replacement(&self) -> Result<()> {
      self.0.discard_replacement()
    }
  }

  #[test]
  fn test_builder_mints_ids_and_validates_edges() {
    let mut builder = GraphBuilder::new(GraphKind::Generic);
    assert_eq!(builder.add_node(None), 1);
    builder.add_node_with_id(10, None).unwrap();
    assert_eq!(builder.add_node(None), 11);
    assert!(builder.add_node_with_id(0, None).is_err());
    assert!(builder.add_node_with_id(10, None).is_err());
    assert!(matches!(
      builder.add_edge(1, 99, None),
      Err(GraphError::NodeNotFound(99))
    ));
    assert_eq!(builder.max_node_id(), 11);
  }

  #[test]
  fn test_expression_root_defaults_to_source_node() {
    let mut builder = GraphBuilder::new(GraphKind::ExpressionGraph);
    let leaf = builder.add_node(None);
    let sum = builder.add_node(None);
    builder.add_edge(sum, leaf, None).unwrap();
    builder.set_expression_op(sum, "add").unwrap();
    let metadata = builder.metadata();
    assert_eq!(metadata.expression.unwrap().root_id, sum);
  }

  #[test]
  fn test_decision_edge_op_requires_edge() {
    let mut builder = GraphBuilder::new(GraphKind::DecisionTree);
    let a = builder.add_node(None);
    let b = builder.add_node(None);
    assert!(builder.set_decision_edge_op(a, b, "always").is_err());
    builder.add_edge(a, b, None).unwrap();
    builder.set_decision_edge_op(a, b, "always").unwrap();
    builder.set_decision_edge_op(a, b, "never").unwrap();
    let decision = builder.metadata().decision.unwrap();
    assert_eq!(decision.edge_ops.len(), 1);
    assert_eq!(decision.edge_ops[0].op_name, "never");
  }

  #[test]
  fn test_write_graph_lays_out_files() {
    let mut builder = GraphBuilder::new(GraphKind::Tree);
    let root = builder.add_node(Some(Payload::value(Value::I32(7))));
    let child = builder.add_node(None);
    builder.add_edge(root, child, None).unwrap();
    builder.set_root(root).unwrap();

    let (node, edge, data) = (MemoryStorage::new(), MemoryStorage::new(), MemoryStorage::new());
    write_graph(&node, &edge, &data, &builder).unwrap();

    assert_eq!(node.size().unwrap(), 64 + 2 * 32);
    assert_eq!(edge.size().unwrap(), 64 + 32);
    let nodes = open_node_file(&node).unwrap();
    let edges = open_edge_file(&edge).unwrap();
    assert_eq!(nodes.header.max_id, 2);
    assert_eq!(edges.header.max_id, 1);
    assert_eq!(nodes.header.kind(), GraphKind::Tree);
    assert_eq!(nodes.node(0).unwrap().data_offset, 64);
    assert_eq!(open_data_file(&data).unwrap().entry_count, 2);

    let metadata = read_metadata(&data, nodes.header.data_file_offset)
      .unwrap()
      .unwrap();
    assert_eq!(metadata.root_id, Some(root));
  }

  #[test]
  fn test_edge_offset_limit() {
    assert_eq!(edge_offset(u32::MAX as u64).unwrap(), u32::MAX);
    assert!(matches!(
      edge_offset(u32::MAX as u64 + 1),
      Err(GraphError::InvalidArgument(_))
    ));
  }

  #[test]
  fn test_failed_swap_restores_earlier_files() {
    let node = MemoryStorage::from_bytes(b"old nodes".to_vec());
    let edge = FailingSwap(MemoryStorage::from_bytes(b"old edges".to_vec()));
    let data = MemoryStorage::from_bytes(b"old data".to_vec());
    let images: [&[u8]; 3] = [b"new nodes", b"new edges", b"new data"];
    let result = install_images(&node, &edge, &data, images);
    assert!(matches!(result, Err(GraphError::Storage { op: "rename", .. })));
    assert_eq!(node.to_vec(), b"old nodes");
    assert_eq!(edge.0.to_vec(), b"old edges");
    assert_eq!(data.to_vec(), b"old data");

    // Nothing stays staged behind the failure
    assert!(data.commit_replacement().is_err());
  }
}
