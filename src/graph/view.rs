//! Stored graph view
//!
//! A view is an immutable snapshot of one committed state: the three headers,
//! the record arrays as mapped regions, and id/adjacency indexes built by a
//! single scan. Payloads are read from the data file on demand.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::core::data::{read_entry, Payload};
use crate::core::format::{open_data_file, open_edge_file, open_node_file, RecordSection};
use crate::core::metadata::{read_metadata, GraphMetadata};
use crate::core::storage::MappedStorage;
use crate::error::{GraphError, Result};
use crate::graph::hooks::{DataValue, GraphHooks};
use crate::types::{DataHeader, DataType, EdgeRecord, GraphKind, NodeId, NodeRecord, RecordHeader};

/// Read-only view over one committed state of the three files
pub struct StoredGraph {
  pub(crate) nodes: RecordSection,
  pub(crate) edges: RecordSection,
  pub(crate) data_header: DataHeader,
  pub(crate) data: Arc<dyn MappedStorage>,
  pub(crate) node_index: HashMap<NodeId, usize>,
  pub(crate) out_edges: HashMap<NodeId, Vec<usize>>,
  pub(crate) in_edges: HashMap<NodeId, Vec<usize>>,
  pub(crate) metadata: Option<GraphMetadata>,
  pub(crate) hooks: Arc<GraphHooks>,
}

impl StoredGraph {
  /// Open the headers, map the record arrays and build the indexes
  pub fn load(
    node_storage: &dyn MappedStorage,
    edge_storage: &dyn MappedStorage,
    data: Arc<dyn MappedStorage>,
    hooks: Arc<GraphHooks>,
  ) -> Result<Self> {
    let nodes = open_node_file(node_storage)?;
    let edges = open_edge_file(edge_storage)?;
    let data_header = open_data_file(data.as_ref())?;

    let mut node_index = HashMap::with_capacity(nodes.len);
    for index in 0..nodes.len {
      let record = nodes.node(index)?;
      if node_index.insert(record.id, index).is_some() {
        return Err(GraphError::InconsistentState(format!(
          "node id {} appears more than once",
          record.id
        )));
      }
    }

    let mut out_edges: HashMap<NodeId, Vec<usize>> = HashMap::new();
    let mut in_edges: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for index in 0..edges.len {
      let record = edges.edge(index)?;
      out_edges.entry(record.from).or_default().push(index);
      in_edges.entry(record.to).or_default().push(index);
    }

    if nodes.header.data_file_offset != edges.header.data_file_offset {
      return Err(GraphError::InconsistentState(format!(
        "node header points at metadata {} but edge header at {}",
        nodes.header.data_file_offset, edges.header.data_file_offset
      )));
    }
    let metadata = read_metadata(data.as_ref(), nodes.header.data_file_offset)?;

    trace!(
      nodes = nodes.len,
      edges = edges.len,
      entries = data_header.entry_count,
      "loaded stored graph"
    );

    Ok(Self {
      nodes,
      edges,
      data_header,
      data,
      node_index,
      out_edges,
      in_edges,
      metadata,
      hooks,
    })
  }

  /// View after a commit: remap the sections and extend the indexes with the
  /// appended records instead of rescanning
  pub(crate) fn patched(
    &self,
    node_storage: &dyn MappedStorage,
    edge_storage: &dyn MappedStorage,
    new_nodes: &[(NodeId, usize)],
    new_edges: &[(usize, NodeId, NodeId)],
    metadata: Option<GraphMetadata>,
  ) -> Result<Self> {
    let nodes = open_node_file(node_storage)?;
    let edges = open_edge_file(edge_storage)?;
    let data_header = open_data_file(self.data.as_ref())?;

    let mut node_index = self.node_index.clone();
    for (id, index) in new_nodes {
      node_index.insert(*id, *index);
    }
    let mut out_edges = self.out_edges.clone();
    let mut in_edges = self.in_edges.clone();
    for (index, from, to) in new_edges {
      out_edges.entry(*from).or_default().push(*index);
      in_edges.entry(*to).or_default().push(*index);
    }

    Ok(Self {
      nodes,
      edges,
      data_header,
      data: self.data.clone(),
      node_index,
      out_edges,
      in_edges,
      metadata: metadata.or_else(|| self.metadata.clone()),
      hooks: self.hooks.clone(),
    })
  }

  // ==========================================================================
  // Headers and metadata
  // ==========================================================================

  pub fn node_header(&self) -> &RecordHeader {
    &self.nodes.header
  }

  pub fn edge_header(&self) -> &RecordHeader {
    &self.edges.header
  }

  pub fn data_header(&self) -> &DataHeader {
    &self.data_header
  }

  pub fn metadata(&self) -> Option<&GraphMetadata> {
    self.metadata.as_ref()
  }

  /// Kind from the metadata entry, else from the header kind byte
  pub fn kind(&self) -> GraphKind {
    self
      .metadata
      .as_ref()
      .map(GraphMetadata::graph_kind)
      .unwrap_or_else(|| self.nodes.header.kind())
  }

  /// Number of live nodes
  pub fn node_count(&self) -> u64 {
    self.nodes.header.count
  }

  /// Number of live edges
  pub fn edge_count(&self) -> u64 {
    self.edges.header.count
  }

  pub fn max_node_id(&self) -> NodeId {
    self.nodes.header.max_id
  }

  /// Physical node records, soft-deleted ones included
  pub fn node_records_len(&self) -> usize {
    self.nodes.len
  }

  /// Physical edge records, soft-deleted ones included
  pub fn edge_records_len(&self) -> usize {
    self.edges.len
  }

  // ==========================================================================
  // Records
  // ==========================================================================

  /// Raw record for `id`, soft-deleted or not
  pub fn node_record(&self, id: NodeId) -> Option<NodeRecord> {
    let index = *self.node_index.get(&id)?;
    self.nodes.node(index).ok()
  }

  /// Raw edge record at `index`, soft-deleted or not
  pub fn edge_record(&self, index: usize) -> Result<EdgeRecord> {
    if index >= self.edges.len {
      return Err(GraphError::EdgeIndexNotFound(index));
    }
    self.edges.edge(index)
  }

  pub(crate) fn node_index_of(&self, id: NodeId) -> Option<usize> {
    self.node_index.get(&id).copied()
  }

  pub fn contains_node(&self, id: NodeId) -> bool {
    self.node_record(id).is_some_and(|record| record.is_live())
  }

  // ==========================================================================
  // Nodes
  // ==========================================================================

  /// Live node with `id`
  pub fn node_by_id(&self, id: NodeId) -> Option<NodeHandle<'_>> {
    let index = *self.node_index.get(&id)?;
    let record = self.nodes.node(index).ok()?;
    record.is_live().then_some(NodeHandle {
      graph: self,
      id,
      index,
    })
  }

  /// Live nodes in record order
  pub fn nodes(&self) -> impl Iterator<Item = NodeHandle<'_>> + '_ {
    (0..self.nodes.len).filter_map(move |index| {
      let record = self.nodes.node(index).ok()?;
      record.is_live().then_some(NodeHandle {
        graph: self,
        id: record.id,
        index,
      })
    })
  }

  fn require_node(&self, id: NodeId) -> Result<NodeHandle<'_>> {
    self.node_by_id(id).ok_or(GraphError::NodeNotFound(id))
  }

  /// Payload of node `id` without registry decoding
  pub fn node_payload(&self, id: NodeId) -> Result<Option<Payload>> {
    let handle = self.require_node(id)?;
    let record = self.nodes.node(handle.index)?;
    self.read_payload(record.data_offset)
  }

  /// Payload of node `id`, protobuf messages decoded through the registry
  pub fn node_data(&self, id: NodeId) -> Result<Option<DataValue>> {
    self.resolve(self.node_payload(id)?)
  }

  // ==========================================================================
  // Edges
  // ==========================================================================

  /// Live edge at record `index`
  pub fn edge(&self, index: usize) -> Option<EdgeHandle<'_>> {
    let record = self.edge_record(index).ok()?;
    (record.is_live() && self.contains_node(record.to)).then_some(EdgeHandle {
      graph: self,
      index,
      record,
    })
  }

  /// Live edges in record order
  pub fn edges(&self) -> impl Iterator<Item = EdgeHandle<'_>> + '_ {
    (0..self.edges.len).filter_map(move |index| self.edge(index))
  }

  /// Live outgoing edges of `id` in record order
  pub fn edges_from(&self, id: NodeId) -> impl Iterator<Item = EdgeHandle<'_>> + '_ {
    self
      .out_edges
      .get(&id)
      .map(Vec::as_slice)
      .unwrap_or_default()
      .iter()
      .filter_map(move |&index| self.edge(index))
  }

  /// Targets of the live outgoing edges of `id`, one per edge
  pub fn neighbors(&self, id: NodeId) -> Neighbors<'_> {
    let edges = self
      .out_edges
      .get(&id)
      .map(Vec::as_slice)
      .unwrap_or_default();
    Neighbors {
      graph: self,
      edges: edges.iter(),
    }
  }

  /// Payload of the edge at record `index` without registry decoding
  pub fn edge_payload(&self, index: usize) -> Result<Option<Payload>> {
    let record = self.edge_record(index)?;
    if !record.is_live() {
      return Err(GraphError::EdgeIndexNotFound(index));
    }
    self.read_payload(record.data_offset as u64)
  }

  /// Payload of the edge at record `index`
  pub fn edge_data(&self, index: usize) -> Result<Option<DataValue>> {
    self.resolve(self.edge_payload(index)?)
  }

  /// Live edge records from `from` to `to`
  pub(crate) fn edge_indexes_between(&self, from: NodeId, to: NodeId) -> Vec<usize> {
    self
      .out_edges
      .get(&from)
      .map(Vec::as_slice)
      .unwrap_or_default()
      .iter()
      .copied()
      .filter(|&index| {
        self
          .edges
          .edge(index)
          .is_ok_and(|record| record.is_live() && record.to == to)
      })
      .collect()
  }

  // ==========================================================================
  // Callbacks
  // ==========================================================================

  /// Cost of moving `from -> to`
  ///
  /// Uses the cost callback when one is set; otherwise reads the first live
  /// edge's payload (a numeric value, or a registered message's cost field);
  /// otherwise zero.
  pub fn cost(&self, from: NodeId, to: NodeId) -> Result<f32> {
    let a = self.require_node(from)?;
    let b = self.require_node(to)?;
    if let Some(cost) = &self.hooks.cost {
      return Ok(cost(&a, &b));
    }
    let Some(index) = self.edge_indexes_between(from, to).first().copied() else {
      return Ok(0.0);
    };
    let Some(payload) = self.edge_payload(index)? else {
      return Ok(0.0);
    };
    Ok(self.payload_cost(&payload)?.unwrap_or(0.0))
  }

  fn payload_cost(&self, payload: &Payload) -> Result<Option<f32>> {
    if payload.kind == DataType::Protobuf {
      if !self.hooks.types.contains(&payload.type_name) {
        return Ok(None);
      }
      let decoded = self.hooks.types.decode(payload)?;
      return Ok(self.hooks.types.cost_of(&decoded));
    }
    Ok(payload.decode_value().ok().and_then(|value| value.as_f32()))
  }

  /// Equality through the callback, else by id
  pub fn equal(&self, a: NodeId, b: NodeId) -> Result<bool> {
    let a = self.require_node(a)?;
    let b = self.require_node(b)?;
    Ok(match &self.hooks.equal {
      Some(equal) => equal(&a, &b),
      None => a.id == b.id,
    })
  }

  /// Ordering through the callback, else by id
  pub fn compare(&self, a: NodeId, b: NodeId) -> Result<Ordering> {
    let a = self.require_node(a)?;
    let b = self.require_node(b)?;
    Ok(match &self.hooks.compare {
      Some(compare) => compare(&a, &b),
      None => a.id.cmp(&b.id),
    })
  }

  // ==========================================================================
  // Payload access
  // ==========================================================================

  pub(crate) fn read_payload(&self, offset: u64) -> Result<Option<Payload>> {
    if offset == 0 {
      return Ok(None);
    }
    read_entry(self.data.as_ref(), offset).map(Some)
  }

  fn resolve(&self, payload: Option<Payload>) -> Result<Option<DataValue>> {
    payload
      .map(|payload| self.hooks.types.resolve(payload))
      .transpose()
  }
}

impl std::fmt::Debug for StoredGraph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StoredGraph")
      .field("kind", &self.kind())
      .field("nodes", &self.node_count())
      .field("edges", &self.edge_count())
      .field("max_node_id", &self.max_node_id())
      .finish()
  }
}

// ============================================================================
// Handles
// ============================================================================

/// A live node, resolved by id
#[derive(Clone, Copy)]
pub struct NodeHandle<'g> {
  graph: &'g StoredGraph,
  id: NodeId,
  index: usize,
}

impl<'g> NodeHandle<'g> {
  pub fn id(&self) -> NodeId {
    self.id
  }

  pub fn graph(&self) -> &'g StoredGraph {
    self.graph
  }

  pub fn record(&self) -> Result<NodeRecord> {
    self.graph.nodes.node(self.index)
  }

  pub fn payload(&self) -> Result<Option<Payload>> {
    self.graph.read_payload(self.record()?.data_offset)
  }

  pub fn data(&self) -> Result<Option<DataValue>> {
    self.graph.resolve(self.payload()?)
  }

  pub fn neighbors(&self) -> Neighbors<'g> {
    self.graph.neighbors(self.id)
  }

  pub fn edges(&self) -> impl Iterator<Item = EdgeHandle<'g>> + 'g {
    self.graph.edges_from(self.id)
  }

  pub fn cost_to(&self, other: &NodeHandle<'_>) -> Result<f32> {
    self.graph.cost(self.id, other.id)
  }

  pub fn equal_to(&self, other: &NodeHandle<'_>) -> Result<bool> {
    self.graph.equal(self.id, other.id)
  }

  pub fn compare_to(&self, other: &NodeHandle<'_>) -> Result<Ordering> {
    self.graph.compare(self.id, other.id)
  }
}

impl std::fmt::Debug for NodeHandle<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NodeHandle").field("id", &self.id).finish()
  }
}

/// A live edge, addressed by its record index
#[derive(Clone)]
pub struct EdgeHandle<'g> {
  graph: &'g StoredGraph,
  index: usize,
  record: EdgeRecord,
}

impl<'g> EdgeHandle<'g> {
  /// 0-based position in the edge record array
  pub fn index(&self) -> usize {
    self.index
  }

  /// 1-based edge id
  pub fn id(&self) -> u64 {
    self.index as u64 + 1
  }

  pub fn from(&self) -> NodeId {
    self.record.from
  }

  pub fn to(&self) -> NodeId {
    self.record.to
  }

  pub fn target(&self) -> Option<NodeHandle<'g>> {
    self.graph.node_by_id(self.record.to)
  }

  pub fn payload(&self) -> Result<Option<Payload>> {
    self.graph.read_payload(self.record.data_offset as u64)
  }

  pub fn data(&self) -> Result<Option<DataValue>> {
    self.graph.resolve(self.payload()?)
  }
}

impl std::fmt::Debug for EdgeHandle<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EdgeHandle")
      .field("index", &self.index)
      .field("from", &self.record.from)
      .field("to", &self.record.to)
      .finish()
  }
}

/// Lazy, single-pass iterator over a node's neighbors
pub struct Neighbors<'g> {
  graph: &'g StoredGraph,
  edges: std::slice::Iter<'g, usize>,
}

impl<'g> Iterator for Neighbors<'g> {
  type Item = NodeHandle<'g>;

  fn next(&mut self) -> Option<Self::Item> {
    for &index in self.edges.by_ref() {
      let Ok(record) = self.graph.edges.edge(index) else {
        continue;
      };
      if !record.is_live() {
        continue;
      }
      if let Some(node) = self.graph.node_by_id(record.to) {
        return Some(node);
      }
    }
    None
  }
}
