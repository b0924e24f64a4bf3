//! Graph metadata record
//!
//! Stored as a protobuf data entry named `__graph_metadata__`; both record
//! file headers point at it through `DataFileOffset`.

use std::collections::BTreeMap;

use prost::Message;

use crate::constants::METADATA_TYPE_NAME;
use crate::core::data::{read_entry, Payload};
use crate::core::storage::MappedStorage;
use crate::error::{FormatError, Result};
use crate::types::{DataType, GraphKind, NodeId};

/// Which op runs when a decision walk crosses `parent_id -> child_id`
#[derive(Clone, PartialEq, Message)]
pub struct EdgeOp {
  #[prost(int64, tag = "1")]
  pub parent_id: i64,
  #[prost(int64, tag = "2")]
  pub child_id: i64,
  #[prost(string, tag = "3")]
  pub op_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct DecisionMetadata {
  #[prost(btree_map = "int64, string", tag = "1")]
  pub node_ops: BTreeMap<i64, String>,
  #[prost(message, repeated, tag = "2")]
  pub edge_ops: Vec<EdgeOp>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExpressionMetadata {
  #[prost(btree_map = "int64, string", tag = "1")]
  pub node_ops: BTreeMap<i64, String>,
  #[prost(int64, tag = "2")]
  pub root_id: i64,
}

/// Kind, roots and op-name wiring of a stored graph
#[derive(Clone, PartialEq, Message)]
pub struct GraphMetadata {
  /// Wire value of [`GraphKind`]
  #[prost(int32, tag = "1")]
  pub kind: i32,
  #[prost(int64, optional, tag = "2")]
  pub root_id: Option<i64>,
  #[prost(string, optional, tag = "3")]
  pub tree_type: Option<String>,
  #[prost(message, optional, tag = "4")]
  pub decision: Option<DecisionMetadata>,
  #[prost(message, optional, tag = "5")]
  pub expression: Option<ExpressionMetadata>,
}

impl GraphMetadata {
  pub fn for_kind(kind: GraphKind) -> Self {
    Self {
      kind: kind.as_byte() as i32,
      ..Default::default()
    }
  }

  pub fn graph_kind(&self) -> GraphKind {
    u8::try_from(self.kind)
      .map(GraphKind::from_byte)
      .unwrap_or_default()
  }

  /// Root of the graph: the top-level root id, else the expression root
  pub fn root(&self) -> Option<NodeId> {
    self
      .root_id
      .or_else(|| self.expression.as_ref().map(|e| e.root_id))
  }

  /// Every op name the metadata refers to, in a stable order
  pub fn op_names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    if let Some(decision) = &self.decision {
      names.extend(decision.node_ops.values().map(String::as_str));
      names.extend(decision.edge_ops.iter().map(|op| op.op_name.as_str()));
    }
    if let Some(expression) = &self.expression {
      names.extend(expression.node_ops.values().map(String::as_str));
    }
    names.sort_unstable();
    names.dedup();
    names
  }

  /// Rewrite every node id the wiring mentions (ids that disappear are dropped)
  pub fn retain_nodes(&mut self, live: impl Fn(NodeId) -> bool) {
    if let Some(decision) = &mut self.decision {
      decision.node_ops.retain(|id, _| live(*id));
      decision
        .edge_ops
        .retain(|op| live(op.parent_id) && live(op.child_id));
    }
    if let Some(expression) = &mut self.expression {
      expression.node_ops.retain(|id, _| live(*id));
    }
  }

  pub fn to_payload(&self) -> Payload {
    Payload::message(METADATA_TYPE_NAME, self)
  }

  pub fn from_payload(payload: &Payload) -> Result<Self> {
    if payload.type_name != METADATA_TYPE_NAME {
      return Err(
        FormatError::Metadata(format!(
          "entry is named {:?}, expected {METADATA_TYPE_NAME}",
          payload.type_name
        ))
        .into(),
      );
    }
    if payload.kind != DataType::Protobuf {
      return Err(
        FormatError::Metadata(format!("entry has kind {:?}, expected protobuf", payload.kind))
          .into(),
      );
    }
    Ok(GraphMetadata::decode(payload.bytes.as_slice())?)
  }
}

/// Read the metadata entry a header points at (`offset == 0` means none)
pub fn read_metadata(data: &dyn MappedStorage, offset: u64) -> Result<Option<GraphMetadata>> {
  if offset == 0 {
    return Ok(None);
  }
  let payload = read_entry(data, offset)?;
  GraphMetadata::from_payload(&payload).map(Some)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn decision_metadata() -> GraphMetadata {
    let mut meta = GraphMetadata::for_kind(GraphKind::DecisionTree);
    meta.root_id = Some(1);
    let mut decision = DecisionMetadata::default();
    decision.node_ops.insert(2, "leafLow".to_string());
    decision.node_ops.insert(3, "leafHigh".to_string());
    decision.edge_ops.push(EdgeOp {
      parent_id: 1,
      child_id: 2,
      op_name: "ltFive".to_string(),
    });
    meta.decision = Some(decision);
    meta
  }

  #[test]
  fn test_payload_is_protobuf_named_entry() {
    let meta = decision_metadata();
    let payload = meta.to_payload();
    assert_eq!(payload.kind, DataType::Protobuf);
    assert_eq!(payload.type_name, METADATA_TYPE_NAME);
    assert_eq!(GraphMetadata::from_payload(&payload).unwrap(), meta);
  }

  #[test]
  fn test_wrong_entry_is_rejected() {
    let mut payload = decision_metadata().to_payload();
    payload.type_name = "other".to_string();
    assert!(GraphMetadata::from_payload(&payload).is_err());
  }

  #[test]
  fn test_kind_and_op_names() {
    let meta = decision_metadata();
    assert_eq!(meta.graph_kind(), GraphKind::DecisionTree);
    assert_eq!(meta.op_names(), vec!["leafHigh", "leafLow", "ltFive"]);
    assert_eq!(GraphMetadata { kind: 99, ..Default::default() }.graph_kind(), GraphKind::Generic);
  }

  #[test]
  fn test_retain_nodes_drops_wiring() {
    let mut meta = decision_metadata();
    meta.retain_nodes(|id| id != 2);
    let decision = meta.decision.unwrap();
    assert_eq!(decision.node_ops.len(), 1);
    assert!(decision.edge_ops.is_empty());
  }
}
