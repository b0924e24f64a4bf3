//! Store integrity checks.

use std::collections::HashSet;

use crate::core::data::read_entry;
use crate::graph::view::StoredGraph;
use crate::types::{CheckResult, GraphKind};

/// Structural invariants: counts, record ids and edge endpoints
pub fn verify_structure(graph: &StoredGraph) -> CheckResult {
  let mut errors = Vec::new();
  let warnings = Vec::new();

  check_node_records(graph, &mut errors);
  check_edge_records(graph, &mut errors);

  CheckResult {
    valid: errors.is_empty(),
    errors,
    warnings,
  }
}

/// Every check: the structural ones plus payload offsets and metadata
pub fn check_store(graph: &StoredGraph) -> CheckResult {
  let mut result = verify_structure(graph);

  check_payload_offsets(graph, &mut result.errors);
  check_metadata(graph, &mut result.errors, &mut result.warnings);

  result.valid = result.errors.is_empty();
  result
}

fn check_node_records(graph: &StoredGraph, errors: &mut Vec<String>) {
  let max_id = graph.max_node_id();
  let mut live = 0u64;
  for index in 0..graph.node_records_len() {
    let record = match graph.nodes.node(index) {
      Ok(record) => record,
      Err(err) => {
        errors.push(format!("node record {index} unreadable: {err}"));
        continue;
      }
    };
    if record.id > max_id {
      errors.push(format!(
        "node record {index} has id {} above MaxID {max_id}",
        record.id
      ));
    }
    if record.is_live() {
      live += 1;
    }
  }
  let count = graph.node_header().count;
  if live != count {
    errors.push(format!(
      "node header counts {count} live nodes, records hold {live}"
    ));
  }
}

fn check_edge_records(graph: &StoredGraph, errors: &mut Vec<String>) {
  let mut live = 0u64;
  for index in 0..graph.edge_records_len() {
    let record = match graph.edge_record(index) {
      Ok(record) => record,
      Err(err) => {
        errors.push(format!("edge record {index} unreadable: {err}"));
        continue;
      }
    };
    if !record.is_live() {
      continue;
    }
    live += 1;
    for (end, id) in [("source", record.from), ("target", record.to)] {
      if !graph.contains_node(id) {
        errors.push(format!(
          "edge {index} ({} -> {}) {end} {id} is not a live node",
          record.from, record.to
        ));
      }
    }
  }
  let count = graph.edge_header().count;
  if live != count {
    errors.push(format!(
      "edge header counts {count} live edges, records hold {live}"
    ));
  }
}

fn check_payload_offsets(graph: &StoredGraph, errors: &mut Vec<String>) {
  let mut referenced = HashSet::new();

  for node in graph.nodes() {
    let offset = match node.record() {
      Ok(record) => record.data_offset,
      Err(_) => continue,
    };
    if offset == 0 {
      continue;
    }
    referenced.insert(offset);
    if let Err(err) = read_entry(graph.data.as_ref(), offset) {
      errors.push(format!("node {} payload at {offset}: {err}", node.id()));
    }
  }

  for index in 0..graph.edge_records_len() {
    let Ok(record) = graph.edge_record(index) else {
      continue;
    };
    let offset = record.data_offset as u64;
    if !record.is_live() || offset == 0 {
      continue;
    }
    referenced.insert(offset);
    if let Err(err) = read_entry(graph.data.as_ref(), offset) {
      errors.push(format!("edge {index} payload at {offset}: {err}"));
    }
  }

  let metadata_offset = graph.node_header().data_file_offset;
  if metadata_offset != 0 {
    referenced.insert(metadata_offset);
  }
  let entry_count = graph.data_header().entry_count;
  if (referenced.len() as u64) > entry_count {
    errors.push(format!(
      "data header counts {entry_count} entries, records reference {}",
      referenced.len()
    ));
  }
}

fn check_metadata(graph: &StoredGraph, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
  let Some(metadata) = graph.metadata() else {
    if graph.node_header().data_file_offset == 0 && graph.kind() != GraphKind::Generic {
      errors.push(format!(
        "{} graph has no metadata entry",
        graph.kind().name()
      ));
    }
    return;
  };

  let kind = metadata.graph_kind();
  for (file, header) in [("node", graph.node_header()), ("edge", graph.edge_header())] {
    if header.kind() != kind {
      warnings.push(format!(
        "{file} header kind byte says {}, metadata says {}",
        header.kind().name(),
        kind.name()
      ));
    }
  }

  if matches!(kind, GraphKind::Tree | GraphKind::ExpressionGraph | GraphKind::DecisionTree) {
    match metadata.root() {
      None => errors.push(format!("{} graph has no root id", kind.name())),
      Some(root) if !graph.contains_node(root) => {
        errors.push(format!("root {root} is not a live node"))
      }
      Some(_) => {}
    }
  }

  let mut wired: Vec<i64> = Vec::new();
  if let Some(decision) = &metadata.decision {
    wired.extend(decision.node_ops.keys().copied());
    for op in &decision.edge_ops {
      wired.push(op.parent_id);
      wired.push(op.child_id);
    }
  }
  if let Some(expression) = &metadata.expression {
    wired.extend(expression.node_ops.keys().copied());
  }
  for id in wired {
    if !graph.contains_node(id) {
      warnings.push(format!("operation wired to missing node {id}"));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::data::Payload;
  use crate::core::storage::{MappedStorage, MemoryProvider, StorageProvider};
  use crate::core::value::Value;
  use crate::graph::store::{GraphPaths, GraphStore, StoreOptions};
  use crate::graph::writer::GraphBuilder;
  use crate::graph::write_graph;

  #[test]
  fn test_fresh_store_is_valid() {
    let provider = MemoryProvider::new();
    let paths = GraphPaths::from_base("check");
    let store =
      GraphStore::create(&provider, &paths, GraphKind::Generic, StoreOptions::new()).unwrap();
    let mut tx = store.begin().unwrap();
    let a = tx.add_node(Some(Payload::value(Value::I64(1)))).unwrap();
    let b = tx.add_node(None).unwrap();
    tx.add_edge(a, b, Some(Payload::value(Value::F32(0.5)))).unwrap();
    tx.commit().unwrap();

    let result = store.check();
    assert!(result.valid, "{:?}", result.errors);
    assert!(result.warnings.is_empty());
  }

  #[test]
  fn test_tree_without_root_is_reported() {
    let provider = MemoryProvider::new();
    let paths = GraphPaths::from_base("rootless");
    let mut builder = GraphBuilder::new(GraphKind::Tree);
    builder.add_node(None);
    let node = provider.open(&paths.nodes, false).unwrap();
    let edge = provider.open(&paths.edges, false).unwrap();
    let data = provider.open(&paths.data, false).unwrap();
    write_graph(node.as_ref(), edge.as_ref(), data.as_ref(), &builder).unwrap();

    let store = GraphStore::open(&provider, &paths, StoreOptions::new()).unwrap();
    let result = store.check();
    assert!(!result.valid);
    assert!(result.errors.iter().any(|e| e.contains("no root id")));
  }

  #[test]
  fn test_count_mismatch_fails_open() {
    use crate::core::codec::encode_header;
    use crate::types::RecordFile;

    let provider = MemoryProvider::new();
    let paths = GraphPaths::from_base("miscount");
    let mut builder = GraphBuilder::new(GraphKind::Generic);
    builder.add_node(None);
    builder.add_node(None);
    let node = provider.open(&paths.nodes, false).unwrap();
    let edge = provider.open(&paths.edges, false).unwrap();
    let data = provider.open(&paths.data, false).unwrap();
    write_graph(node.as_ref(), edge.as_ref(), data.as_ref(), &builder).unwrap();

    let store = GraphStore::open(&provider, &paths, StoreOptions::new()).unwrap();
    let mut header = store.graph().node_header().clone();
    header.count = 5;
    node.write_at(0, &encode_header(RecordFile::Nodes, &header)).unwrap();

    assert!(matches!(
      GraphStore::open(&provider, &paths, StoreOptions::new()),
      Err(crate::error::GraphError::InconsistentState(_))
    ));
    let unchecked = GraphStore::open(
      &provider,
      &paths,
      StoreOptions::new().verify_on_open(false),
    )
    .unwrap();
    assert!(!unchecked.check().valid);
  }
}
