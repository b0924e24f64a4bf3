//! Tree view

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::graph::view::{NodeHandle, StoredGraph};
use crate::types::NodeId;

/// A stored graph read as a rooted tree
///
/// Acyclicity is not enforced; the root comes from the metadata entry.
#[derive(Debug, Clone)]
pub struct StoredTree {
  graph: Arc<StoredGraph>,
  root: NodeId,
  tree_type: Option<String>,
}

impl StoredTree {
  pub fn open(graph: Arc<StoredGraph>) -> Result<Self> {
    let metadata = graph
      .metadata()
      .ok_or_else(|| GraphError::InconsistentState("tree has no metadata entry".to_string()))?;
    let root = metadata
      .root()
      .ok_or_else(|| GraphError::InconsistentState("tree has no root id".to_string()))?;
    if !graph.contains_node(root) {
      return Err(GraphError::NodeNotFound(root));
    }
    let tree_type = metadata.tree_type.clone();
    Ok(Self {
      graph,
      root,
      tree_type,
    })
  }

  pub fn graph(&self) -> &Arc<StoredGraph> {
    &self.graph
  }

  pub fn root(&self) -> Option<NodeHandle<'_>> {
    self.graph.node_by_id(self.root)
  }

  pub fn root_id(&self) -> NodeId {
    self.root
  }

  pub fn tree_type(&self) -> Option<&str> {
    self.tree_type.as_deref()
  }

  pub fn node_count(&self) -> u64 {
    self.graph.node_count()
  }

  /// Longest path from the root, in edges; a lone root has height 0
  pub fn height(&self) -> usize {
    let mut seen = HashSet::from([self.root]);
    let mut queue = VecDeque::from([(self.root, 0usize)]);
    let mut height = 0;
    while let Some((id, depth)) = queue.pop_front() {
      height = height.max(depth);
      for child in self.graph.neighbors(id) {
        if seen.insert(child.id()) {
          queue.push_back((child.id(), depth + 1));
        }
      }
    }
    height
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::storage::{MemoryProvider, StorageProvider};
  use crate::graph::store::{GraphPaths, GraphStore, StoreOptions};
  use crate::graph::writer::{write_graph, GraphBuilder};
  use crate::types::GraphKind;

  fn tree_store(provider: &MemoryProvider, builder: &GraphBuilder) -> GraphStore {
    let paths = GraphPaths::from_base("tree");
    let node = provider.open(&paths.nodes, false).unwrap();
    let edge = provider.open(&paths.edges, false).unwrap();
    let data = provider.open(&paths.data, false).unwrap();
    write_graph(node.as_ref(), edge.as_ref(), data.as_ref(), builder).unwrap();
    GraphStore::open(provider, &paths, StoreOptions::new()).unwrap()
  }

  #[test]
  fn test_height_and_root() {
    let mut builder = GraphBuilder::new(GraphKind::Tree);
    let root = builder.add_node(None);
    let left = builder.add_node(None);
    let right = builder.add_node(None);
    let deep = builder.add_node(None);
    builder.add_edge(root, left, None).unwrap();
    builder.add_edge(root, right, None).unwrap();
    builder.add_edge(right, deep, None).unwrap();
    builder.set_root(root).unwrap();
    builder.set_tree_type("binary");

    let provider = MemoryProvider::new();
    let store = tree_store(&provider, &builder);
    let tree = StoredTree::open(store.graph()).unwrap();
    assert_eq!(tree.root().unwrap().id(), root);
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.node_count(), 4);
    assert_eq!(tree.tree_type(), Some("binary"));
  }

  #[test]
  fn test_single_node_tree() {
    let mut builder = GraphBuilder::new(GraphKind::Tree);
    let root = builder.add_node(None);
    builder.set_root(root).unwrap();
    let provider = MemoryProvider::new();
    let store = tree_store(&provider, &builder);
    assert_eq!(StoredTree::open(store.graph()).unwrap().height(), 0);
  }

  #[test]
  fn test_missing_root_is_rejected() {
    let mut builder = GraphBuilder::new(GraphKind::Tree);
    builder.add_node(None);
    let provider = MemoryProvider::new();
    let store = tree_store(&provider, &builder);
    assert!(matches!(
      StoredTree::open(store.graph()),
      Err(GraphError::InconsistentState(_))
    ));
  }
}
