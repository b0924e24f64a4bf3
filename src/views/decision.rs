//! Decision-tree view

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::graph::view::StoredGraph;
use crate::types::NodeId;
use crate::views::ops::{EdgeOpFn, NodeOpFn, Operations};

/// A stored graph whose nodes and edges carry named decision operations
pub struct StoredDecisionTree<I, O> {
  graph: Arc<StoredGraph>,
  root: NodeId,
  node_ops: HashMap<NodeId, NodeOpFn<I, O>>,
  edge_ops: HashMap<(NodeId, NodeId), EdgeOpFn<I>>,
}

impl<I, O> StoredDecisionTree<I, O> {
  /// Bind every op name in the metadata to a handler from `ops`
  pub fn open(graph: Arc<StoredGraph>, ops: &Operations<I, O>) -> Result<Self> {
    let metadata = graph.metadata().ok_or_else(|| {
      GraphError::InconsistentState("decision tree has no metadata entry".to_string())
    })?;
    let root = metadata.root().ok_or_else(|| {
      GraphError::InconsistentState("decision tree has no root id".to_string())
    })?;

    let mut node_ops = HashMap::new();
    let mut edge_ops = HashMap::new();
    if let Some(decision) = &metadata.decision {
      for (id, name) in &decision.node_ops {
        let op = ops
          .node_ops
          .get(name)
          .ok_or_else(|| GraphError::UnregisteredOperation { name: name.clone() })?;
        node_ops.insert(*id, op.clone());
      }
      for wiring in &decision.edge_ops {
        let op = ops.edge_ops.get(&wiring.op_name).ok_or_else(|| {
          GraphError::UnregisteredOperation {
            name: wiring.op_name.clone(),
          }
        })?;
        edge_ops.insert((wiring.parent_id, wiring.child_id), op.clone());
      }
    }

    Ok(Self {
      graph,
      root,
      node_ops,
      edge_ops,
    })
  }

  pub fn graph(&self) -> &Arc<StoredGraph> {
    &self.graph
  }

  pub fn root_id(&self) -> NodeId {
    self.root
  }

  /// Decide each input, starting at `start` or the root
  ///
  /// Depth first: at each node the node op answers if it can; otherwise the
  /// outgoing edges (record order) whose op accepts the input are tried in
  /// turn, and a child that finds no answer falls back to its next sibling.
  /// An edge without an op always accepts. An input with no answer anywhere
  /// fails the call with `NoPath`; a path that reaches a node already on it
  /// fails with `Evaluation`.
  pub fn decide(&self, start: Option<NodeId>, inputs: &[I]) -> Result<Vec<O>> {
    let start = start.unwrap_or(self.root);
    if !self.graph.contains_node(start) {
      return Err(GraphError::NodeNotFound(start));
    }
    inputs
      .iter()
      .enumerate()
      .map(|(input_index, input)| {
        self
          .decide_from(start, input, &mut HashSet::new())?
          .ok_or(GraphError::NoPath { input_index })
      })
      .collect()
  }

  fn decide_from(&self, node: NodeId, input: &I, path: &mut HashSet<NodeId>) -> Result<Option<O>> {
    if !path.insert(node) {
      return Err(GraphError::Evaluation(format!(
        "decision path returns to node {node}"
      )));
    }
    if let Some(answer) = self.node_ops.get(&node).and_then(|op| op(input)) {
      path.remove(&node);
      return Ok(Some(answer));
    }
    for edge in self.graph.edges_from(node) {
      let accepts = self
        .edge_ops
        .get(&(node, edge.to()))
        .map_or(true, |op| op(input));
      if !accepts {
        continue;
      }
      if let Some(answer) = self.decide_from(edge.to(), input, path)? {
        path.remove(&node);
        return Ok(Some(answer));
      }
    }
    path.remove(&node);
    Ok(None)
  }
}

impl<I, O> fmt::Debug for StoredDecisionTree<I, O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoredDecisionTree")
      .field("root", &self.root)
      .field("node_ops", &self.node_ops.len())
      .field("edge_ops", &self.edge_ops.len())
      .finish()
  }
}
