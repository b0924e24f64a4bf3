//! Expression-graph view

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::graph::view::StoredGraph;
use crate::types::NodeId;
use crate::views::ops::{ExpressionOpFn, Operations};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Visiting,
  Done,
}

/// A stored graph whose nodes carry named expression operations
pub struct StoredExpressionGraph<I, O> {
  graph: Arc<StoredGraph>,
  root: NodeId,
  ops: HashMap<NodeId, ExpressionOpFn<I, O>>,
}

impl<I, O> StoredExpressionGraph<I, O> {
  pub fn graph(&self) -> &Arc<StoredGraph> {
    &self.graph
  }

  pub fn root_id(&self) -> NodeId {
    self.root
  }
}

impl<I, O: Clone> StoredExpressionGraph<I, O> {
  /// Bind every op name in the metadata to a handler from `ops`
  pub fn open(graph: Arc<StoredGraph>, ops: &Operations<I, O>) -> Result<Self> {
    let metadata = graph.metadata().ok_or_else(|| {
      GraphError::InconsistentState("expression graph has no metadata entry".to_string())
    })?;
    let expression = metadata.expression.as_ref().ok_or_else(|| {
      GraphError::InconsistentState("expression graph has no expression wiring".to_string())
    })?;
    let root = match expression.root_id {
      0 => metadata.root_id,
      id => Some(id),
    }
    .ok_or_else(|| GraphError::InconsistentState("expression graph has no root id".to_string()))?;

    let mut bound = HashMap::with_capacity(expression.node_ops.len());
    for (id, name) in &expression.node_ops {
      let op = ops
        .expression_ops
        .get(name)
        .ok_or_else(|| GraphError::UnregisteredOperation { name: name.clone() })?;
      bound.insert(*id, op.clone());
    }

    Ok(Self {
      graph,
      root,
      ops: bound,
    })
  }

  /// Evaluate bottom-up from `start` (or the root) once per input
  pub fn compute(&self, start: Option<NodeId>, inputs: &[I]) -> Result<Vec<O>> {
    let start = start.unwrap_or(self.root);
    if !self.graph.contains_node(start) {
      return Err(GraphError::NodeNotFound(start));
    }
    let order = self.evaluation_order(start)?;
    inputs
      .iter()
      .map(|input| self.compute_one(&order, start, input))
      .collect()
  }

  fn compute_one(&self, order: &[NodeId], start: NodeId, input: &I) -> Result<O> {
    let mut outputs: HashMap<NodeId, O> = HashMap::with_capacity(order.len());
    for &id in order {
      let op = self
        .ops
        .get(&id)
        .ok_or_else(|| GraphError::Evaluation(format!("node {id} has no operation")))?;
      let mut children = BTreeMap::new();
      for child in self.graph.neighbors(id) {
        if let Some(value) = outputs.get(&child.id()) {
          children.insert(child.id(), value.clone());
        }
      }
      let value = op(input, &children)
        .ok_or_else(|| GraphError::Evaluation(format!("node {id} produced no value")))?;
      outputs.insert(id, value);
    }
    outputs
      .remove(&start)
      .ok_or_else(|| GraphError::Evaluation(format!("node {start} was not evaluated")))
  }

  /// Nodes reachable from `start`, children before parents
  fn evaluation_order(&self, start: NodeId) -> Result<Vec<NodeId>> {
    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    let mut order = Vec::new();
    let mut stack: Vec<(NodeId, bool)> = vec![(start, false)];

    while let Some((id, expanded)) = stack.pop() {
      if expanded {
        marks.insert(id, Mark::Done);
        order.push(id);
        continue;
      }
      match marks.get(&id) {
        Some(Mark::Done) => continue,
        Some(Mark::Visiting) => {
          return Err(GraphError::Evaluation(format!(
            "expression graph has a cycle through node {id}"
          )))
        }
        None => {}
      }
      marks.insert(id, Mark::Visiting);
      stack.push((id, true));
      for child in self.graph.neighbors(id) {
        match marks.get(&child.id()) {
          Some(Mark::Done) => {}
          Some(Mark::Visiting) => {
            return Err(GraphError::Evaluation(format!(
              "expression graph has a cycle through node {}",
              child.id()
            )))
          }
          None => stack.push((child.id(), false)),
        }
      }
    }
    Ok(order)
  }
}

impl<I, O> fmt::Debug for StoredExpressionGraph<I, O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoredExpressionGraph")
      .field("root", &self.root)
      .field("ops", &self.ops.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::storage::{MemoryProvider, StorageProvider};
  use crate::graph::store::{GraphPaths, GraphStore, StoreOptions};
  use crate::graph::writer::{write_graph, GraphBuilder};
  use crate::types::GraphKind;

  fn store(builder: &GraphBuilder) -> GraphStore {
    let provider = MemoryProvider::new();
    let paths = GraphPaths::from_base("expr");
    let node = provider.open(&paths.nodes, false).unwrap();
    let edge = provider.open(&paths.edges, false).unwrap();
    let data = provider.open(&paths.data, false).unwrap();
    write_graph(node.as_ref(), edge.as_ref(), data.as_ref(), builder).unwrap();
    GraphStore::open(&provider, &paths, StoreOptions::new()).unwrap()
  }

  fn arithmetic() -> Operations<i64, i64> {
    Operations::new()
      .expression_op("input", |x: &i64, _: &BTreeMap<NodeId, i64>| Some(*x))
      .expression_op("const2", |_: &i64, _: &BTreeMap<NodeId, i64>| Some(2))
      .expression_op("sum", |_: &i64, children: &BTreeMap<NodeId, i64>| {
        Some(children.values().sum())
      })
      .expression_op("product", |_: &i64, children: &BTreeMap<NodeId, i64>| {
        Some(children.values().product())
      })
  }

  /// (x + 2) * 2
  fn affine() -> GraphBuilder {
    let mut builder = GraphBuilder::new(GraphKind::ExpressionGraph);
    let product = builder.add_node(None);
    let sum = builder.add_node(None);
    let x = builder.add_node(None);
    let two = builder.add_node(None);
    builder.add_edge(product, sum, None).unwrap();
    builder.add_edge(product, two, None).unwrap();
    builder.add_edge(sum, x, None).unwrap();
    builder.add_edge(sum, two, None).unwrap();
    builder.set_expression_op(product, "product").unwrap();
    builder.set_expression_op(sum, "sum").unwrap();
    builder.set_expression_op(x, "input").unwrap();
    builder.set_expression_op(two, "const2").unwrap();
    builder
  }

  #[test]
  fn test_compute_shares_subexpressions() {
    let store = store(&affine());
    let graph = StoredExpressionGraph::open(store.graph(), &arithmetic()).unwrap();
    assert_eq!(graph.root_id(), 1);
    assert_eq!(graph.compute(None, &[1, 5]).unwrap(), vec![6, 14]);
    assert_eq!(graph.compute(Some(2), &[5]).unwrap(), vec![7]);
  }

  #[test]
  fn test_cycle_is_an_evaluation_error() {
    let mut builder = affine();
    builder.add_edge(3, 1, None).unwrap();
    builder.set_root(1).unwrap();
    let store = store(&builder);
    let graph = StoredExpressionGraph::open(store.graph(), &arithmetic()).unwrap();
    assert!(matches!(
      graph.compute(None, &[1]),
      Err(GraphError::Evaluation(_))
    ));
  }

  #[test]
  fn test_unregistered_op() {
    let store = store(&affine());
    let ops = Operations::<i64, i64>::new();
    assert!(matches!(
      StoredExpressionGraph::open(store.graph(), &ops),
      Err(GraphError::UnregisteredOperation { .. })
    ));
  }
}
