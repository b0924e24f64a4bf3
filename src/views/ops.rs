//! Named operations bound by the decision-tree and expression views
//!
//! Only names are persisted; the handlers are supplied again on every open.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::types::NodeId;

/// Decision node: produce an answer for the input, or defer to the edges
pub type NodeOpFn<I, O> = Arc<dyn Fn(&I) -> Option<O> + Send + Sync>;

/// Decision edge: whether the input may follow the edge
pub type EdgeOpFn<I> = Arc<dyn Fn(&I) -> bool + Send + Sync>;

/// Expression node: combine the input with the outputs of its children
pub type ExpressionOpFn<I, O> = Arc<dyn Fn(&I, &BTreeMap<NodeId, O>) -> Option<O> + Send + Sync>;

/// Registry of operation handlers by name
pub struct Operations<I, O> {
  pub(crate) node_ops: HashMap<String, NodeOpFn<I, O>>,
  pub(crate) edge_ops: HashMap<String, EdgeOpFn<I>>,
  pub(crate) expression_ops: HashMap<String, ExpressionOpFn<I, O>>,
}

impl<I, O> Operations<I, O> {
  pub fn new() -> Self {
    Self {
      node_ops: HashMap::new(),
      edge_ops: HashMap::new(),
      expression_ops: HashMap::new(),
    }
  }

  pub fn node_op<F>(mut self, name: impl Into<String>, op: F) -> Self
  where
    F: Fn(&I) -> Option<O> + Send + Sync + 'static,
  {
    self.node_ops.insert(name.into(), Arc::new(op));
    self
  }

  pub fn edge_op<F>(mut self, name: impl Into<String>, op: F) -> Self
  where
    F: Fn(&I) -> bool + Send + Sync + 'static,
  {
    self.edge_ops.insert(name.into(), Arc::new(op));
    self
  }

  pub fn expression_op<F>(mut self, name: impl Into<String>, op: F) -> Self
  where
    F: Fn(&I, &BTreeMap<NodeId, O>) -> Option<O> + Send + Sync + 'static,
  {
    self.expression_ops.insert(name.into(), Arc::new(op));
    self
  }

  /// Whether any kind of handler is registered under `name`
  pub fn contains(&self, name: &str) -> bool {
    self.node_ops.contains_key(name)
      || self.edge_ops.contains_key(name)
      || self.expression_ops.contains_key(name)
  }

  pub fn is_empty(&self) -> bool {
    self.node_ops.is_empty() && self.edge_ops.is_empty() && self.expression_ops.is_empty()
  }
}

impl<I, O> Default for Operations<I, O> {
  fn default() -> Self {
    Self::new()
  }
}

impl<I, O> Clone for Operations<I, O> {
  fn clone(&self) -> Self {
    Self {
      node_ops: self.node_ops.clone(),
      edge_ops: self.edge_ops.clone(),
      expression_ops: self.expression_ops.clone(),
    }
  }
}

fn sorted(mut names: Vec<&String>) -> Vec<&String> {
  names.sort();
  names
}

impl<I, O> fmt::Debug for Operations<I, O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Operations")
      .field("node_ops", &sorted(self.node_ops.keys().collect()))
      .field("edge_ops", &sorted(self.edge_ops.keys().collect()))
      .field("expression_ops", &sorted(self.expression_ops.keys().collect()))
      .finish()
  }
}
