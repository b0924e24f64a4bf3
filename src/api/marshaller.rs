//! Marshaller facade
//!
//! Writes a [`GraphBuilder`] to the three graph files and reads them back as
//! the view matching the stored graph kind.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::core::storage::StorageProvider;
use crate::error::{GraphError, Result};
use crate::graph::store::{GraphPaths, GraphStore, StoreOptions};
use crate::graph::view::StoredGraph;
use crate::graph::writer::{write_graph, GraphBuilder};
use crate::types::GraphKind;
use crate::views::{Operations, StoredDecisionTree, StoredExpressionGraph, StoredTree};

/// What `unmarshal` hands back, by stored graph kind
pub enum OpenedGraph<I, O> {
  Graph(Arc<StoredGraph>),
  Tree(StoredTree),
  DecisionTree(StoredDecisionTree<I, O>),
  Expression(StoredExpressionGraph<I, O>),
}

impl<I, O> OpenedGraph<I, O> {
  pub fn kind(&self) -> GraphKind {
    match self {
      OpenedGraph::Graph(graph) => graph.kind(),
      OpenedGraph::Tree(_) => GraphKind::Tree,
      OpenedGraph::DecisionTree(_) => GraphKind::DecisionTree,
      OpenedGraph::Expression(_) => GraphKind::ExpressionGraph,
    }
  }

  /// The underlying stored graph, whatever the view
  pub fn graph(&self) -> &Arc<StoredGraph> {
    match self {
      OpenedGraph::Graph(graph) => graph,
      OpenedGraph::Tree(tree) => tree.graph(),
      OpenedGraph::DecisionTree(tree) => tree.graph(),
      OpenedGraph::Expression(expression) => expression.graph(),
    }
  }

  pub fn into_tree(self) -> Option<StoredTree> {
    match self {
      OpenedGraph::Tree(tree) => Some(tree),
      _ => None,
    }
  }

  pub fn into_decision_tree(self) -> Option<StoredDecisionTree<I, O>> {
    match self {
      OpenedGraph::DecisionTree(tree) => Some(tree),
      _ => None,
    }
  }

  pub fn into_expression(self) -> Option<StoredExpressionGraph<I, O>> {
    match self {
      OpenedGraph::Expression(expression) => Some(expression),
      _ => None,
    }
  }
}

impl<I, O> fmt::Debug for OpenedGraph<I, O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("OpenedGraph")
      .field(&self.kind())
      .field(self.graph())
      .finish()
  }
}

/// Marshals graphs to and from one set of graph files
pub struct GraphMarshaller {
  provider: Arc<dyn StorageProvider>,
  paths: GraphPaths,
  options: StoreOptions,
}

impl GraphMarshaller {
  pub fn new(provider: Arc<dyn StorageProvider>, paths: GraphPaths) -> Self {
    Self {
      provider,
      paths,
      options: StoreOptions::default(),
    }
  }

  /// Files named `<base>.nodes.graph`, `<base>.edges.graph`, `<base>.data.graph`
  pub fn with_base(provider: Arc<dyn StorageProvider>, base: impl AsRef<str>) -> Self {
    Self::new(provider, GraphPaths::from_base(base))
  }

  /// Options for stores opened by `unmarshal` (hooks, verification)
  pub fn options(mut self, options: StoreOptions) -> Self {
    self.options = options;
    self
  }

  pub fn paths(&self) -> &GraphPaths {
    &self.paths
  }

  /// Write `builder` as the complete contents of the three files
  pub fn marshal(&self, builder: &GraphBuilder) -> Result<()> {
    let node = self.provider.open(&self.paths.nodes, false)?;
    let edge = self.provider.open(&self.paths.edges, false)?;
    let data = self.provider.open(&self.paths.data, false)?;
    let written = write_graph(node.as_ref(), edge.as_ref(), data.as_ref(), builder);
    let closed = data.close().and(edge.close()).and(node.close());
    written?;
    closed?;
    debug!(path = %self.paths.nodes, kind = builder.kind().name(), "marshalled graph");
    Ok(())
  }

  /// Marshal after checking every wired op name has a handler in `ops`
  pub fn marshal_with_ops<I, O>(&self, builder: &GraphBuilder, ops: &Operations<I, O>) -> Result<()> {
    let metadata = builder.metadata();
    if let Some(name) = metadata.op_names().into_iter().find(|name| !ops.contains(name)) {
      return Err(GraphError::UnregisteredOperation {
        name: name.to_string(),
      });
    }
    self.marshal(builder)
  }

  /// Open the stored graph read-only as the view its kind calls for
  pub fn unmarshal<I, O: Clone>(&self, ops: &Operations<I, O>) -> Result<OpenedGraph<I, O>> {
    let store = self.open_store()?;
    let graph = store.graph();
    let opened = match graph.kind() {
      GraphKind::Generic => OpenedGraph::Graph(graph),
      GraphKind::Tree => OpenedGraph::Tree(StoredTree::open(graph)?),
      GraphKind::DecisionTree => OpenedGraph::DecisionTree(StoredDecisionTree::open(graph, ops)?),
      GraphKind::ExpressionGraph => {
        OpenedGraph::Expression(StoredExpressionGraph::open(graph, ops)?)
      }
    };
    debug!(path = %self.paths.nodes, kind = opened.kind().name(), "unmarshalled graph");
    Ok(opened)
  }

  /// Open the files as a read-only store
  pub fn open_store(&self) -> Result<GraphStore> {
    GraphStore::open(
      self.provider.as_ref(),
      &self.paths,
      self.options.clone().read_only(true),
    )
  }

  /// Open the files as a writable store for transactions and maintenance
  pub fn open_store_mut(&self) -> Result<GraphStore> {
    GraphStore::open(
      self.provider.as_ref(),
      &self.paths,
      self.options.clone().read_only(false),
    )
  }
}

impl fmt::Debug for GraphMarshaller {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GraphMarshaller")
      .field("paths", &self.paths)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
