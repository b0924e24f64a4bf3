//! Graph store: the three storages, the current view and the writer lock

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::check::verify_structure;
use crate::constants::{EXT_DATA, EXT_EDGES, EXT_NODES};
use crate::core::storage::{MappedStorage, StorageProvider};
use crate::error::{GraphError, Result};
use crate::graph::hooks::{GraphHooks, TypeRegistry};
use crate::graph::tx::Transaction;
use crate::graph::view::{NodeHandle, StoredGraph};
use crate::graph::writer::{write_graph, GraphBuilder};
use crate::types::{CheckResult, GraphKind};

// ============================================================================
// Options
// ============================================================================

/// Durability of commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
  /// Sync content before the header flip and headers after it
  #[default]
  Full,

  /// Never sync (fastest, least safe)
  /// Data may be lost on any crash. Only for testing/ephemeral data.
  Off,
}

/// Options for opening a graph store
#[derive(Debug, Clone)]
pub struct StoreOptions {
  /// Open in read-only mode
  pub read_only: bool,
  /// Synchronization mode for commits (default: Full)
  pub sync_mode: SyncMode,
  /// Check counts and edge endpoints on open (default: true)
  pub verify_on_open: bool,
  /// Callbacks and protobuf registry
  pub hooks: GraphHooks,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      read_only: false,
      sync_mode: SyncMode::Full,
      verify_on_open: true,
      hooks: GraphHooks::default(),
    }
  }
}

impl StoreOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn read_only(mut self, value: bool) -> Self {
    self.read_only = value;
    self
  }

  pub fn sync_mode(mut self, mode: SyncMode) -> Self {
    self.sync_mode = mode;
    self
  }

  pub fn verify_on_open(mut self, value: bool) -> Self {
    self.verify_on_open = value;
    self
  }

  pub fn types(mut self, registry: TypeRegistry) -> Self {
    self.hooks.types = registry;
    self
  }

  /// Node equality used by `StoredGraph::equal`
  pub fn equal<F>(mut self, f: F) -> Self
  where
    F: Fn(&NodeHandle<'_>, &NodeHandle<'_>) -> bool + Send + Sync + 'static,
  {
    self.hooks.equal = Some(Arc::new(f));
    self
  }

  /// Node ordering used by `StoredGraph::compare`
  pub fn compare<F>(mut self, f: F) -> Self
  where
    F: Fn(&NodeHandle<'_>, &NodeHandle<'_>) -> CmpOrdering + Send + Sync + 'static,
  {
    self.hooks.compare = Some(Arc::new(f));
    self
  }

  /// Edge cost used by `StoredGraph::cost`
  pub fn cost<F>(mut self, f: F) -> Self
  where
    F: Fn(&NodeHandle<'_>, &NodeHandle<'_>) -> f32 + Send + Sync + 'static,
  {
    self.hooks.cost = Some(Arc::new(f));
    self
  }

  pub(crate) fn syncs(&self) -> bool {
    self.sync_mode == SyncMode::Full
  }
}

/// Logical paths of the node, edge and data files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphPaths {
  pub nodes: String,
  pub edges: String,
  pub data: String,
}

impl GraphPaths {
  pub fn new(nodes: impl Into<String>, edges: impl Into<String>, data: impl Into<String>) -> Self {
    Self {
      nodes: nodes.into(),
      edges: edges.into(),
      data: data.into(),
    }
  }

  /// `<base>.nodes.graph`, `<base>.edges.graph`, `<base>.data.graph`
  pub fn from_base(base: impl AsRef<str>) -> Self {
    let base = base.as_ref();
    Self::new(
      format!("{base}{EXT_NODES}"),
      format!("{base}{EXT_EDGES}"),
      format!("{base}{EXT_DATA}"),
    )
  }
}

// ============================================================================
// Store
// ============================================================================

/// The three files of one graph plus its current committed view
pub struct GraphStore {
  pub(crate) node_storage: Arc<dyn MappedStorage>,
  pub(crate) edge_storage: Arc<dyn MappedStorage>,
  pub(crate) data_storage: Arc<dyn MappedStorage>,
  pub(crate) options: StoreOptions,
  pub(crate) hooks: Arc<GraphHooks>,
  view: RwLock<Arc<StoredGraph>>,
  pub(crate) writer: Mutex<()>,
  read_only: bool,
  closed: AtomicBool,
}

impl GraphStore {
  /// Open an existing graph through `provider`
  pub fn open(
    provider: &dyn StorageProvider,
    paths: &GraphPaths,
    options: StoreOptions,
  ) -> Result<Self> {
    let read_only = options.read_only;
    let node = provider.open(&paths.nodes, read_only)?;
    let edge = provider.open(&paths.edges, read_only)?;
    let data = provider.open(&paths.data, read_only)?;
    Self::from_storages(node, edge, data, options)
  }

  /// Write an empty graph of `kind` and open it
  pub fn create(
    provider: &dyn StorageProvider,
    paths: &GraphPaths,
    kind: GraphKind,
    options: StoreOptions,
  ) -> Result<Self> {
    let node = provider.open(&paths.nodes, false)?;
    let edge = provider.open(&paths.edges, false)?;
    let data = provider.open(&paths.data, false)?;
    write_graph(
      node.as_ref(),
      edge.as_ref(),
      data.as_ref(),
      &GraphBuilder::new(kind),
    )?;
    Self::from_storages(node, edge, data, options)
  }

  /// Open over already-opened storages
  pub fn from_storages(
    node_storage: Arc<dyn MappedStorage>,
    edge_storage: Arc<dyn MappedStorage>,
    data_storage: Arc<dyn MappedStorage>,
    options: StoreOptions,
  ) -> Result<Self> {
    let hooks = Arc::new(options.hooks.clone());
    let read_only = options.read_only
      || node_storage.is_read_only()
      || edge_storage.is_read_only()
      || data_storage.is_read_only();

    let view = load_view(
      node_storage.as_ref(),
      edge_storage.as_ref(),
      &data_storage,
      &hooks,
      options.verify_on_open,
    )?;
    debug!(
      kind = view.kind().name(),
      nodes = view.node_count(),
      edges = view.edge_count(),
      read_only,
      "opened graph store"
    );

    Ok(Self {
      node_storage,
      edge_storage,
      data_storage,
      options,
      hooks,
      view: RwLock::new(Arc::new(view)),
      writer: Mutex::new(()),
      read_only,
      closed: AtomicBool::new(false),
    })
  }

  /// Current committed view
  pub fn graph(&self) -> Arc<StoredGraph> {
    self.view.read().clone()
  }

  pub fn is_read_only(&self) -> bool {
    self.read_only
  }

  pub fn options(&self) -> &StoreOptions {
    &self.options
  }

  /// Begin a transaction; only one may be open at a time
  pub fn begin(&self) -> Result<Transaction<'_>> {
    self.ensure_open()?;
    if self.read_only {
      return Err(GraphError::ReadOnly("begin transaction".to_string()));
    }
    let guard = self
      .writer
      .try_lock()
      .ok_or(GraphError::TransactionInProgress)?;
    Ok(Transaction::new(self, guard))
  }

  /// Run every integrity check against the current view
  pub fn check(&self) -> CheckResult {
    crate::check::check_store(&self.graph())
  }

  /// Rebuild the view from the files
  pub fn reload(&self) -> Result<()> {
    self.ensure_open()?;
    let view = load_view(
      self.node_storage.as_ref(),
      self.edge_storage.as_ref(),
      &self.data_storage,
      &self.hooks,
      self.options.verify_on_open,
    )?;
    self.install(view);
    Ok(())
  }

  pub(crate) fn install(&self, view: StoredGraph) {
    *self.view.write() = Arc::new(view);
  }

  pub(crate) fn ensure_open(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(GraphError::Closed);
    }
    Ok(())
  }

  /// Close the storages in reverse order of opening; idempotent
  ///
  /// Views already handed out keep their mapped regions; dropping the store
  /// without closing leaves the storages to be released with their last owner.
  pub fn close(&self) -> Result<()> {
    if self.closed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let data = self.data_storage.close();
    let edge = self.edge_storage.close();
    let node = self.node_storage.close();
    data.and(edge).and(node)
  }
}

pub(crate) fn load_view(
  node: &dyn MappedStorage,
  edge: &dyn MappedStorage,
  data: &Arc<dyn MappedStorage>,
  hooks: &Arc<GraphHooks>,
  verify: bool,
) -> Result<StoredGraph> {
  let view = StoredGraph::load(node, edge, data.clone(), hooks.clone())?;
  if verify {
    let result = verify_structure(&view);
    if !result.valid {
      return Err(GraphError::InconsistentState(result.errors.join("; ")));
    }
  }
  Ok(view)
}
