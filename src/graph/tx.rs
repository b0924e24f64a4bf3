//! Transactions: staged mutations applied with an atomic header flip
//!
//! Mutations are validated when staged and kept in a change log plus a
//! working set. Commit runs in two phases:
//!
//! 1. `prepare`: compute tails and the update policy, grow the files, write
//!    appended records and entries, sync. Nothing committed references these
//!    bytes yet, so abandoning a prepared transaction is harmless.
//! 2. `commit`: rewrite records and entries in place, sync, then write each
//!    64-byte header in a single write and sync.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, trace};

use crate::constants::MAX_EDGE_DATA_OFFSET;
use crate::core::codec::{encode_edge_record, encode_node_record};
use crate::core::data::{append_entry, encode_entry, entry_total_size, overwrite_entry, Payload};
use crate::core::format::{append_records, write_data_header, write_header, write_record};
use crate::core::metadata::GraphMetadata;
use crate::error::{GraphError, Result};
use crate::graph::store::GraphStore;
use crate::graph::view::StoredGraph;
use crate::types::{
  DataHeader, EdgeRecord, NodeId, NodeRecord, RecordFile, RecordFlags, RecordHeader,
};

/// A staged mutation, in the order it was issued
#[derive(Debug, Clone)]
pub enum Change {
  AddNode {
    id: NodeId,
    data: Option<Payload>,
  },
  AddEdge {
    from: NodeId,
    to: NodeId,
    data: Option<Payload>,
  },
  DeleteNode {
    id: NodeId,
  },
  DeleteEdge {
    from: NodeId,
    to: NodeId,
  },
  DeleteEdgeAt {
    index: usize,
  },
  UpdateNode {
    id: NodeId,
    data: Option<Payload>,
  },
  UpdateEdge {
    from: NodeId,
    to: NodeId,
    data: Option<Payload>,
  },
  UpdateEdgeAt {
    index: usize,
    data: Option<Payload>,
  },
  SetMetadata(GraphMetadata),
}

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
  Open,
  Prepared,
  Committed,
  RolledBack,
}

#[derive(Debug, Clone)]
enum PayloadChange {
  Keep,
  Set { payload: Option<Payload>, seq: usize },
}

#[derive(Debug, Clone)]
struct PendingNode {
  /// Record index for nodes that already exist
  index: Option<usize>,
  live: bool,
  payload: PayloadChange,
}

#[derive(Debug, Clone)]
struct PendingEdge {
  from: NodeId,
  to: NodeId,
  live: bool,
  payload: PayloadChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
  Node(NodeId),
  Edge(usize),
}

/// Everything `commit` still has to write after `prepare`
struct Prepared {
  in_place_entries: Vec<(u64, Vec<u8>)>,
  node_updates: Vec<(usize, [u8; 32])>,
  edge_updates: Vec<(usize, [u8; 32])>,
  node_header: RecordHeader,
  edge_header: RecordHeader,
  data_header: DataHeader,
  new_nodes: Vec<(NodeId, usize)>,
  new_edges: Vec<(usize, NodeId, NodeId)>,
  metadata: Option<GraphMetadata>,
}

/// Summary of a committed transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitStats {
  pub nodes_added: usize,
  pub edges_added: usize,
  pub records_rewritten: usize,
  pub entries_appended: u64,
  pub entries_in_place: usize,
}

/// A write transaction holding the store's writer lock
pub struct Transaction<'s> {
  store: &'s GraphStore,
  /// Released as soon as the transaction reaches a terminal state
  guard: Option<MutexGuard<'s, ()>>,
  base: Arc<StoredGraph>,
  state: TxState,
  log: Vec<Change>,
  nodes: HashMap<NodeId, PendingNode>,
  new_nodes: Vec<NodeId>,
  edges: HashMap<usize, PendingEdge>,
  new_edges: Vec<PendingEdge>,
  metadata: Option<GraphMetadata>,
  prepared: Option<Prepared>,
  stats: CommitStats,
}

impl<'s> Transaction<'s> {
  pub(crate) fn new(store: &'s GraphStore, guard: MutexGuard<'s, ()>) -> Self {
    Self {
      base: store.graph(),
      store,
      guard: Some(guard),
      state: TxState::Open,
      log: Vec::new(),
      nodes: HashMap::new(),
      new_nodes: Vec::new(),
      edges: HashMap::new(),
      new_edges: Vec::new(),
      metadata: None,
      prepared: None,
      stats: CommitStats::default(),
    }
  }

  pub fn state(&self) -> TxState {
    self.state
  }

  /// Staged changes in issue order
  pub fn changes(&self) -> &[Change] {
    &self.log
  }

  /// Enter a terminal state and hand the writer lock back
  fn finish(&mut self, state: TxState) {
    self.state = state;
    self.prepared = None;
    self.guard.take();
  }

  fn ensure_open(&self) -> Result<()> {
    match self.state {
      TxState::Open => Ok(()),
      _ => Err(GraphError::ClosedTransaction),
    }
  }

  fn record(&mut self, change: Change) -> usize {
    self.log.push(change);
    self.log.len() - 1
  }

  // ==========================================================================
  // Working set lookups
  // ==========================================================================

  fn node_live(&self, id: NodeId) -> bool {
    match self.nodes.get(&id) {
      Some(pending) => pending.live,
      None => self.base.contains_node(id),
    }
  }

  fn base_edge_count(&self) -> usize {
    self.base.edge_records_len()
  }

  fn edge_live(&self, index: usize) -> bool {
    let base_len = self.base_edge_count();
    if index >= base_len {
      return self
        .new_edges
        .get(index - base_len)
        .is_some_and(|edge| edge.live);
    }
    match self.edges.get(&index) {
      Some(pending) => pending.live,
      None => self
        .base
        .edge_record(index)
        .is_ok_and(|record| record.is_live()),
    }
  }

  /// Live edges `from -> to`, as global record indexes
  fn live_edges_between(&self, from: NodeId, to: NodeId) -> Vec<usize> {
    let base_len = self.base_edge_count();
    let mut found: Vec<usize> = self
      .base
      .out_edges
      .get(&from)
      .map(Vec::as_slice)
      .unwrap_or_default()
      .iter()
      .copied()
      .filter(|&index| {
        self
          .base
          .edge_record(index)
          .is_ok_and(|record| record.to == to)
          && self.edge_live(index)
      })
      .collect();
    found.extend(
      self
        .new_edges
        .iter()
        .enumerate()
        .filter(|(_, edge)| edge.live && edge.from == from && edge.to == to)
        .map(|(pos, _)| base_len + pos),
    );
    found
  }

  fn pending_edge(&mut self, index: usize) -> Result<&mut PendingEdge> {
    let base_len = self.base_edge_count();
    if index >= base_len {
      return self
        .new_edges
        .get_mut(index - base_len)
        .ok_or(GraphError::EdgeIndexNotFound(index));
    }
    if !self.edges.contains_key(&index) {
      let record = self.base.edge_record(index)?;
      self.edges.insert(
        index,
        PendingEdge {
          from: record.from,
          to: record.to,
          live: record.is_live(),
          payload: PayloadChange::Keep,
        },
      );
    }
    self
      .edges
      .get_mut(&index)
      .ok_or(GraphError::EdgeIndexNotFound(index))
  }

  fn pending_node(&mut self, id: NodeId) -> Result<&mut PendingNode> {
    if !self.nodes.contains_key(&id) {
      let index = self
        .base
        .node_index_of(id)
        .ok_or(GraphError::NodeNotFound(id))?;
      self.nodes.insert(
        id,
        PendingNode {
          index: Some(index),
          live: self.base.contains_node(id),
          payload: PayloadChange::Keep,
        },
      );
    }
    self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
  }

  fn kill_edge(&mut self, index: usize) -> Result<()> {
    self.pending_edge(index)?.live = false;
    Ok(())
  }

  fn set_edge_payload(&mut self, index: usize, payload: Option<Payload>, seq: usize) -> Result<()> {
    self.pending_edge(index)?.payload = PayloadChange::Set { payload, seq };
    Ok(())
  }

  // ==========================================================================
  // Staged operations
  // ==========================================================================

  /// Stage a new node; its id is minted immediately
  pub fn add_node(&mut self, data: Option<Payload>) -> Result<NodeId> {
    self.ensure_open()?;
    if let Some(payload) = &data {
      payload.validate()?;
    }
    let id = self.base.max_node_id() + self.new_nodes.len() as NodeId + 1;
    let seq = self.record(Change::AddNode {
      id,
      data: data.clone(),
    });
    self.new_nodes.push(id);
    self.nodes.insert(
      id,
      PendingNode {
        index: None,
        live: true,
        payload: PayloadChange::Set { payload: data, seq },
      },
    );
    Ok(id)
  }

  /// Stage a new edge; returns its 1-based edge id
  pub fn add_edge(&mut self, from: NodeId, to: NodeId, data: Option<Payload>) -> Result<u64> {
    self.ensure_open()?;
    for id in [from, to] {
      if !self.node_live(id) {
        return Err(GraphError::NodeNotFound(id));
      }
    }
    if let Some(payload) = &data {
      payload.validate()?;
    }
    let seq = self.record(Change::AddEdge {
      from,
      to,
      data: data.clone(),
    });
    self.new_edges.push(PendingEdge {
      from,
      to,
      live: true,
      payload: PayloadChange::Set { payload: data, seq },
    });
    Ok((self.base_edge_count() + self.new_edges.len()) as u64)
  }

  /// Stage a soft delete of a node and every edge touching it
  pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
    self.ensure_open()?;
    if !self.node_live(id) {
      return Err(GraphError::NodeNotFound(id));
    }
    self.record(Change::DeleteNode { id });
    self.pending_node(id)?.live = false;

    let mut touching: Vec<usize> = Vec::new();
    for index_map in [&self.base.out_edges, &self.base.in_edges] {
      if let Some(indexes) = index_map.get(&id) {
        touching.extend(indexes.iter().copied());
      }
    }
    let base_len = self.base_edge_count();
    touching.extend(
      self
        .new_edges
        .iter()
        .enumerate()
        .filter(|(_, edge)| edge.from == id || edge.to == id)
        .map(|(pos, _)| base_len + pos),
    );
    for index in touching {
      if self.edge_live(index) {
        self.kill_edge(index)?;
      }
    }
    Ok(())
  }

  /// Stage a soft delete of every live edge `from -> to`
  pub fn delete_edge(&mut self, from: NodeId, to: NodeId) -> Result<()> {
    self.ensure_open()?;
    let matches = self.live_edges_between(from, to);
    if matches.is_empty() {
      return Err(GraphError::EdgeNotFound { from, to });
    }
    self.record(Change::DeleteEdge { from, to });
    for index in matches {
      self.kill_edge(index)?;
    }
    Ok(())
  }

  /// Stage a soft delete of the edge at record `index`
  pub fn delete_edge_at(&mut self, index: usize) -> Result<()> {
    self.ensure_open()?;
    if !self.edge_live(index) {
      return Err(GraphError::EdgeIndexNotFound(index));
    }
    self.record(Change::DeleteEdgeAt { index });
    self.kill_edge(index)
  }

  /// Stage a payload replacement for a node (`None` clears it)
  pub fn update_node(&mut self, id: NodeId, data: Option<Payload>) -> Result<()> {
    self.ensure_open()?;
    if !self.node_live(id) {
      return Err(GraphError::NodeNotFound(id));
    }
    if let Some(payload) = &data {
      payload.validate()?;
    }
    let seq = self.record(Change::UpdateNode {
      id,
      data: data.clone(),
    });
    self.pending_node(id)?.payload = PayloadChange::Set { payload: data, seq };
    Ok(())
  }

  /// Stage a payload replacement for every live edge `from -> to`
  pub fn update_edge(&mut self, from: NodeId, to: NodeId, data: Option<Payload>) -> Result<()> {
    self.ensure_open()?;
    let matches = self.live_edges_between(from, to);
    if matches.is_empty() {
      return Err(GraphError::EdgeNotFound { from, to });
    }
    if let Some(payload) = &data {
      payload.validate()?;
    }
    let seq = self.record(Change::UpdateEdge {
      from,
      to,
      data: data.clone(),
    });
    for index in matches {
      self.set_edge_payload(index, data.clone(), seq)?;
    }
    Ok(())
  }

  /// Stage a payload replacement for the edge at record `index`
  pub fn update_edge_at(&mut self, index: usize, data: Option<Payload>) -> Result<()> {
    self.ensure_open()?;
    if !self.edge_live(index) {
      return Err(GraphError::EdgeIndexNotFound(index));
    }
    if let Some(payload) = &data {
      payload.validate()?;
    }
    let seq = self.record(Change::UpdateEdgeAt {
      index,
      data: data.clone(),
    });
    self.set_edge_payload(index, data, seq)
  }

  /// Stage a replacement metadata record (kind, roots, op wiring)
  pub fn set_metadata(&mut self, metadata: GraphMetadata) -> Result<()> {
    self.ensure_open()?;
    self.record(Change::SetMetadata(metadata.clone()));
    self.metadata = Some(metadata);
    Ok(())
  }

  // ==========================================================================
  // Commit
  // ==========================================================================

  /// Write everything that is not yet referenced by a header
  pub fn prepare(&mut self) -> Result<()> {
    self.ensure_open()?;
    self.store.ensure_open()?;
    match self.write_appends() {
      Ok(prepared) => {
        self.prepared = Some(prepared);
        self.state = TxState::Prepared;
        Ok(())
      }
      Err(err) => {
        self.finish(TxState::RolledBack);
        Err(err)
      }
    }
  }

  /// Apply the transaction; the header flip makes it visible
  pub fn commit(&mut self) -> Result<CommitStats> {
    if self.state == TxState::Open {
      self.prepare()?;
    }
    if self.state != TxState::Prepared {
      return Err(GraphError::ClosedTransaction);
    }
    let prepared = self.prepared.take().ok_or(GraphError::ClosedTransaction)?;
    match self.flip(prepared) {
      Ok(()) => {
        self.finish(TxState::Committed);
        debug!(
          nodes_added = self.stats.nodes_added,
          edges_added = self.stats.edges_added,
          rewritten = self.stats.records_rewritten,
          appended = self.stats.entries_appended,
          in_place = self.stats.entries_in_place,
          "committed transaction"
        );
        Ok(self.stats.clone())
      }
      Err(err) => {
        self.finish(TxState::RolledBack);
        Err(err)
      }
    }
  }

  /// Discard the change log
  pub fn rollback(&mut self) -> Result<()> {
    match self.state {
      TxState::Open | TxState::Prepared => {
        self.finish(TxState::RolledBack);
        trace!(changes = self.log.len(), "rolled back transaction");
        Ok(())
      }
      _ => Err(GraphError::ClosedTransaction),
    }
  }

  /// Steps 1-5: tails, update policy, growth, appended writes, sync
  fn write_appends(&mut self) -> Result<Prepared> {
    let store = self.store;
    let data = store.data_storage.as_ref();
    let base = self.base.clone();
    let base_edges = base.edge_records_len();

    // Payload writes in log order
    let mut writes: Vec<(usize, Target, Option<Payload>)> = Vec::new();
    for (id, pending) in &self.nodes {
      if let PayloadChange::Set { payload, seq } = &pending.payload {
        writes.push((*seq, Target::Node(*id), payload.clone()));
      }
    }
    for (index, pending) in &self.edges {
      if let PayloadChange::Set { payload, seq } = &pending.payload {
        writes.push((*seq, Target::Edge(*index), payload.clone()));
      }
    }
    for (pos, pending) in self.new_edges.iter().enumerate() {
      if let PayloadChange::Set { payload, seq } = &pending.payload {
        writes.push((*seq, Target::Edge(base_edges + pos), payload.clone()));
      }
    }
    writes.sort_by_key(|(seq, _, _)| *seq);

    let data_tail = data.size()?;
    let mut tail = data_tail;
    let mut appended: Vec<u8> = Vec::new();
    let mut appended_count = 0u64;
    let mut in_place_entries: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut offsets: HashMap<Target, u64> = HashMap::new();

    for (_, target, payload) in writes {
      let Some(payload) = payload else {
        offsets.insert(target, 0);
        continue;
      };
      let entry = encode_entry(&payload)?;
      let old_offset = match target {
        Target::Node(id) => base.node_record(id).map(|r| r.data_offset).unwrap_or(0),
        Target::Edge(index) if index < base_edges => base.edge_record(index)?.data_offset as u64,
        Target::Edge(_) => 0,
      };
      if old_offset != 0 && entry.len() as u64 <= entry_total_size(data, old_offset)? {
        in_place_entries.push((old_offset, entry));
        offsets.insert(target, old_offset);
        continue;
      }
      if matches!(target, Target::Edge(_)) && tail > MAX_EDGE_DATA_OFFSET {
        return Err(GraphError::InvalidArgument(format!(
          "edge payload would start at offset {tail}, beyond the 32-bit edge offset range"
        )));
      }
      offsets.insert(target, tail);
      tail += entry.len() as u64;
      appended.extend_from_slice(&entry);
      appended_count += 1;
    }

    let metadata_offset = match &self.metadata {
      Some(metadata) => {
        let entry = encode_entry(&metadata.to_payload())?;
        let offset = tail;
        appended.extend_from_slice(&entry);
        appended_count += 1;
        Some(offset)
      }
      None => None,
    };

    // New records, in minting order
    let mut new_node_records = Vec::with_capacity(self.new_nodes.len());
    let mut new_nodes = Vec::with_capacity(self.new_nodes.len());
    let mut new_live_nodes = 0u64;
    for (pos, id) in self.new_nodes.iter().enumerate() {
      let pending = &self.nodes[id];
      let mut record = NodeRecord::new(*id, offsets.get(&Target::Node(*id)).copied().unwrap_or(0));
      if pending.live {
        new_live_nodes += 1;
      } else {
        record.flags = RecordFlags::deleted();
      }
      new_node_records.push(encode_node_record(&record));
      new_nodes.push((*id, base.node_records_len() + pos));
    }

    let mut new_edge_records = Vec::with_capacity(self.new_edges.len());
    let mut new_edges = Vec::with_capacity(self.new_edges.len());
    let mut new_live_edges = 0u64;
    for (pos, pending) in self.new_edges.iter().enumerate() {
      let index = base_edges + pos;
      let offset = offsets.get(&Target::Edge(index)).copied().unwrap_or(0);
      let mut record = EdgeRecord::new(pending.from, pending.to, offset as u32);
      if pending.live {
        new_live_edges += 1;
      } else {
        record.flags = RecordFlags::deleted();
      }
      new_edge_records.push(encode_edge_record(&record));
      new_edges.push((index, pending.from, pending.to));
    }

    // In-place record rewrites
    let mut node_updates = Vec::new();
    let mut killed_nodes = 0u64;
    for (id, pending) in &self.nodes {
      let Some(index) = pending.index else {
        continue;
      };
      let original = base.nodes.node(index)?;
      let mut record = original.clone();
      if !pending.live && original.is_live() {
        record.flags = RecordFlags::deleted();
        killed_nodes += 1;
      }
      if let Some(offset) = offsets.get(&Target::Node(*id)) {
        record.data_offset = *offset;
      }
      if record != original {
        node_updates.push((index, encode_node_record(&record)));
      }
    }

    let mut edge_updates = Vec::new();
    let mut killed_edges = 0u64;
    for (index, pending) in &self.edges {
      let original = base.edge_record(*index)?;
      let mut record = original.clone();
      if !pending.live && original.is_live() {
        record.flags = RecordFlags::deleted();
        killed_edges += 1;
      }
      if let Some(offset) = offsets.get(&Target::Edge(*index)) {
        record.data_offset = *offset as u32;
      }
      if record != original {
        edge_updates.push((*index, encode_edge_record(&record)));
      }
    }

    // Headers, computed in memory
    let mut node_header = base.node_header().clone();
    node_header.max_id = base.max_node_id() + self.new_nodes.len() as NodeId;
    node_header.count = live_count(node_header.count, killed_nodes, new_live_nodes, "node")?;
    let mut edge_header = base.edge_header().clone();
    edge_header.max_id = (base_edges + self.new_edges.len()) as i64;
    edge_header.count = live_count(edge_header.count, killed_edges, new_live_edges, "edge")?;
    if let (Some(offset), Some(metadata)) = (metadata_offset, &self.metadata) {
      for header in [&mut node_header, &mut edge_header] {
        header.data_file_offset = offset;
        header.set_kind(metadata.graph_kind());
      }
    }
    let mut data_header = base.data_header().clone();
    data_header.entry_count += appended_count;

    // Grow and write everything past the committed tails
    append_records(
      store.node_storage.as_ref(),
      base.node_records_len(),
      &new_node_records,
    )?;
    append_records(store.edge_storage.as_ref(), base_edges, &new_edge_records)?;
    if !appended.is_empty() {
      append_entry(data, data_tail, &appended)?;
    }
    if store.options.syncs() {
      store.node_storage.sync()?;
      store.edge_storage.sync()?;
      data.sync()?;
    }
    trace!(
      new_nodes = new_node_records.len(),
      new_edges = new_edge_records.len(),
      appended_bytes = appended.len(),
      "prepared transaction"
    );

    self.stats = CommitStats {
      nodes_added: new_node_records.len(),
      edges_added: new_edge_records.len(),
      records_rewritten: node_updates.len() + edge_updates.len(),
      entries_appended: appended_count,
      entries_in_place: in_place_entries.len(),
    };

    Ok(Prepared {
      in_place_entries,
      node_updates,
      edge_updates,
      node_header,
      edge_header,
      data_header,
      new_nodes,
      new_edges,
      metadata: self.metadata.clone(),
    })
  }

  /// Steps 6-7: in-place rewrites, then the header flip
  fn flip(&mut self, prepared: Prepared) -> Result<()> {
    let store = self.store;
    store.ensure_open()?;
    let sync = store.options.syncs();
    let node = store.node_storage.as_ref();
    let edge = store.edge_storage.as_ref();
    let data = store.data_storage.as_ref();

    for (offset, entry) in &prepared.in_place_entries {
      overwrite_entry(data, *offset, entry)?;
    }
    for (index, record) in &prepared.node_updates {
      write_record(node, *index, record)?;
    }
    for (index, record) in &prepared.edge_updates {
      write_record(edge, *index, record)?;
    }
    if sync {
      node.sync()?;
      edge.sync()?;
      data.sync()?;
    }

    write_header(node, RecordFile::Nodes, &prepared.node_header, sync)?;
    write_header(edge, RecordFile::Edges, &prepared.edge_header, sync)?;
    write_data_header(data, &prepared.data_header, sync)?;

    let view = self.base.patched(
      node,
      edge,
      &prepared.new_nodes,
      &prepared.new_edges,
      prepared.metadata,
    )?;
    store.install(view);
    Ok(())
  }
}

/// Header count after a commit; a header claiming fewer live records than
/// the transaction kills is corrupt
fn live_count(count: u64, killed: u64, added: u64, kind: &str) -> Result<u64> {
  count
    .checked_sub(killed)
    .and_then(|count| count.checked_add(added))
    .ok_or_else(|| {
      GraphError::InconsistentState(format!(
        "{kind} header counts {count} live records but {killed} are being deleted"
      ))
    })
}

impl Drop for Transaction<'_> {
  fn drop(&mut self) {
    if matches!(self.state, TxState::Open | TxState::Prepared) {
      trace!(changes = self.log.len(), "dropped open transaction, rolling back");
      self.finish(TxState::RolledBack);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::format::open_node_file;
  use crate::core::storage::{FileProvider, MemoryProvider, StorageProvider};
  use crate::core::value::Value;
  use crate::graph::store::{GraphPaths, StoreOptions};
  use crate::types::GraphKind;

  fn empty_store(provider: &MemoryProvider) -> GraphStore {
    GraphStore::create(
      provider,
      &GraphPaths::from_base("tx"),
      GraphKind::Generic,
      StoreOptions::new(),
    )
    .unwrap()
  }

  #[test]
  fn test_add_node_mints_sequential_ids() {
    let provider = MemoryProvider::new();
    let store = empty_store(&provider);
    let mut tx = store.begin().unwrap();
    assert_eq!(tx.add_node(None).unwrap(), 1);
    assert_eq!(tx.add_node(None).unwrap(), 2);
    tx.commit().unwrap();

    let mut tx = store.begin().unwrap();
    assert_eq!(tx.add_node(None).unwrap(), 3);
  }

  #[test]
  fn test_closed_transaction_rejects_operations() {
    let provider = MemoryProvider::new();
    let store = empty_store(&provider);
    let mut tx = store.begin().unwrap();
    tx.add_node(None).unwrap();
    tx.rollback().unwrap();
    assert!(matches!(tx.add_node(None), Err(GraphError::ClosedTransaction)));
    assert!(matches!(tx.commit(), Err(GraphError::ClosedTransaction)));
    assert!(matches!(tx.rollback(), Err(GraphError::ClosedTransaction)));
    drop(tx);
    assert_eq!(store.graph().node_count(), 0);
  }

  #[test]
  fn test_edge_requires_live_endpoints() {
    let provider = MemoryProvider::new();
    let store = empty_store(&provider);
    let mut tx = store.begin().unwrap();
    let a = tx.add_node(None).unwrap();
    assert!(matches!(
      tx.add_edge(a, 42, None),
      Err(GraphError::NodeNotFound(42))
    ));
    let b = tx.add_node(None).unwrap();
    assert_eq!(tx.add_edge(a, b, None).unwrap(), 1);
    tx.delete_node(b).unwrap();
    assert!(matches!(
      tx.delete_edge(a, b),
      Err(GraphError::EdgeNotFound { .. })
    ));
    tx.commit().unwrap();

    let graph = store.graph();
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);
    assert_eq!(graph.edge_records_len(), 1);
    assert_eq!(graph.max_node_id(), 2);
  }

  #[test]
  fn test_readers_keep_pre_commit_view() {
    let provider = MemoryProvider::new();
    let store = empty_store(&provider);
    let before = store.graph();
    let mut tx = store.begin().unwrap();
    let id = tx.add_node(Some(Payload::value(Value::I64(5)))).unwrap();
    tx.commit().unwrap();
    assert!(before.node_by_id(id).is_none());
    let after = store.graph();
    assert_eq!(
      after.node_data(id).unwrap().unwrap().value(),
      Some(Value::I64(5))
    );
  }

  #[test]
  fn test_update_in_log_order_last_wins() {
    let provider = MemoryProvider::new();
    let store = empty_store(&provider);
    let mut tx = store.begin().unwrap();
    let id = tx.add_node(Some(Payload::value(Value::I64(1)))).unwrap();
    tx.update_node(id, Some(Payload::value(Value::I64(2)))).unwrap();
    tx.commit().unwrap();
    assert_eq!(
      store.graph().node_data(id).unwrap().unwrap().value(),
      Some(Value::I64(2))
    );
    assert_eq!(tx.state(), TxState::Committed);
  }

  #[test]
  fn test_set_metadata_moves_both_headers() {
    let provider = MemoryProvider::new();
    let store = empty_store(&provider);
    let mut tx = store.begin().unwrap();
    let root = tx.add_node(None).unwrap();
    let mut metadata = GraphMetadata::for_kind(GraphKind::Tree);
    metadata.root_id = Some(root);
    tx.set_metadata(metadata).unwrap();
    tx.commit().unwrap();

    let graph = store.graph();
    assert_eq!(graph.kind(), GraphKind::Tree);
    assert_eq!(graph.node_header().kind(), GraphKind::Tree);
    assert_eq!(
      graph.node_header().data_file_offset,
      graph.edge_header().data_file_offset
    );
    assert_eq!(graph.metadata().unwrap().root_id, Some(root));
  }

  #[test]
  fn test_terminal_states_release_writer_lock() {
    let provider = MemoryProvider::new();
    let store = empty_store(&provider);
    let mut committed = store.begin().unwrap();
    committed.add_node(None).unwrap();
    committed.commit().unwrap();
    store.defragment().unwrap();

    let mut rolled_back = store.begin().unwrap();
    rolled_back.add_node(None).unwrap();
    rolled_back.rollback().unwrap();

    let mut tx = store.begin().unwrap();
    assert_eq!(tx.add_node(None).unwrap(), 2);
    assert!(matches!(
      store.begin(),
      Err(GraphError::TransactionInProgress)
    ));
    assert_eq!(committed.state(), TxState::Committed);
    assert_eq!(rolled_back.state(), TxState::RolledBack);
  }

  #[test]
  fn test_corrupt_live_count_fails_commit() {
    let provider = MemoryProvider::new();
    let store = GraphStore::create(
      &provider,
      &GraphPaths::from_base("tx"),
      GraphKind::Generic,
      StoreOptions::new().verify_on_open(false),
    )
    .unwrap();
    {
      let mut tx = store.begin().unwrap();
      tx.add_node(None).unwrap();
      tx.commit().unwrap();
    }

    let node = provider.open("tx.nodes.graph", false).unwrap();
    let mut header = open_node_file(node.as_ref()).unwrap().header;
    header.count = 0;
    write_header(node.as_ref(), RecordFile::Nodes, &header, false).unwrap();
    store.reload().unwrap();

    let mut tx = store.begin().unwrap();
    tx.delete_node(1).unwrap();
    assert!(matches!(
      tx.commit(),
      Err(GraphError::InconsistentState(_))
    ));
    assert_eq!(tx.state(), TxState::RolledBack);
    assert!(store.begin().is_ok());
    assert!(store.graph().node_by_id(1).is_some());
  }

  #[test]
  fn test_edge_payload_past_offset_limit_fails() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("wide");
    let store = GraphStore::create(
      &FileProvider::new(),
      &GraphPaths::from_base(base.to_string_lossy()),
      GraphKind::Generic,
      StoreOptions::new(),
    )
    .unwrap();
    {
      let mut tx = store.begin().unwrap();
      tx.add_node(None).unwrap();
      tx.add_node(None).unwrap();
      tx.commit().unwrap();
    }
    // Sparse: only the header pages are ever touched
    store.data_storage.grow(MAX_EDGE_DATA_OFFSET + 1).unwrap();

    let mut tx = store.begin().unwrap();
    tx.add_edge(1, 2, Some(Payload::value(Value::I64(1)))).unwrap();
    assert!(matches!(
      tx.commit(),
      Err(GraphError::InvalidArgument(_))
    ));
    assert_eq!(store.graph().edge_count(), 0);

    let mut tx = store.begin().unwrap();
    tx.add_edge(1, 2, None).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.graph().edge_count(), 1);
  }
}
