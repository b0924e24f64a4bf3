//! Defragmentation: drop soft-deleted records and unreferenced entries

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::core::data::entry_total_size;
use crate::error::{GraphError, Result};
use crate::graph::store::GraphStore;
use crate::graph::writer::{edge_image, edge_offset, install_images, node_image, DataImage};
use crate::types::{EdgeRecord, NodeRecord};

/// Outcome of a defragmentation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefragStats {
  pub nodes_kept: usize,
  pub nodes_removed: usize,
  pub edges_kept: usize,
  pub edges_removed: usize,
  pub entries_kept: u64,
  pub data_bytes_before: u64,
  pub data_bytes_after: u64,
}

impl GraphStore {
  /// Rewrite the three files without soft-deleted records or holes
  ///
  /// This operation:
  /// 1. Collects the live node records and the live edges between live nodes
  /// 2. Collects the data offsets those records reference
  /// 3. Copies each referenced entry, in old offset order, into a fresh data image
  /// 4. Packs the node and edge records with their offsets remapped; node ids
  ///    and the node MaxID are kept, the edge MaxID becomes the packed count
  /// 5. Re-appends the metadata entry last, pruned to the surviving nodes
  /// 6. Stages all three images and swaps them in, then reloads the view
  ///
  /// Running it twice in a row leaves the files unchanged.
  pub fn defragment(&self) -> Result<DefragStats> {
    self.ensure_open()?;
    if self.is_read_only() {
      return Err(GraphError::ReadOnly("defragment".to_string()));
    }
    let _guard = self
      .writer
      .try_lock()
      .ok_or(GraphError::TransactionInProgress)?;
    let graph = self.graph();
    let data = self.data_storage.as_ref();
    let data_bytes_before = data.size()?;

    let mut nodes: Vec<NodeRecord> = Vec::with_capacity(graph.node_count() as usize);
    for index in 0..graph.node_records_len() {
      let record = graph.nodes.node(index)?;
      if record.is_live() {
        nodes.push(record);
      }
    }
    let mut edges: Vec<EdgeRecord> = Vec::with_capacity(graph.edge_count() as usize);
    for index in 0..graph.edge_records_len() {
      let record = graph.edge_record(index)?;
      if record.is_live() && graph.contains_node(record.from) && graph.contains_node(record.to) {
        edges.push(record);
      }
    }

    let live_offsets: BTreeSet<u64> = nodes
      .iter()
      .map(|record| record.data_offset)
      .chain(edges.iter().map(|record| record.data_offset as u64))
      .filter(|offset| *offset != 0)
      .collect();

    let mut image = DataImage::new();
    let mut remap: HashMap<u64, u64> = HashMap::with_capacity(live_offsets.len());
    for offset in live_offsets {
      let len = entry_total_size(data, offset)?;
      let entry = data.map(offset, len)?;
      remap.insert(offset, image.push_entry(entry.bytes()));
    }
    let remapped = |offset: u64| -> u64 {
      if offset == 0 {
        0
      } else {
        remap.get(&offset).copied().unwrap_or(0)
      }
    };

    for record in &mut nodes {
      record.data_offset = remapped(record.data_offset);
    }
    for record in &mut edges {
      record.data_offset = edge_offset(remapped(record.data_offset as u64))?;
    }

    let metadata_offset = match graph.metadata() {
      Some(metadata) => {
        let mut metadata = metadata.clone();
        metadata.retain_nodes(|id| graph.contains_node(id));
        image.push_payload(&metadata.to_payload())?
      }
      None => 0,
    };
    let entries_kept = remap.len() as u64;

    let mut node_header = graph.node_header().clone();
    node_header.count = nodes.len() as u64;
    node_header.data_file_offset = metadata_offset;
    let mut edge_header = graph.edge_header().clone();
    edge_header.max_id = edges.len() as i64;
    edge_header.count = edges.len() as u64;
    edge_header.data_file_offset = metadata_offset;

    let node_bytes = node_image(&node_header, &nodes);
    let edge_bytes = edge_image(&edge_header, &edges);
    let data_bytes = image.finish();
    let data_bytes_after = data_bytes.len() as u64;
    install_images(
      self.node_storage.as_ref(),
      self.edge_storage.as_ref(),
      data,
      [&node_bytes, &edge_bytes, &data_bytes],
    )?;
    self.reload()?;

    let stats = DefragStats {
      nodes_kept: nodes.len(),
      nodes_removed: graph.node_records_len() - nodes.len(),
      edges_kept: edges.len(),
      edges_removed: graph.edge_records_len() - edges.len(),
      entries_kept,
      data_bytes_before,
      data_bytes_after,
    };
    debug!(
      nodes_kept = stats.nodes_kept,
      nodes_removed = stats.nodes_removed,
      edges_kept = stats.edges_kept,
      edges_removed = stats.edges_removed,
      data_bytes_before,
      data_bytes_after,
      "defragmented graph"
    );
    Ok(stats)
  }
}
