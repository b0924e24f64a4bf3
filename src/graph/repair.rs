//! Header repair
//!
//! Records are self-describing, so a node or edge header lost to an
//! interrupted flip can be rebuilt from the record array. The metadata offset
//! and graph kind come from the surviving sibling header.

use tracing::{debug, warn};

use crate::constants::{EDGE_RECORD_SIZE, HEADER_SIZE, NODE_RECORD_SIZE};
use crate::core::codec::{decode_edge_record, decode_header, decode_node_record};
use crate::core::format::write_header;
use crate::core::storage::{MappedStorage, StorageProvider};
use crate::error::{GraphError, Result};
use crate::graph::store::GraphPaths;
use crate::types::{RecordFile, RecordHeader};

/// Physical records following the header
fn record_bytes(storage: &dyn MappedStorage) -> Result<Vec<u8>> {
  let size = storage.size()?;
  if size <= HEADER_SIZE as u64 {
    return Ok(Vec::new());
  }
  let whole = (size - HEADER_SIZE as u64) / NODE_RECORD_SIZE as u64 * NODE_RECORD_SIZE as u64;
  if whole == 0 {
    return Ok(Vec::new());
  }
  Ok(storage.map(HEADER_SIZE as u64, whole)?.bytes().to_vec())
}

/// Rebuild the header of `file` from its records and write it back
///
/// The node record array ends at the first zero id, the edge array at the
/// first record without endpoints. Records a failed commit appended before
/// the header flip are kept, since they are indistinguishable from committed
/// ones once the header is gone.
pub fn repair_header(
  target: &dyn MappedStorage,
  sibling: &dyn MappedStorage,
  file: RecordFile,
) -> Result<RecordHeader> {
  let sibling_file = match file {
    RecordFile::Nodes => RecordFile::Edges,
    RecordFile::Edges => RecordFile::Nodes,
  };
  let sibling_header = {
    let region = sibling.map(0, HEADER_SIZE as u64)?;
    decode_header(sibling_file, region.bytes()).map_err(|err| {
      GraphError::InconsistentState(format!(
        "cannot repair the {} header: {} header is unreadable too ({err})",
        file.name(),
        sibling_file.name()
      ))
    })?
  };

  let bytes = record_bytes(target)?;
  let mut header = RecordHeader::new(sibling_header.kind());
  header.data_file_offset = sibling_header.data_file_offset;

  match file {
    RecordFile::Nodes => {
      for chunk in bytes.chunks_exact(NODE_RECORD_SIZE) {
        let record = decode_node_record(chunk)?;
        if record.id == 0 {
          break;
        }
        header.max_id = header.max_id.max(record.id);
        if record.is_live() {
          header.count += 1;
        }
      }
    }
    RecordFile::Edges => {
      for chunk in bytes.chunks_exact(EDGE_RECORD_SIZE) {
        let record = decode_edge_record(chunk)?;
        if record.from == 0 && record.to == 0 {
          break;
        }
        header.max_id += 1;
        if record.is_live() {
          header.count += 1;
        }
      }
    }
  }

  write_header(target, file, &header, true)?;
  warn!(
    file = file.name(),
    max_id = header.max_id,
    count = header.count,
    "rebuilt header from records"
  );
  Ok(header)
}

/// Open the graph at `paths` and rebuild the header of `file`
pub fn repair_graph_header(
  provider: &dyn StorageProvider,
  paths: &GraphPaths,
  file: RecordFile,
) -> Result<RecordHeader> {
  let node = provider.open(&paths.nodes, false)?;
  let edge = provider.open(&paths.edges, false)?;
  let header = match file {
    RecordFile::Nodes => repair_header(node.as_ref(), edge.as_ref(), file)?,
    RecordFile::Edges => repair_header(edge.as_ref(), node.as_ref(), file)?,
  };
  edge.close()?;
  node.close()?;
  debug!(file = file.name(), "repaired graph header");
  Ok(header)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::format::open_edge_file;
  use crate::core::storage::MemoryProvider;
  use crate::graph::store::{GraphStore, StoreOptions};
  use crate::types::GraphKind;

  #[test]
  fn test_rebuild_lost_edge_header() {
    let provider = MemoryProvider::new();
    let paths = GraphPaths::from_base("repair");
    let store =
      GraphStore::create(&provider, &paths, GraphKind::Tree, StoreOptions::new()).unwrap();
    let mut tx = store.begin().unwrap();
    let a = tx.add_node(None).unwrap();
    let b = tx.add_node(None).unwrap();
    let c = tx.add_node(None).unwrap();
    tx.add_edge(a, b, None).unwrap();
    tx.add_edge(a, c, None).unwrap();
    tx.commit().unwrap();
    let mut tx = store.begin().unwrap();
    tx.delete_edge(a, c).unwrap();
    tx.commit().unwrap();
    let expected = store.graph().edge_header().clone();
    store.close().unwrap();

    let edge = provider.open(&paths.edges, false).unwrap();
    edge.write_at(0, &[0u8; 64]).unwrap();
    assert!(open_edge_file(edge.as_ref()).is_err());

    let header = repair_graph_header(&provider, &paths, RecordFile::Edges).unwrap();
    assert_eq!(header.max_id, 2);
    assert_eq!(header.count, 1);
    assert_eq!(header.data_file_offset, expected.data_file_offset);
    assert_eq!(header.kind(), GraphKind::Tree);

    let store = GraphStore::open(&provider, &paths, StoreOptions::new()).unwrap();
    assert_eq!(store.graph().edge_count(), 1);
  }

  #[test]
  fn test_both_headers_lost() {
    let provider = MemoryProvider::new();
    let paths = GraphPaths::from_base("lost");
    GraphStore::create(&provider, &paths, GraphKind::Generic, StoreOptions::new()).unwrap();
    for path in [&paths.nodes, &paths.edges] {
      let storage = provider.open(path, false).unwrap();
      storage.write_at(0, &[0u8; 64]).unwrap();
    }
    assert!(matches!(
      repair_graph_header(&provider, &paths, RecordFile::Nodes),
      Err(GraphError::InconsistentState(_))
    ));
  }
}
