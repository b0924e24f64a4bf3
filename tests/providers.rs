//! Storage providers behind the marshaller

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use graphfile::{
  ArchiveProvider, FileProvider, GraphBuilder, GraphError, GraphKind, GraphMarshaller,
  MemoryProvider, Operations, Payload, StorageProvider, Value,
};
use tempfile::tempdir;

fn tree() -> GraphBuilder {
  let mut builder = GraphBuilder::new(GraphKind::Tree);
  let root = builder.add_node(Some(Payload::value(Value::from("root"))));
  let left = builder.add_node(None);
  let right = builder.add_node(None);
  let leaf = builder.add_node(Some(Payload::value(Value::I32(7))));
  builder.add_edge(root, left, None).unwrap();
  builder.add_edge(root, right, None).unwrap();
  builder.add_edge(left, leaf, None).unwrap();
  builder.set_root(root).unwrap();
  builder
}

/// Marshal `tree()` to real files and pack them into a tar, optionally gzipped
fn archive(dir: &Path, gzip: bool) -> std::path::PathBuf {
  let files = GraphMarshaller::with_base(
    Arc::new(FileProvider::new()),
    dir.join("packed").to_string_lossy(),
  );
  files.marshal(&tree()).unwrap();

  let mut builder = tar::Builder::new(Vec::new());
  for path in [&files.paths().nodes, &files.paths().edges, &files.paths().data] {
    let name = Path::new(path).file_name().unwrap();
    builder
      .append_path_with_name(path, Path::new("graphs").join(name))
      .unwrap();
  }
  let tar_bytes = builder.into_inner().unwrap();

  let target = dir.join(if gzip { "graphs.tar.gz" } else { "graphs.tar" });
  if gzip {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    fs::write(&target, encoder.finish().unwrap()).unwrap();
  } else {
    fs::write(&target, tar_bytes).unwrap();
  }
  target
}

fn assert_tree(marshaller: &GraphMarshaller) {
  let tree = marshaller
    .unmarshal::<(), ()>(&Operations::new())
    .unwrap()
    .into_tree()
    .unwrap();
  assert_eq!(tree.root_id(), 1);
  assert_eq!(tree.node_count(), 4);
  assert_eq!(tree.height(), 2);
  let graph = tree.graph();
  assert_eq!(
    graph.node_data(1).unwrap().unwrap().value(),
    Some(Value::from("root"))
  );
  assert_eq!(graph.node_data(4).unwrap().unwrap().value(), Some(Value::I32(7)));
}

#[test]
fn plain_tar_archive_opens_read_only() {
  let dir = tempdir().unwrap();
  let archive = archive(dir.path(), false);
  let marshaller = GraphMarshaller::with_base(Arc::new(ArchiveProvider::new(&archive)), "graphs/packed");
  assert_tree(&marshaller);

  let store = marshaller.open_store_mut().unwrap();
  assert!(store.is_read_only());
  assert!(matches!(store.begin(), Err(GraphError::ReadOnly(_))));
  assert!(matches!(store.defragment(), Err(GraphError::ReadOnly(_))));
}

#[test]
fn gzip_archive_resolves_by_base_name() {
  let dir = tempdir().unwrap();
  let archive = archive(dir.path(), true);
  let marshaller =
    GraphMarshaller::with_base(Arc::new(ArchiveProvider::new(&archive)), "somewhere/else/packed");
  assert_tree(&marshaller);
}

#[test]
fn archive_missing_entry_fails_open() {
  let dir = tempdir().unwrap();
  let archive = archive(dir.path(), false);
  let marshaller = GraphMarshaller::with_base(Arc::new(ArchiveProvider::new(&archive)), "absent");
  assert!(matches!(
    marshaller.unmarshal::<(), ()>(&Operations::new()),
    Err(GraphError::Storage { .. })
  ));
}

#[test]
fn memory_provider_shares_contents_between_opens() {
  let provider = Arc::new(MemoryProvider::new());
  let marshaller = GraphMarshaller::with_base(provider.clone(), "mem");
  marshaller.marshal(&tree()).unwrap();

  let storage = provider.open("mem.nodes.graph", true).unwrap();
  assert_eq!(storage.size().unwrap(), 64 + 4 * 32);
  assert_tree(&marshaller);

  let store = marshaller.open_store_mut().unwrap();
  let mut tx = store.begin().unwrap();
  let leaf = tx.add_node(None).unwrap();
  tx.add_edge(3, leaf, None).unwrap();
  tx.commit().unwrap();
  store.close().unwrap();

  let reopened = GraphMarshaller::with_base(provider, "mem");
  let tree = reopened
    .unmarshal::<(), ()>(&Operations::new())
    .unwrap()
    .into_tree()
    .unwrap();
  assert_eq!(tree.node_count(), 5);
}

#[test]
fn file_provider_creates_missing_files() {
  let dir = tempdir().unwrap();
  let base = dir.path().join("fresh");
  let marshaller = GraphMarshaller::with_base(Arc::new(FileProvider::new()), base.to_string_lossy());
  marshaller.marshal(&GraphBuilder::new(GraphKind::Generic)).unwrap();
  for path in [&marshaller.paths().nodes, &marshaller.paths().edges] {
    assert_eq!(fs::metadata(path).unwrap().len(), 64);
  }
  let opened = marshaller.unmarshal::<(), ()>(&Operations::new()).unwrap();
  assert_eq!(opened.graph().node_count(), 0);
}
