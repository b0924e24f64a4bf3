//! Graph layer: stored views, transactions and whole-file maintenance

pub mod defrag;
pub mod hooks;
pub mod repair;
pub mod store;
pub mod tx;
pub mod view;
pub mod writer;

pub use defrag::DefragStats;
pub use hooks::{DataValue, DecodedMessage, GraphHooks, TypeRegistry};
pub use repair::{repair_graph_header, repair_header};
pub use store::{GraphPaths, GraphStore, StoreOptions, SyncMode};
pub use tx::{Change, CommitStats, Transaction, TxState};
pub use view::{EdgeHandle, NodeHandle, Neighbors, StoredGraph};
pub use writer::{write_graph, GraphBuilder};
