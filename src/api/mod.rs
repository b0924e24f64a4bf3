//! High-level API

pub mod marshaller;

pub use marshaller::{GraphMarshaller, OpenedGraph};
