//! Storage layer: byte codec, mapped storage, format, data section

pub mod codec;
pub mod data;
pub mod format;
pub mod metadata;
pub mod storage;
pub mod value;
