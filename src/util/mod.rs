//! Utility modules

pub mod binary;
