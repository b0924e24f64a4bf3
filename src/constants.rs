//! Magic numbers and layout constants for the graph files

// ============================================================================
// Magic bytes
// ============================================================================

/// Node file magic: "GRAPHND1"
pub const MAGIC_NODES: [u8; 8] = *b"GRAPHND1";

/// Edge file magic: "GRAPHED1"
pub const MAGIC_EDGES: [u8; 8] = *b"GRAPHED1";

/// Data file magic: "GRAPHDT1"
pub const MAGIC_DATA: [u8; 8] = *b"GRAPHDT1";

// ============================================================================
// Versions
// ============================================================================

pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// Fixed sizes
// ============================================================================

/// Every file starts with a 64-byte header
pub const HEADER_SIZE: usize = 64;

/// Node and edge records are both 32 bytes
pub const NODE_RECORD_SIZE: usize = 32;
pub const EDGE_RECORD_SIZE: usize = 32;

/// u32 payload length + u8 tag + u16 name length
pub const ENTRY_HEADER_SIZE: usize = 7;

/// Reserved tail of the node/edge header (byte 0 carries the graph kind)
pub const HEADER_RESERVED_SIZE: usize = 20;

/// Reserved tail of the data header
pub const DATA_HEADER_RESERVED_SIZE: usize = 44;

pub const NODE_RECORD_RESERVED_SIZE: usize = 15;
pub const EDGE_RECORD_RESERVED_SIZE: usize = 11;

// ============================================================================
// Header field offsets (node and edge files)
// ============================================================================

pub const OFFSET_MAGIC: usize = 0;
pub const OFFSET_VERSION: usize = 8;
pub const OFFSET_MAX_ID: usize = 12;
pub const OFFSET_COUNT: usize = 20;
pub const OFFSET_DATA_FILE_OFFSET: usize = 28;
pub const OFFSET_CHECKSUM: usize = 36;
pub const OFFSET_RESERVED: usize = 44;

// ============================================================================
// Data section
// ============================================================================

/// Type name of the graph metadata entry
pub const METADATA_TYPE_NAME: &str = "__graph_metadata__";

/// Longest type name an entry header can describe
pub const MAX_TYPE_NAME_LEN: usize = u16::MAX as usize;

/// Edge records address the data file with 32 bits
pub const MAX_EDGE_DATA_OFFSET: u64 = u32::MAX as u64;

// ============================================================================
// File naming
// ============================================================================

pub const EXT_NODES: &str = ".nodes.graph";
pub const EXT_EDGES: &str = ".edges.graph";
pub const EXT_DATA: &str = ".data.graph";

/// Suffix of the sibling file staged during whole-file replacement
pub const EXT_STAGED: &str = ".staged";

// ============================================================================
// Id space
// ============================================================================

/// First id minted for a fresh graph (0 marks an unwritten record)
pub const INITIAL_NODE_ID: i64 = 1;
