//! Wire protocol: framing, addressing, and status vocabulary.

pub mod envelope;
pub mod framing;
pub mod status;

// Re-export common types
pub use envelope::Envelope;
pub use status::{ChunkEncoding, StatusMessage};
