//! Shared primitive types: byte buffers and the binary codec.

pub mod bytes;
pub mod encoding;
