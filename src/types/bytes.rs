//! Reference-counted byte buffer.
//!
//! The resource side hands the VM its compiled code segment as a [`Bytes`]
//! buffer: cloning is cheap (one atomic increment), so the segment can be
//! swapped out between frames without copying while older handles stay valid.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted, immutable byte buffer.
///
/// Wraps `Arc<Vec<u8>>` to provide cheap cloning and shared ownership.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bytes(Arc<Vec<u8>>);

impl Bytes {
    /// Creates a new buffer from any type convertible to `Vec<u8>`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(data.into()))
    }

    /// Creates a new buffer from an existing `Vec<u8>`.
    pub fn from_vec(v: Vec<u8>) -> Self {
        Self(Arc::new(v))
    }

    /// Creates an empty buffer with the specified capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self(Arc::new(Vec::with_capacity(cap)))
    }

    /// Returns the number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the buffer contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Copies the buffer contents into a new `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Appends bytes, copying the buffer first if it is shared.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        Arc::make_mut(&mut self.0).extend_from_slice(bytes);
    }

    /// Returns the buffer capacity.
    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Self::new(s)
    }
}

impl Encode for Bytes {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_slice());
    }
}

impl Decode for Bytes {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let v = Vec::<u8>::decode(input)?;
        Ok(Self::from_vec(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage() {
        let a = Bytes::new(vec![1u8, 2, 3]);
        let b = a.clone();
        assert_eq!(a.as_slice().as_ptr(), b.as_slice().as_ptr());
    }

    #[test]
    fn extend_unshares() {
        let mut a = Bytes::new(vec![1u8, 2]);
        let b = a.clone();
        a.extend_from_slice(&[3]);
        assert_eq!(a.as_slice(), &[1, 2, 3]);
        assert_eq!(b.as_slice(), &[1, 2]);
    }

    #[test]
    fn encode_roundtrip() {
        let a = Bytes::new(vec![9u8, 8, 7]);
        let encoded = a.to_bytes();
        assert_eq!(Bytes::from_bytes(&encoded).unwrap(), a);
    }

    #[test]
    fn deref_slice_ops() {
        let a = Bytes::new(vec![5u8, 6]);
        assert_eq!(a[0], 5);
        assert_eq!(a.len(), 2);
        assert!(!a.is_empty());
    }
}
