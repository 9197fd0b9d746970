//! Program image representation and the read-only code store.
//!
//! [`ProgramImage`] bundles a compiled code segment with its entry offset in
//! a portable, version-tagged container. [`CodeStore`] is the VM-facing view
//! of an installed segment: bounds-checked reads only, with the buffer
//! swappable between frames when the resource side reloads a part.

use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, Encode};
use crate::vm::errors::VmError;
use outworld_derive::BinaryCodec;

/// Magic bytes identifying a serialized program image.
const MAGIC: &[u8; 5] = b"OWPRG";

/// Current program image format version.
const CURRENT_VERSION: Version = Version::new(0, 2, 0);

/// Largest code segment addressable by 16-bit channel offsets.
pub const MAX_SEGMENT_LEN: usize = 0xFFFF;

/// Semantic version for container format compatibility.
///
/// Shared by the program image and the snapshot format (`snapshot`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, BinaryCodec)]
pub(crate) struct Version {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Version {
    /// Creates a new version with the given components.
    pub(crate) const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Compiled code segment plus the offset channel 0 starts from.
#[derive(Debug, Clone, BinaryCodec)]
pub struct ProgramImage {
    /// Offset of the first instruction channel 0 runs at startup.
    pub entry: u16,
    /// Compiled instruction bytecode.
    pub code: Vec<u8>,
}

impl ProgramImage {
    /// Creates an image after validating the segment size.
    pub fn new(entry: u16, code: Vec<u8>) -> Result<Self, VmError> {
        if code.len() > MAX_SEGMENT_LEN {
            return Err(VmError::SegmentTooLarge { len: code.len() });
        }
        Ok(Self { entry, code })
    }

    /// Serializes the image to a portable binary format.
    ///
    /// The output includes a magic header and version for compatibility
    /// checking.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::new();
        MAGIC.encode(&mut out);
        CURRENT_VERSION.encode(&mut out);
        self.encode(&mut out);
        Bytes::from_vec(out)
    }

    /// Deserializes an image from its binary representation.
    ///
    /// Validates the magic header and version, rejecting images from other
    /// (incompatible) format revisions.
    pub fn from_bytes(mut input: &[u8]) -> Result<Self, VmError> {
        if input.len() < MAGIC.len() {
            return Err(VmError::ImageError {
                reason: "truncated".to_string(),
            });
        }

        if &<[u8; 5]>::decode(&mut input).map_err(|_| VmError::ImageError {
            reason: "truncated".to_string(),
        })? != MAGIC
        {
            return Err(VmError::ImageError {
                reason: "bad magic".to_string(),
            });
        }

        if Version::decode(&mut input).map_err(|_| VmError::ImageError {
            reason: "truncated".to_string(),
        })? != CURRENT_VERSION
        {
            return Err(VmError::ImageError {
                reason: "unsupported version".to_string(),
            });
        }

        let image = ProgramImage::decode(&mut input).map_err(|_| VmError::ImageError {
            reason: "malformed body".to_string(),
        })?;
        if !input.is_empty() {
            return Err(VmError::ImageError {
                reason: "trailing bytes".to_string(),
            });
        }
        if image.code.len() > MAX_SEGMENT_LEN {
            return Err(VmError::SegmentTooLarge {
                len: image.code.len(),
            });
        }
        Ok(image)
    }
}

/// Read-only view of the installed code segment.
///
/// Owned logically by the resource collaborator; the VM borrows it for the
/// duration of a frame and never mutates it. Offsets are logical, so a
/// segment swapped in by [`CodeStore::install`] between frames leaves all
/// channel resumption offsets valid (provided the new program uses a
/// compatible layout).
#[derive(Debug, Clone)]
pub struct CodeStore {
    data: Bytes,
}

impl CodeStore {
    /// Wraps a raw segment after validating its size.
    pub fn new(data: Bytes) -> Result<Self, VmError> {
        if data.len() > MAX_SEGMENT_LEN {
            return Err(VmError::SegmentTooLarge { len: data.len() });
        }
        Ok(Self { data })
    }

    /// Builds a store from a program image's code segment.
    pub fn from_image(image: &ProgramImage) -> Result<Self, VmError> {
        Self::new(Bytes::new(image.code.clone()))
    }

    /// Replaces the installed segment (resource reload between frames).
    pub fn install(&mut self, data: Bytes) -> Result<(), VmError> {
        if data.len() > MAX_SEGMENT_LEN {
            return Err(VmError::SegmentTooLarge { len: data.len() });
        }
        self.data = data;
        Ok(())
    }

    /// Returns the segment length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no segment bytes are installed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads one byte, bounds-checked.
    pub fn byte_at(&self, offset: usize) -> Result<u8, VmError> {
        self.data
            .as_slice()
            .get(offset)
            .copied()
            .ok_or(VmError::CodeOutOfBounds {
                offset,
                len: self.data.len(),
            })
    }

    /// Reads a big-endian 16-bit word, bounds-checked.
    pub fn word_at(&self, offset: usize) -> Result<u16, VmError> {
        let hi = self.byte_at(offset)?;
        let lo = self.byte_at(offset + 1)?;
        Ok(u16::from(hi) << 8 | u16::from(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_roundtrip() {
        let image = ProgramImage::new(3, vec![0x00, 0x05, 0x00, 0x2A]).unwrap();
        let bytes = image.to_bytes();
        let decoded = ProgramImage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.entry, 3);
        assert_eq!(decoded.code, vec![0x00, 0x05, 0x00, 0x2A]);
    }

    #[test]
    fn image_roundtrip_empty() {
        let image = ProgramImage::new(0, vec![]).unwrap();
        let decoded = ProgramImage::from_bytes(&image.to_bytes()).unwrap();
        assert!(decoded.code.is_empty());
        assert_eq!(decoded.entry, 0);
    }

    #[test]
    fn image_rejects_truncated() {
        let err = ProgramImage::from_bytes(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, VmError::ImageError { ref reason } if reason == "truncated"));
    }

    #[test]
    fn image_rejects_bad_magic() {
        let err = ProgramImage::from_bytes(b"BADMG\x00\x02\x00").unwrap_err();
        assert!(matches!(err, VmError::ImageError { ref reason } if reason == "bad magic"));
    }

    #[test]
    fn image_rejects_unsupported_version() {
        let mut bytes = Vec::new();
        MAGIC.encode(&mut bytes);
        Version::new(255, 0, 0).encode(&mut bytes);
        let err = ProgramImage::from_bytes(&bytes).unwrap_err();
        assert!(
            matches!(err, VmError::ImageError { ref reason } if reason == "unsupported version")
        );
    }

    #[test]
    fn image_rejects_trailing_bytes() {
        let image = ProgramImage::new(0, vec![0x11]).unwrap();
        let mut bytes = image.to_bytes().to_vec();
        bytes.push(0xFF);
        let err = ProgramImage::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, VmError::ImageError { ref reason } if reason == "trailing bytes"));
    }

    #[test]
    fn image_rejects_oversized_segment() {
        let err = ProgramImage::new(0, vec![0; MAX_SEGMENT_LEN + 1]).unwrap_err();
        assert!(matches!(err, VmError::SegmentTooLarge { len } if len == MAX_SEGMENT_LEN + 1));
    }

    #[test]
    fn image_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.img");
        let image = ProgramImage::new(1, vec![0x11]).unwrap();
        std::fs::write(&path, image.to_bytes().as_slice()).unwrap();
        let raw = std::fs::read(&path).unwrap();
        let decoded = ProgramImage::from_bytes(&raw).unwrap();
        assert_eq!(decoded.entry, 1);
        assert_eq!(decoded.code, vec![0x11]);
    }

    #[test]
    fn store_reads_bytes_and_words() {
        let store = CodeStore::new(Bytes::new(vec![0x12, 0x34, 0x56])).unwrap();
        assert_eq!(store.byte_at(0).unwrap(), 0x12);
        assert_eq!(store.byte_at(2).unwrap(), 0x56);
        // Words are big-endian: first byte is the high half.
        assert_eq!(store.word_at(0).unwrap(), 0x1234);
        assert_eq!(store.word_at(1).unwrap(), 0x3456);
    }

    #[test]
    fn store_bounds_faults() {
        let store = CodeStore::new(Bytes::new(vec![0xAB])).unwrap();
        assert!(matches!(
            store.byte_at(1),
            Err(VmError::CodeOutOfBounds { offset: 1, len: 1 })
        ));
        // A word read straddling the end faults on the missing low byte.
        assert!(matches!(
            store.word_at(0),
            Err(VmError::CodeOutOfBounds { offset: 1, len: 1 })
        ));
    }

    #[test]
    fn store_install_swaps_segment() {
        let mut store = CodeStore::new(Bytes::new(vec![0x01])).unwrap();
        store.install(Bytes::new(vec![0x02, 0x03])).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.byte_at(0).unwrap(), 0x02);
    }

    #[test]
    fn store_rejects_oversized_install() {
        let mut store = CodeStore::new(Bytes::default()).unwrap();
        let err = store
            .install(Bytes::new(vec![0; MAX_SEGMENT_LEN + 1]))
            .unwrap_err();
        assert!(matches!(err, VmError::SegmentTooLarge { .. }));
    }
}
