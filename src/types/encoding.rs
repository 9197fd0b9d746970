//! Binary encoding and decoding traits for deterministic serialization.
//!
//! The substrate for program images and VM snapshots. All encoded data uses
//! little-endian byte order so that two encodings of the same state compare
//! bytewise. (The *interpreted* code segment keeps its own big-endian operand
//! order; this module only covers the container formats around it.)
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - `usize`: encoded as `u64` for portability
//! - `bool`: single byte (0 = false, 1 = true)
//! - `Vec<T>`/`String`: 8-byte length prefix followed by elements
//! - `Option<T>`: 1-byte tag (0 = None, 1 = Some) followed by value if present
//! - Arrays `[T; N]`: elements serialized sequentially without length prefix

use crate::types::bytes::Bytes;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers so encoding can target an existing buffer
/// without intermediate allocations.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
///
/// Used by `Encode::to_bytes` to pre-allocate exact capacity before encoding.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Bytes {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new byte buffer with exact capacity.
    ///
    /// Performs two passes: first to count bytes, then to encode.
    fn to_bytes(&self) -> Bytes {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Bytes::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    InvalidValue,
    /// Length prefix exceeds maximum allowed size.
    LengthOverflow,
}

/// Trait for types that can be deserialized from binary format.
pub trait Decode: Sized {
    /// Reads and decodes a value from the input buffer.
    ///
    /// Advances the input slice past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    ///
    /// Returns `InvalidValue` if trailing bytes remain after decoding.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }

        Ok(value)
    }
}

/// Reads exactly `n` bytes from the input, advancing the slice.
fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

// u8
impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, 1)?;
        Ok(bytes[0])
    }
}

// Macro for fixed-size integer types
macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let bytes = read_bytes(input, std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_int!(u16, u32, u64, i16, i32, i64);

// usize as u64
impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let v = u64::decode(input)?;
        usize::try_from(v).map_err(|_| DecodeError::LengthOverflow)
    }
}

// bool
impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let b = u8::decode(input)?;
        match b {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// Vec<T>
impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

/// Maximum allowed length for decoded vectors to prevent memory exhaustion.
const MAX_VEC_LEN: usize = 1 << 20;

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_VEC_LEN {
            return Err(DecodeError::LengthOverflow);
        }

        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

// String
impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = Vec::<u8>::decode(input)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidValue)
    }
}

// &str (encode only)
impl Encode for &str {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let bytes = self.as_bytes();
        bytes.len().encode(out);
        out.write(bytes);
    }
}

// Option<T>
impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(v) => {
                1u8.encode(out);
                v.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let tag = u8::decode(input)?;
        match tag {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// Fixed-size arrays [T; N]
impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut vec = Vec::with_capacity(N);
        for _ in 0..N {
            vec.push(T::decode(input)?);
        }
        vec.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== SizeCounter ==========

    #[test]
    fn size_counter_accumulates() {
        let mut counter = SizeCounter::new();
        assert_eq!(counter.len(), 0);

        counter.write(&[1, 2, 3]);
        assert_eq!(counter.len(), 3);

        counter.write(&[4, 5]);
        assert_eq!(counter.len(), 5);
    }

    #[test]
    fn to_bytes_preallocates_exact_capacity() {
        let data: Vec<u8> = vec![1, 2, 3, 4, 5];
        let bytes = data.to_bytes();
        // Vec encodes as: 8-byte length + elements
        assert_eq!(bytes.len(), 8 + 5);
        assert_eq!(bytes.capacity(), bytes.len());
    }

    // ========== Integers ==========

    #[test]
    fn u8_roundtrip() {
        for val in [0u8, 1, 127, 255] {
            let bytes = val.to_bytes();
            assert_eq!(bytes.len(), 1);
            assert_eq!(u8::from_bytes(&bytes).unwrap(), val);
        }
    }

    #[test]
    fn u16_little_endian() {
        let val: u16 = 0x1234;
        let bytes = val.to_bytes();
        assert_eq!(bytes.as_ref(), &[0x34, 0x12]);
        assert_eq!(u16::from_bytes(&bytes).unwrap(), val);
    }

    #[test]
    fn i16_negative_values() {
        let val: i16 = -1;
        let bytes = val.to_bytes();
        assert_eq!(bytes.as_ref(), &[0xFF, 0xFF]);
        assert_eq!(i16::from_bytes(&bytes).unwrap(), val);
    }

    #[test]
    fn u64_roundtrip() {
        for val in [0u64, 1, u64::MAX / 2, u64::MAX] {
            let bytes = val.to_bytes();
            assert_eq!(bytes.len(), 8);
            assert_eq!(u64::from_bytes(&bytes).unwrap(), val);
        }
    }

    // ========== usize ==========

    #[test]
    fn usize_encoded_as_u64() {
        let val: usize = 42;
        let bytes = val.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(usize::from_bytes(&bytes).unwrap(), val);
    }

    // ========== bool ==========

    #[test]
    fn bool_encoding() {
        assert_eq!(false.to_bytes().as_ref(), &[0u8]);
        assert_eq!(true.to_bytes().as_ref(), &[1u8]);
    }

    #[test]
    fn bool_invalid_value() {
        for invalid in [2u8, 128, 255] {
            let result = bool::from_bytes(&[invalid]);
            assert!(matches!(result, Err(DecodeError::InvalidValue)));
        }
    }

    // ========== Vec<T> ==========

    #[test]
    fn vec_encoding_format() {
        let vec: Vec<u8> = vec![0xAA, 0xBB, 0xCC];
        let bytes = vec.to_bytes();

        assert_eq!(&bytes[0..8], &3u64.to_le_bytes());
        assert_eq!(&bytes[8..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn vec_roundtrip() {
        let original: Vec<u32> = vec![1, 2, 3, 4, 5];
        let bytes = original.to_bytes();
        let decoded = Vec::<u32>::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn vec_length_overflow() {
        let huge_len: u64 = (MAX_VEC_LEN as u64) + 1;
        let bytes = huge_len.to_bytes();
        let result = Vec::<u8>::from_bytes(&bytes);
        assert!(matches!(result, Err(DecodeError::LengthOverflow)));
    }

    // ========== String ==========

    #[test]
    fn string_roundtrip() {
        let original = "hello world".to_string();
        let bytes = original.to_bytes();
        let decoded = String::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn string_invalid_utf8() {
        let mut bytes = Vec::new();
        3u64.encode(&mut bytes);
        bytes.extend_from_slice(&[0xFF, 0xFE, 0x00]);

        let result = String::from_bytes(&bytes);
        assert!(matches!(result, Err(DecodeError::InvalidValue)));
    }

    // ========== Option<T> ==========

    #[test]
    fn option_roundtrip() {
        let none: Option<u64> = None;
        assert_eq!(Option::<u64>::from_bytes(&none.to_bytes()).unwrap(), none);

        let some: Option<u64> = Some(42);
        assert_eq!(Option::<u64>::from_bytes(&some.to_bytes()).unwrap(), some);
    }

    #[test]
    fn option_invalid_tag() {
        let invalid = &[2u8, 0, 0, 0, 0];
        let result = Option::<u32>::from_bytes(invalid);
        assert!(matches!(result, Err(DecodeError::InvalidValue)));
    }

    // ========== Fixed-size arrays ==========

    #[test]
    fn array_no_length_prefix() {
        let arr: [u8; 4] = [1, 2, 3, 4];
        let bytes = arr.to_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn array_roundtrip() {
        let original: [i16; 3] = [-1, 0, 32767];
        let bytes = original.to_bytes();
        let decoded = <[i16; 3]>::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    // ========== Error handling ==========

    #[test]
    fn unexpected_eof_empty_input() {
        let result = u32::from_bytes(&[]);
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn unexpected_eof_partial_input() {
        let result = u32::from_bytes(&[0x12, 0x34]);
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn trailing_bytes_error() {
        let bytes = &[42u8, 0xFF, 0xFF];
        let result = u8::from_bytes(bytes);
        assert!(matches!(result, Err(DecodeError::InvalidValue)));
    }

    #[test]
    fn decode_advances_input() {
        let mut input: &[u8] = &[0x01, 0x02, 0x03, 0x04, 0x05];

        let first = u8::decode(&mut input).unwrap();
        assert_eq!(first, 0x01);
        assert_eq!(input.len(), 4);

        let second = u16::decode(&mut input).unwrap();
        assert_eq!(second, 0x0302); // little-endian
        assert_eq!(input.len(), 2);
    }
}
