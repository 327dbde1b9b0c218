//! Fixed, versioned, little-endian wire types for dispatch and collective paths.
//!
//! Every logical message travels as two transport messages on the same tag: a
//! [`WireHdr`] announcing kind and payload length, then the payload itself. Payloads
//! are either `bincode`-encoded serde values or packed little-endian `f64` words.

use bytemuck::{Pod, Zeroable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::dispatch_error::DispatchError;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Dispatch envelope (coordinator → worker).
pub const KIND_ENVELOPE: u16 = 1;
/// Completion status (worker → coordinator).
pub const KIND_ACK: u16 = 2;
/// Packed `f64` words.
pub const KIND_SCALARS: u16 = 3;
/// Arbitrary serde value.
pub const KIND_VALUE: u16 = 4;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), DispatchError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DispatchError::Wire(format!(
            "expected {expected} bytes, got {actual}"
        )))
    }
}

/// Frame header. All multi-byte integers are stored pre-LE with `.to_le()`.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct WireHdr {
    pub version_le: u16, // = WIRE_VERSION.to_le()
    pub kind_le: u16,
    pub len_le: u32, // payload bytes that follow
}

const_assert_eq!(size_of::<WireHdr>(), 8);

impl WireHdr {
    pub fn new(kind: u16, len: usize) -> Result<Self, DispatchError> {
        let len = u32::try_from(len)
            .map_err(|_| DispatchError::Wire(format!("payload of {len} bytes is too large")))?;
        Ok(Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            len_le: len.to_le(),
        })
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn len(&self) -> usize {
        u32::from_le(self.len_le) as usize
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode and check version and kind.
    pub fn decode(bytes: &[u8], expected_kind: u16) -> Result<Self, DispatchError> {
        expect_exact_len(bytes.len(), size_of::<WireHdr>())?;
        let mut hdr = WireHdr::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut hdr)).copy_from_slice(bytes);
        if hdr.version() != WIRE_VERSION {
            return Err(DispatchError::Wire(format!(
                "wire version {} does not match local version {WIRE_VERSION}",
                hdr.version()
            )));
        }
        if hdr.kind() != expected_kind {
            return Err(DispatchError::Wire(format!(
                "expected frame kind {expected_kind}, got {}",
                hdr.kind()
            )));
        }
        Ok(hdr)
    }
}

/// Pack `f64` values as little-endian IEEE-754 words.
pub fn encode_f64s(values: &[f64]) -> Vec<u8> {
    let words: Vec<u64> = values.iter().map(|x| x.to_bits().to_le()).collect();
    cast_slice(&words).to_vec()
}

/// Inverse of [`encode_f64s`].
pub fn decode_f64s(bytes: &[u8]) -> Result<Vec<f64>, DispatchError> {
    if bytes.len() % size_of::<u64>() != 0 {
        return Err(DispatchError::Wire(format!(
            "{} bytes is not a whole number of f64 words",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(size_of::<u64>())
        .map(|w| {
            let mut word = [0u8; 8];
            word.copy_from_slice(w);
            f64::from_bits(u64::from_le_bytes(word))
        })
        .collect())
}

pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, DispatchError> {
    Ok(bincode::serialize(value)?)
}

pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DispatchError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_checks_version_and_kind() {
        let hdr = WireHdr::new(KIND_ACK, 12).unwrap();
        let bytes = cast_slice(std::slice::from_ref(&hdr)).to_vec();
        let back = WireHdr::decode(&bytes, KIND_ACK).unwrap();
        assert_eq!(back.len(), 12);
        assert!(WireHdr::decode(&bytes, KIND_ENVELOPE).is_err());

        let mut stale = hdr;
        stale.version_le = (WIRE_VERSION + 1).to_le();
        let bytes = cast_slice(std::slice::from_ref(&stale)).to_vec();
        assert!(WireHdr::decode(&bytes, KIND_ACK).is_err());
    }

    #[test]
    fn header_rejects_short_input() {
        assert!(WireHdr::decode(&[1, 0, 2], KIND_ACK).is_err());
    }

    #[test]
    fn f64_words_preserve_bits() {
        let values = [0.1, -0.0, f64::MAX, 1e-300];
        let back = decode_f64s(&encode_f64s(&values)).unwrap();
        for (a, b) in values.iter().zip(&back) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert!(decode_f64s(&[0u8; 7]).is_err());
    }

    #[test]
    fn f64_words_decode_from_unaligned_slices() {
        let mut buf = vec![0xAAu8];
        buf.extend_from_slice(&encode_f64s(&[1.5, -2.25]));
        assert_eq!(decode_f64s(&buf[1..]).unwrap(), vec![1.5, -2.25]);
        assert_eq!(decode_f64s(&[]).unwrap(), Vec::<f64>::new());
    }
}
