//! Wire helpers for the coupling byte channels.
//!
//! Conventions (fixed by the existing deployment protocol):
//! - Fixed primitives travel raw in **native endianness**: IEEE-754 `f64`,
//!   two's-complement `i32`. Participants are assumed homogeneous.
//! - Variable-length payloads (strings, arrays) are prefixed by an `i32`
//!   element count.
//! - No magic number, no version tag.

use crate::error::{CouplingError, Result};
use bytemuck::Pod;

/// Reinterpret a typed slice as raw wire bytes.
#[inline]
pub fn to_bytes<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Copy wire bytes back into an owned typed vector.
///
/// Received buffers come out of `Vec<u8>` with no alignment guarantee, so
/// this copies instead of casting in place.
#[inline]
pub fn from_bytes<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytemuck::pod_collect_to_vec(bytes)
}

/// Validate an exact byte length before decoding.
pub fn expect_exact_len(peer: &str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(CouplingError::Protocol {
            peer: peer.to_string(),
            expected: format!("{expected} bytes"),
            got: format!("{actual} bytes"),
        })
    }
}

/// Decode a non-negative `i32` count prefix into a usize.
pub fn decode_count(peer: &str, raw: i32) -> Result<usize> {
    usize::try_from(raw).map_err(|_| CouplingError::Protocol {
        peer: peer.to_string(),
        expected: "non-negative element count".to_string(),
        got: raw.to_string(),
    })
}
