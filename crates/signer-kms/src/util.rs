//! Shared helpers for turning secp256k1 points into Ethereum addresses.

use alloy_primitives::{keccak256, Address};
use k256::elliptic_curve::sec1::ToEncodedPoint;

/// Length of an uncompressed SEC1 point (`0x04 ‖ X ‖ Y`).
pub const UNCOMPRESSED_POINT_LEN: usize = 65;

/// Derive the Ethereum address of an uncompressed SEC1 point.
///
/// The address is the low 20 bytes of `keccak256(X ‖ Y)`; the `0x04` prefix
/// is not hashed.
pub fn address_from_point(point: &[u8; UNCOMPRESSED_POINT_LEN]) -> Address {
    let hash = keccak256(&point[1..]);
    Address::from_slice(&hash[12..])
}

/// Uncompressed SEC1 encoding of a k256 public key.
pub fn uncompressed_point(key: &k256::PublicKey) -> [u8; UNCOMPRESSED_POINT_LEN] {
    let encoded = key.to_encoded_point(false);
    let mut out = [0u8; UNCOMPRESSED_POINT_LEN];
    out.copy_from_slice(encoded.as_bytes());
    out
}
