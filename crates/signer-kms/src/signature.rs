//! Signature adapter: KMS DER output to the Ethereum `(r, s, v)` layout.
//!
//! A KMS returns an ASN.1 DER `SEQUENCE { INTEGER r, INTEGER s }` with no
//! low-`s` guarantee and no recovery id. Ethereum wants
//!
//! ```text
//! | r (32 bytes, BE) | s (32 bytes, BE, s <= n/2) | v (27 or 28) |
//! ```
//!
//! The pipeline is `parse_der → normalize(r) → normalize + canonicalize_low_s(s)
//! → find_recovery_id`. Flipping `s` inverts which recovery id is valid, so the
//! recovery search always runs on the canonical `s`.

use core::future::Future;

use alloy_primitives::{uint, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use thiserror::Error;
use tracing::{error, trace};

use crate::metrics::METRICS;
use crate::util::{address_from_point, uncompressed_point};

/// secp256k1 group order `n`.
pub const SECP256K1_N: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// `n / 2`, the largest `s` Ethereum accepts.
pub const SECP256K1_HALF_N: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Recovery ids in the order they are tried.
pub const RECOVERY_CANDIDATES: [u8; 2] = [27, 28];

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

/// Errors raised while adapting a raw signature.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// DER layout does not match `SEQUENCE { INTEGER, INTEGER }`.
    #[error("malformed DER signature: {0}")]
    MalformedSignature(&'static str),
    /// A decoded integer is wider than 32 bytes once its padding is removed.
    #[error("signature component is {0} bytes, expected at most 32")]
    ValueTooLarge(usize),
    /// Neither `v = 27` nor `v = 28` recovers the expected address.
    #[error("no recovery id reconstructs the expected address")]
    RecoveryParameterNotFound,
}

/// A 65-byte Ethereum signature with low `s` and `v ∈ {27, 28}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalSignature {
    /// Big-endian `r`.
    pub r: B256,
    /// Big-endian `s`, always `<= n/2`.
    pub s: B256,
    /// Recovery id, 27 or 28.
    pub v: u8,
}

impl CanonicalSignature {
    /// `r ‖ s ‖ v`.
    pub fn as_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    /// `true` when `v` is 28.
    pub const fn y_parity(&self) -> bool {
        self.v == 28
    }

    /// Convert into the alloy signature type.
    pub fn to_alloy(&self) -> alloy_primitives::Signature {
        alloy_primitives::Signature::new(
            U256::from_be_bytes(self.r.0),
            U256::from_be_bytes(self.s.0),
            self.y_parity(),
        )
    }

    /// Address that signed `digest`, i.e. `ecrecover(digest, r, s, v)`.
    pub fn recover_address(&self, digest: &B256) -> Option<Address> {
        recover_address(digest, &self.r.0, &self.s.0, self.v)
    }
}

impl From<&alloy_primitives::Signature> for CanonicalSignature {
    fn from(sig: &alloy_primitives::Signature) -> Self {
        Self {
            r: B256::from(sig.r().to_be_bytes::<32>()),
            s: B256::from(sig.s().to_be_bytes::<32>()),
            v: 27 + sig.v() as u8,
        }
    }
}

impl From<CanonicalSignature> for [u8; 65] {
    fn from(sig: CanonicalSignature) -> Self {
        sig.as_bytes()
    }
}

/// Outcome of the recovery-id search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// This `v` reconstructs the expected address.
    Found(u8),
    /// No candidate matched.
    NotFound,
}

/// Split a DER signature into its raw `r` and `s` integer bytes.
///
/// Only the structure is validated: tags, and that no declared length runs
/// past the buffer. Returned slices still carry any DER zero padding.
pub fn parse_der(raw: &[u8]) -> Result<(&[u8], &[u8]), SignatureError> {
    if raw.first() != Some(&DER_SEQUENCE) {
        return Err(SignatureError::MalformedSignature("expected SEQUENCE tag"));
    }
    let mut pos = 1;
    let seq_len = match raw.get(pos) {
        Some(&len) if len < 0x80 => {
            pos += 1;
            len as usize
        }
        // Long form with one length octet.
        Some(0x81) => {
            let len = *raw
                .get(pos + 1)
                .ok_or(SignatureError::MalformedSignature("truncated SEQUENCE length"))?;
            pos += 2;
            len as usize
        }
        Some(_) => return Err(SignatureError::MalformedSignature("unsupported SEQUENCE length")),
        None => return Err(SignatureError::MalformedSignature("truncated SEQUENCE length")),
    };
    if pos + seq_len > raw.len() {
        return Err(SignatureError::MalformedSignature("SEQUENCE length exceeds buffer"));
    }

    let r = read_integer(raw, &mut pos)?;
    let s = read_integer(raw, &mut pos)?;
    Ok((r, s))
}

fn read_integer<'a>(raw: &'a [u8], pos: &mut usize) -> Result<&'a [u8], SignatureError> {
    if raw.get(*pos) != Some(&DER_INTEGER) {
        return Err(SignatureError::MalformedSignature("expected INTEGER tag"));
    }
    let len = match raw.get(*pos + 1) {
        Some(&len) if len < 0x80 && len > 0 => len as usize,
        Some(_) => return Err(SignatureError::MalformedSignature("invalid INTEGER length")),
        None => return Err(SignatureError::MalformedSignature("truncated INTEGER length")),
    };
    let start = *pos + 2;
    let end = start + len;
    let bytes = raw
        .get(start..end)
        .ok_or(SignatureError::MalformedSignature("INTEGER length exceeds buffer"))?;
    *pos = end;
    Ok(bytes)
}

/// Strip leading zero bytes and left-pad to 32 bytes.
pub fn normalize(x: &[u8]) -> Result<[u8; 32], SignatureError> {
    let first = x.iter().position(|b| *b != 0).unwrap_or(x.len());
    let value = &x[first..];
    if value.len() > 32 {
        return Err(SignatureError::ValueTooLarge(value.len()));
    }
    let mut out = [0u8; 32];
    out[32 - value.len()..].copy_from_slice(value);
    Ok(out)
}

/// Replace `s` by `n - s` when `s > n/2`.
pub fn canonicalize_low_s(s: [u8; 32]) -> [u8; 32] {
    let value = U256::from_be_bytes(s);
    if value > SECP256K1_HALF_N {
        // s >= n is not a valid scalar; saturating keeps it unrecoverable.
        SECP256K1_N.saturating_sub(value).to_be_bytes::<32>()
    } else {
        s
    }
}

/// `ecrecover`: address recovered from `(r, s, v)` over `digest`.
///
/// Returns `None` when the candidate does not describe a valid point.
pub fn recover_address(digest: &B256, r: &[u8; 32], s: &[u8; 32], v: u8) -> Option<Address> {
    if !RECOVERY_CANDIDATES.contains(&v) {
        return None;
    }
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(r);
    buf[32..].copy_from_slice(s);
    let sig = K256Signature::from_slice(&buf).ok()?;
    let rid = RecoveryId::from_byte(v - 27)?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, rid).ok()?;
    Some(address_from_point(&uncompressed_point(&k256::PublicKey::from(&key))))
}

/// Try `v = 27` then `v = 28` and return the first that recovers `expected`.
pub fn find_recovery_id(digest: &B256, r: &[u8; 32], s: &[u8; 32], expected: Address) -> Recovery {
    for v in RECOVERY_CANDIDATES {
        if recover_address(digest, r, s, v) == Some(expected) {
            return Recovery::Found(v);
        }
    }
    Recovery::NotFound
}

/// Turn a raw DER signature over `digest` into a [`CanonicalSignature`].
pub fn adapt(digest: &B256, raw: &[u8], expected: Address) -> Result<CanonicalSignature, SignatureError> {
    let (r_der, s_der) = parse_der(raw)?;
    let r = normalize(r_der)?;
    let s = normalize(s_der)?;
    let low_s = canonicalize_low_s(s);
    if low_s != s {
        METRICS.low_s_flips_total.increment(1);
        trace!(target: "signer", %digest, "flipped high-s signature");
    }

    match find_recovery_id(digest, &r, &low_s, expected) {
        Recovery::Found(v) => Ok(CanonicalSignature { r: B256::from(r), s: B256::from(low_s), v }),
        Recovery::NotFound => {
            METRICS.recovery_failure_total.increment(1);
            error!(target: "signer", %digest, %expected, "signature does not recover the expected address");
            Err(SignatureError::RecoveryParameterNotFound)
        }
    }
}

/// Run `oracle_sign` once over `digest` and adapt its DER output.
///
/// Oracle failures are returned untouched; adapter failures go through
/// `E: From<SignatureError>`.
pub async fn sign<F, Fut, E>(digest: B256, oracle_sign: F, expected: Address) -> Result<CanonicalSignature, E>
where
    F: FnOnce(B256) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, E>>,
    E: From<SignatureError>,
{
    let raw = oracle_sign(digest).await?;
    Ok(adapt(&digest, &raw, expected)?)
}
