//! Boundary to the external signing oracle (a KMS key).
//!
//! An oracle holds one secp256k1 private key and exposes only two calls:
//! sign a 32-byte digest (DER output) and return its public key (DER
//! `SubjectPublicKeyInfo`). Errors are surfaced verbatim and never retried
//! here; retry policy belongs to the oracle client.

use std::time::Instant;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::metrics::METRICS;
use crate::util::{address_from_point, UNCOMPRESSED_POINT_LEN};

/// Errors returned by an oracle or while reading its public key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Transport failure, throttling, timeout or internal service error.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// The oracle refused the request (permissions, disabled key, wrong usage).
    #[error("oracle denied request: {0}")]
    Denied(String),
    /// The returned public key does not end with a valid uncompressed point.
    #[error("malformed oracle public key")]
    MalformedPublicKey,
}

/// External signing oracle bound to one key.
#[async_trait]
pub trait SigningOracle: Send + Sync + 'static {
    /// Identifier of the key inside the oracle (ARN, alias, resource name …).
    fn key_id(&self) -> &str;

    /// Sign a 32-byte digest. Returns a DER `SEQUENCE { INTEGER r, INTEGER s }`.
    async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError>;

    /// DER-encoded `SubjectPublicKeyInfo` of the key.
    async fn public_key(&self) -> Result<Vec<u8>, OracleError>;
}

/// Extract the uncompressed point from a DER `SubjectPublicKeyInfo`.
///
/// The point is the trailing 65 bytes (`0x04 ‖ X ‖ Y`); it must lie on the
/// curve.
pub fn point_from_spki(spki: &[u8]) -> Result<[u8; UNCOMPRESSED_POINT_LEN], OracleError> {
    let start = spki
        .len()
        .checked_sub(UNCOMPRESSED_POINT_LEN)
        .ok_or(OracleError::MalformedPublicKey)?;
    let mut point = [0u8; UNCOMPRESSED_POINT_LEN];
    point.copy_from_slice(&spki[start..]);
    if point[0] != 0x04 || k256::PublicKey::from_sec1_bytes(&point).is_err() {
        return Err(OracleError::MalformedPublicKey);
    }
    Ok(point)
}

/// Ethereum address of a DER `SubjectPublicKeyInfo`.
pub fn address_from_spki(spki: &[u8]) -> Result<Address, OracleError> {
    point_from_spki(spki).map(|point| address_from_point(&point))
}

/// Call `sign_digest` once, recording latency and failures.
pub(crate) async fn timed_sign<O: SigningOracle + ?Sized>(
    oracle: &O,
    digest: B256,
) -> Result<Vec<u8>, OracleError> {
    METRICS.oracle_sign_total.increment(1);
    let start = Instant::now();
    let res = oracle.sign_digest(digest).await;
    METRICS.oracle_sign_latency_seconds.record(start.elapsed().as_secs_f64());
    match &res {
        Ok(raw) => debug!(target: "signer", key_id = oracle.key_id(), %digest, len = raw.len(), "oracle signed digest"),
        Err(err) => {
            METRICS.oracle_sign_failure_total.increment(1);
            debug!(target: "signer", key_id = oracle.key_id(), %digest, %err, "oracle sign failed");
        }
    }
    res
}

/// Call `public_key` once.
pub(crate) async fn fetch_public_key<O: SigningOracle + ?Sized>(
    oracle: &O,
) -> Result<[u8; UNCOMPRESSED_POINT_LEN], OracleError> {
    METRICS.oracle_public_key_total.increment(1);
    let spki = oracle.public_key().await?;
    debug!(target: "signer", key_id = oracle.key_id(), "fetched oracle public key");
    point_from_spki(&spki)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, hex};

    // SPKI of the key `0x…01` (secp256k1 generator point).
    const KEY_ONE_SPKI: [u8; 88] = hex!(
        "3056301006072a8648ce3d020106052b8104000a03420004"
        "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8"
    );

    #[test]
    fn spki_address() {
        assert_eq!(
            address_from_spki(&KEY_ONE_SPKI).unwrap(),
            address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf")
        );
    }

    #[test]
    fn spki_rejects_garbage() {
        assert_eq!(point_from_spki(&KEY_ONE_SPKI[..40]), Err(OracleError::MalformedPublicKey));

        let mut compressed_tag = KEY_ONE_SPKI;
        compressed_tag[23] = 0x02;
        assert_eq!(point_from_spki(&compressed_tag), Err(OracleError::MalformedPublicKey));

        let mut off_curve = KEY_ONE_SPKI;
        off_curve[87] ^= 0x01;
        assert_eq!(point_from_spki(&off_curve), Err(OracleError::MalformedPublicKey));
    }
}
