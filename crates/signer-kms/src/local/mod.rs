//! Local oracle backend.
//! WARNING: For development/testing only. Do **not** use in production.
//!
//! Signs with an in-memory secp256k1 key using RFC 6979 deterministic nonces,
//! and answers in the same DER formats a KMS does.

use core::fmt;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use k256::pkcs8::EncodePublicKey;

use crate::kms::SignerError;
use crate::oracle::{OracleError, SigningOracle};
use crate::util::{address_from_point, uncompressed_point};

/// Oracle backed by an in-memory secp256k1 private key.
#[derive(Clone)]
pub struct LocalOracle {
    key: SigningKey,
    key_id: String,
}

impl fmt::Debug for LocalOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalOracle").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

impl LocalOracle {
    /// Wrap an existing signing key.
    pub fn new(key: SigningKey, key_id: impl Into<String>) -> Self {
        Self { key, key_id: key_id.into() }
    }

    /// Parse a hex private key, with or without `0x`. Short keys are
    /// left-padded, so `0x01` is the scalar one.
    pub fn from_hex(pk_hex: &str) -> Result<Self, SignerError> {
        let digits = pk_hex.trim_start_matches("0x");
        if digits.is_empty() || digits.len() > 64 {
            return Err(SignerError::InvalidKey("invalid private key hex".into()));
        }
        let padded = format!("{digits:0>64}");
        let bytes = alloy_primitives::hex::decode(padded)
            .map_err(|_| SignerError::InvalidKey("invalid private key hex".into()))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| SignerError::InvalidKey("private key out of range".into()))?;
        Ok(Self::new(key, "local"))
    }

    /// Address of the wrapped key.
    pub fn address(&self) -> Address {
        address_from_point(&uncompressed_point(&k256::PublicKey::from(self.key.verifying_key())))
    }
}

#[async_trait]
impl SigningOracle for LocalOracle {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError> {
        let sig: Signature = self
            .key
            .sign_prehash(digest.as_slice())
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        Ok(sig.to_der().as_bytes().to_vec())
    }

    async fn public_key(&self) -> Result<Vec<u8>, OracleError> {
        let doc = k256::PublicKey::from(self.key.verifying_key())
            .to_public_key_der()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    use crate::oracle::address_from_spki;

    #[tokio::test]
    async fn short_hex_is_key_one() {
        let oracle = LocalOracle::from_hex("0x01").unwrap();
        let expected = address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
        assert_eq!(oracle.address(), expected);
        assert_eq!(address_from_spki(&oracle.public_key().await.unwrap()).unwrap(), expected);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(LocalOracle::from_hex("0x").is_err());
        assert!(LocalOracle::from_hex("zz").is_err());
        assert!(LocalOracle::from_hex(&"0".repeat(64)).is_err());
        assert!(LocalOracle::from_hex(&"1".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn signatures_are_deterministic() {
        let oracle = LocalOracle::from_hex("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318").unwrap();
        let digest = B256::repeat_byte(0x42);
        let a = oracle.sign_digest(digest).await.unwrap();
        let b = oracle.sign_digest(digest).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], 0x30);
    }
}
