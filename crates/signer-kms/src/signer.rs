//! Signing contract shared by every identity.
//!
//! Two implementors exist: [`KmsIdentity`](crate::identity::KmsIdentity), where
//! each signature is an oracle round-trip through the signature adapter, and
//! [`HdIdentity`](crate::hd::HdIdentity), where the key is an HD child derived
//! in-process from the oracle-seeded master node.
//!
//! Both return the **canonical** 65-byte `r‖s‖v` form with low `s` and
//! `v ∈ {27, 28}`.

use alloy_primitives::{eip191_hash_message, Address, B256};
use async_trait::async_trait;

use crate::kms::SignerError;
use crate::signature::CanonicalSignature;

/// A type that can sign 32-byte digests and expose its Ethereum address.
#[async_trait]
pub trait EthSigner: Send + Sync + 'static {
    /// Returns the 20-byte address of the signing key.
    ///
    /// May hit the oracle on first call; later calls are served from cache.
    async fn address(&self) -> Result<Address, SignerError>;

    /// Signs a prehashed digest (message hash, transaction signing hash …).
    async fn sign_hash(&self, hash: B256) -> Result<CanonicalSignature, SignerError>;

    /// Signs `message` under the EIP-191 personal-message prefix.
    async fn sign_message(&self, message: &[u8]) -> Result<CanonicalSignature, SignerError> {
        self.sign_hash(eip191_hash_message(message)).await
    }
}
