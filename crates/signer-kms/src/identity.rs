//! Single-key identity: one oracle key, every signature is an oracle call.

use core::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::kms::SignerError;
use crate::oracle::{fetch_public_key, timed_sign, SigningOracle};
use crate::signature::{self, CanonicalSignature};
use crate::signer::EthSigner;
use crate::util::{address_from_point, UNCOMPRESSED_POINT_LEN};

/// Ethereum identity wrapping one oracle key.
///
/// Construction does not touch the oracle. The public key and the address
/// are fetched on first use behind a single-initialization cell, so
/// concurrent first callers share one oracle call.
pub struct KmsIdentity<O: ?Sized> {
    oracle: Arc<O>,
    public_key: OnceCell<[u8; UNCOMPRESSED_POINT_LEN]>,
    address: OnceCell<Address>,
}

impl<O: SigningOracle + ?Sized> fmt::Debug for KmsIdentity<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsIdentity")
            .field("key_id", &self.oracle.key_id())
            .field("address", &self.address.get())
            .finish()
    }
}

impl<O: SigningOracle> KmsIdentity<O> {
    /// Wrap an oracle.
    pub fn new(oracle: O) -> Self {
        Self::from_arc(Arc::new(oracle))
    }
}

impl<O: SigningOracle + ?Sized> KmsIdentity<O> {
    /// Wrap a shared oracle.
    pub fn from_arc(oracle: Arc<O>) -> Self {
        Self { oracle, public_key: OnceCell::new(), address: OnceCell::new() }
    }

    /// The underlying oracle.
    pub fn oracle(&self) -> &Arc<O> {
        &self.oracle
    }

    /// Uncompressed public key (`0x04 ‖ X ‖ Y`) of the oracle key.
    pub async fn public_key(&self) -> Result<[u8; UNCOMPRESSED_POINT_LEN], SignerError> {
        let point = self.public_key.get_or_try_init(|| fetch_public_key(&*self.oracle)).await?;
        Ok(*point)
    }

    async fn cached_address(&self) -> Result<Address, SignerError> {
        let address = self
            .address
            .get_or_try_init(|| async {
                let point = self.public_key().await?;
                Ok::<_, SignerError>(address_from_point(&point))
            })
            .await?;
        Ok(*address)
    }
}

#[async_trait]
impl<O: SigningOracle + ?Sized> EthSigner for KmsIdentity<O> {
    async fn address(&self) -> Result<Address, SignerError> {
        self.cached_address().await
    }

    async fn sign_hash(&self, hash: B256) -> Result<CanonicalSignature, SignerError> {
        let expected = self.cached_address().await?;
        let oracle = &self.oracle;
        signature::sign(
            hash,
            |digest| async move { timed_sign(&**oracle, digest).await.map_err(SignerError::from) },
            expected,
        )
        .await
    }
}
