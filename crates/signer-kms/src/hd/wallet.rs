//! [`HdWallet`]: lazily seeded BIP32 tree over one oracle key, and [`HdIdentity`].

use core::fmt;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{derive_child, derive_seed, entropy_from_seed, master_node, BasePath, ChildNode, DerivationError, MasterNode};
use crate::kms::SignerError;
use crate::metrics::METRICS;
use crate::oracle::SigningOracle;
use crate::signature::CanonicalSignature;
use crate::signer::EthSigner;
use crate::util::UNCOMPRESSED_POINT_LEN;

/// Upper bound on cached addresses per wallet.
const ADDRESS_CACHE_LIMIT: usize = 1024;

/// First index past the non-hardened range.
const NORMAL_INDEX_END: u32 = 1 << 31;

/// Whether the master node has been built yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedState {
    /// No oracle call made yet.
    Unresolved,
    /// Master node cached for the wallet's lifetime.
    Resolved,
}

/// HD key tree rooted at one oracle key.
///
/// The master node is resolved on first derivation-dependent call (one oracle
/// signature) and kept until the wallet is dropped. Child keys are derived per
/// call and dropped afterwards; only addresses looked up through
/// [`HdWallet::address`] are cached, up to a fixed bound. Failed resolutions
/// cache nothing.
pub struct HdWallet<O: ?Sized> {
    oracle: Arc<O>,
    base_path: BasePath,
    master: OnceCell<Arc<MasterNode>>,
    addresses: Mutex<HashMap<u32, Address>>,
}

impl<O: SigningOracle + ?Sized> fmt::Debug for HdWallet<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdWallet")
            .field("key_id", &self.oracle.key_id())
            .field("base_path", &self.base_path.to_string())
            .field("state", &self.seed_state())
            .finish_non_exhaustive()
    }
}

impl<O: SigningOracle> HdWallet<O> {
    /// Wallet on the default `m/44'/60'/0'/0` base path.
    pub fn new(oracle: O) -> Self {
        Self::with_base_path(Arc::new(oracle), BasePath::default())
    }
}

impl<O: SigningOracle + ?Sized> HdWallet<O> {
    /// Wallet on a custom base path.
    pub fn with_base_path(oracle: Arc<O>, base_path: BasePath) -> Self {
        Self { oracle, base_path, master: OnceCell::new(), addresses: Mutex::new(HashMap::new()) }
    }

    /// The underlying oracle.
    pub fn oracle(&self) -> &Arc<O> {
        &self.oracle
    }

    /// Base path children hang from.
    pub fn base_path(&self) -> &BasePath {
        &self.base_path
    }

    /// Current seed state.
    pub fn seed_state(&self) -> SeedState {
        if self.master.initialized() {
            SeedState::Resolved
        } else {
            SeedState::Unresolved
        }
    }

    /// Master node, resolving it through the oracle on first call.
    pub async fn master_node(&self) -> Result<Arc<MasterNode>, SignerError> {
        let node = self
            .master
            .get_or_try_init(|| async {
                let seed = derive_seed(&*self.oracle).await?;
                let node = master_node(&entropy_from_seed(&seed))?;
                METRICS.master_node_resolutions_total.increment(1);
                info!(
                    target: "signer",
                    key_id = self.oracle.key_id(),
                    fingerprint = %node.fingerprint(),
                    "resolved HD master node"
                );
                Ok::<_, SignerError>(Arc::new(node))
            })
            .await?;
        Ok(node.clone())
    }

    /// Child node at `index`. Derived on every call; the key is not retained.
    pub async fn child(&self, index: u32) -> Result<ChildNode, SignerError> {
        let master = self.master_node().await?;
        let child = derive_child(&master, &self.base_path, index)?;
        METRICS.child_derivations_total.increment(1);
        debug!(target: "signer", index, address = %child.address(), "derived HD child");
        Ok(child)
    }

    /// Address at `index`, cached after first lookup.
    pub async fn address(&self, index: u32) -> Result<Address, SignerError> {
        let cached = self.address_cache().get(&index).copied();
        if let Some(address) = cached {
            return Ok(address);
        }
        let address = self.child(index).await?.address();
        let mut cache = self.address_cache();
        if cache.len() < ADDRESS_CACHE_LIMIT {
            cache.insert(index, address);
        }
        Ok(address)
    }

    fn address_cache(&self) -> MutexGuard<'_, HashMap<u32, Address>> {
        self.addresses.lock().unwrap_or_else(|poisoned| {
            warn!(target: "signer", key_id = self.oracle.key_id(), "address cache lock poisoned");
            PoisonError::into_inner(poisoned)
        })
    }

    /// EIP-55 checksummed address at `index`.
    pub async fn get_address(&self, index: u32) -> Result<String, SignerError> {
        Ok(self.address(index).await?.to_checksum(None))
    }

    /// Uncompressed public key at `index`.
    pub async fn get_public_key(&self, index: u32) -> Result<[u8; UNCOMPRESSED_POINT_LEN], SignerError> {
        Ok(self.child(index).await?.public_key())
    }

    /// Raw private key at `index`.
    pub async fn get_private_key_material(&self, index: u32) -> Result<B256, SignerError> {
        Ok(self.child(index).await?.private_key_material())
    }

    /// EIP-191 signature of `message` by the key at `index`.
    pub async fn sign_message(&self, index: u32, message: &[u8]) -> Result<CanonicalSignature, SignerError> {
        Ok(self.child(index).await?.sign_message(message)?)
    }

    /// Signature of a transaction signing hash by the key at `index`.
    pub async fn sign_transaction_digest(&self, index: u32, digest: B256) -> Result<CanonicalSignature, SignerError> {
        Ok(self.child(index).await?.sign_hash(&digest)?)
    }

    /// Addresses for `[start_index, start_index + count)`, in order.
    ///
    /// The whole range must be non-hardened; it is checked before the oracle
    /// is touched. Batch results do not enter the address cache.
    pub async fn batch_addresses(&self, count: u32, start_index: u32) -> Result<Vec<String>, SignerError> {
        match start_index.checked_add(count) {
            Some(end) if end <= NORMAL_INDEX_END => {}
            _ => {
                return Err(DerivationError::DerivationPath(format!(
                    "indices {start_index}..{start_index}+{count} leave the non-hardened range"
                ))
                .into())
            }
        }
        let mut out = Vec::with_capacity(count.min(ADDRESS_CACHE_LIMIT as u32) as usize);
        for index in start_index..start_index + count {
            out.push(self.child(index).await?.checksum_address());
        }
        Ok(out)
    }

    /// Identity bound to `index`, sharing this wallet's master node.
    pub fn identity(self: &Arc<Self>, index: u32) -> HdIdentity<O> {
        HdIdentity { wallet: self.clone(), index }
    }
}

/// HD child identity: one wallet plus an index.
pub struct HdIdentity<O: ?Sized> {
    wallet: Arc<HdWallet<O>>,
    index: u32,
}

impl<O: SigningOracle + ?Sized> fmt::Debug for HdIdentity<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdIdentity").field("wallet", &self.wallet).field("index", &self.index).finish()
    }
}

impl<O: ?Sized> Clone for HdIdentity<O> {
    fn clone(&self) -> Self {
        Self { wallet: self.wallet.clone(), index: self.index }
    }
}

impl<O: SigningOracle + ?Sized> HdIdentity<O> {
    /// Index below the wallet's base path.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Owning wallet.
    pub fn wallet(&self) -> &Arc<HdWallet<O>> {
        &self.wallet
    }
}

#[async_trait]
impl<O: SigningOracle + ?Sized> EthSigner for HdIdentity<O> {
    async fn address(&self) -> Result<Address, SignerError> {
        self.wallet.address(self.index).await
    }

    async fn sign_hash(&self, hash: B256) -> Result<CanonicalSignature, SignerError> {
        self.wallet.sign_transaction_digest(self.index, hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::local::LocalOracle;
    use crate::oracle::OracleError;

    #[derive(Debug)]
    struct FlakyOracle {
        inner: LocalOracle,
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl SigningOracle for FlakyOracle {
        fn key_id(&self) -> &str {
            "flaky"
        }

        async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_first && call == 0 {
                return Err(OracleError::Unavailable("throttled".into()));
            }
            self.inner.sign_digest(digest).await
        }

        async fn public_key(&self) -> Result<Vec<u8>, OracleError> {
            self.inner.public_key().await
        }
    }

    fn flaky(fail_first: bool) -> FlakyOracle {
        FlakyOracle { inner: LocalOracle::from_hex("0x2a").unwrap(), calls: AtomicUsize::new(0), fail_first }
    }

    #[tokio::test]
    async fn resolves_once() {
        let wallet = HdWallet::new(flaky(false));
        assert_eq!(wallet.seed_state(), SeedState::Unresolved);

        let a = wallet.get_address(0).await.unwrap();
        assert_eq!(wallet.seed_state(), SeedState::Resolved);
        let b = wallet.get_address(1).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(wallet.oracle().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_resolution_caches_nothing() {
        let wallet = HdWallet::new(flaky(true));
        let err = wallet.get_address(0).await.unwrap_err();
        assert!(matches!(err, SignerError::Oracle(OracleError::Unavailable(_))));
        assert_eq!(wallet.seed_state(), SeedState::Unresolved);

        wallet.get_address(0).await.unwrap();
        assert_eq!(wallet.seed_state(), SeedState::Resolved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_signs_once() {
        let wallet = Arc::new(HdWallet::new(flaky(false)));
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let wallet = wallet.clone();
                tokio::spawn(async move { wallet.get_address(i).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(wallet.oracle().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identity_signs_with_child_key() {
        let wallet = Arc::new(HdWallet::new(flaky(false)));
        let identity = wallet.identity(4);
        let digest = B256::repeat_byte(0x5a);
        let sig = identity.sign_hash(digest).await.unwrap();
        assert_eq!(sig.recover_address(&digest), Some(identity.address().await.unwrap()));
        assert_eq!(identity.address().await.unwrap().to_checksum(None), wallet.get_address(4).await.unwrap());
    }

    #[tokio::test]
    async fn batch_overflow_is_rejected() {
        let wallet = HdWallet::new(flaky(false));
        let err = wallet.batch_addresses(2, u32::MAX).await.unwrap_err();
        assert!(matches!(err, SignerError::Derivation(DerivationError::DerivationPath(_))));
    }

    #[tokio::test]
    async fn batch_past_normal_range_fails_before_signing() {
        let wallet = HdWallet::new(flaky(false));
        for (count, start) in [(u32::MAX, 1 << 31), (2, (1 << 31) - 1), (1, 1 << 31)] {
            let err = wallet.batch_addresses(count, start).await.unwrap_err();
            assert!(matches!(err, SignerError::Derivation(DerivationError::DerivationPath(_))));
        }
        assert_eq!(wallet.seed_state(), SeedState::Unresolved);
        assert_eq!(wallet.oracle().calls.load(Ordering::SeqCst), 0);

        let last = wallet.batch_addresses(1, (1 << 31) - 1).await.unwrap();
        assert_eq!(last.len(), 1);
    }

    #[tokio::test]
    async fn batch_leaves_address_cache_empty() {
        let wallet = HdWallet::new(flaky(false));
        let batch = wallet.batch_addresses(500, 0).await.unwrap();
        assert_eq!(batch.len(), 500);
        assert!(wallet.addresses.lock().unwrap().is_empty());

        assert_eq!(wallet.get_address(3).await.unwrap(), batch[3]);
        assert_eq!(wallet.addresses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn address_cache_is_bounded() {
        let wallet = HdWallet::new(flaky(false));
        let extra = 8;
        for index in 0..(ADDRESS_CACHE_LIMIT as u32 + extra) {
            wallet.address(index).await.unwrap();
        }
        assert_eq!(wallet.addresses.lock().unwrap().len(), ADDRESS_CACHE_LIMIT);

        let past = wallet.address(ADDRESS_CACHE_LIMIT as u32 + 1).await.unwrap();
        let fresh = HdWallet::new(flaky(false)).address(ADDRESS_CACHE_LIMIT as u32 + 1).await.unwrap();
        assert_eq!(past, fresh);
    }

    #[tokio::test]
    async fn poisoned_cache_keeps_serving() {
        let wallet = Arc::new(HdWallet::new(flaky(false)));
        let first = wallet.get_address(1).await.unwrap();

        let holder = wallet.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.addresses.lock().unwrap();
            panic!("panic while holding the address cache");
        })
        .join();
        assert!(wallet.addresses.is_poisoned());

        assert_eq!(wallet.get_address(1).await.unwrap(), first);
        wallet.get_address(2).await.unwrap();
        assert_eq!(wallet.address_cache().len(), 2);
    }
}
