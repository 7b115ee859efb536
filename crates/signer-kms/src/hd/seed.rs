//! Oracle signature → BIP39 entropy → BIP32 master node.
//!
//! The raw DER bytes of one oracle signature over a fixed message are the
//! seed material. The master node, and every address below it, is therefore
//! only stable if the oracle signs deterministically (RFC 6979 nonces) for a
//! fixed key and message. A KMS that randomizes `k` would produce a new tree
//! on every resolution; confirm this property for a given oracle before
//! relying on HD addresses.

use core::fmt;

use alloy_primitives::{eip191_hash_message, keccak256, B256};
use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Fingerprint, Xpriv};
use bitcoin::secp256k1::{Secp256k1, SignOnly};
use bitcoin::NetworkKind;

use super::DerivationError;
use crate::oracle::{timed_sign, OracleError, SigningOracle};

/// Label signed once to seed the HD tree. Changing it changes every HD
/// address, so it is fixed forever.
pub const SEED_MESSAGE: &str = "signer-kms hd seed v1";

/// Entropy sizes BIP39 accepts, in bytes.
pub const VALID_ENTROPY_LENGTHS: [usize; 5] = [16, 20, 24, 28, 32];

/// EIP-191 personal-message hash of [`SEED_MESSAGE`].
pub fn seed_digest() -> B256 {
    eip191_hash_message(SEED_MESSAGE)
}

/// Ask the oracle to sign [`seed_digest`] and return the DER bytes untouched.
pub async fn derive_seed<O: SigningOracle + ?Sized>(oracle: &O) -> Result<Vec<u8>, OracleError> {
    timed_sign(oracle, seed_digest()).await
}

/// Fit `seed` to a BIP39 entropy length.
///
/// Seeds of a valid length are used as-is; anything else (DER signatures are
/// 70–72 bytes) is keccak-256 hashed to 32 bytes.
pub fn entropy_from_seed(seed: &[u8]) -> Vec<u8> {
    if VALID_ENTROPY_LENGTHS.contains(&seed.len()) {
        seed.to_vec()
    } else {
        keccak256(seed).to_vec()
    }
}

/// Build the master node for `entropy` (mnemonic, empty passphrase, BIP32).
pub fn master_node(entropy: &[u8]) -> Result<MasterNode, DerivationError> {
    MasterNode::from_entropy(entropy)
}

/// Root of the HD tree. Never serialized; `Debug` shows the fingerprint only.
pub struct MasterNode {
    xpriv: Xpriv,
    secp: Secp256k1<SignOnly>,
}

impl MasterNode {
    /// See [`master_node`].
    pub fn from_entropy(entropy: &[u8]) -> Result<Self, DerivationError> {
        if !VALID_ENTROPY_LENGTHS.contains(&entropy.len()) {
            return Err(DerivationError::EntropyLengthInvalid(entropy.len()));
        }
        let mnemonic = Mnemonic::from_entropy(entropy)?;
        let seed = mnemonic.to_seed("");
        let xpriv = Xpriv::new_master(NetworkKind::Main, &seed)?;
        Ok(Self { xpriv, secp: Secp256k1::signing_only() })
    }

    /// BIP32 fingerprint of the master key.
    pub fn fingerprint(&self) -> Fingerprint {
        self.xpriv.fingerprint(&self.secp)
    }

    pub(crate) fn derive(&self, path: &DerivationPath) -> Result<Xpriv, DerivationError> {
        Ok(self.xpriv.derive_priv(&self.secp, path)?)
    }
}

impl fmt::Debug for MasterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterNode").field("fingerprint", &self.fingerprint()).finish_non_exhaustive()
    }
}
