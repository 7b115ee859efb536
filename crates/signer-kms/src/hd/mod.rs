//! Hierarchical-deterministic identities seeded by one oracle key.
//!
//! ```text
//! oracle.sign(personal_hash(SEED_MESSAGE)) ──► DER bytes ──► entropy
//!        ──► BIP39 mnemonic ──► BIP32 master ──► base_path/index ──► child key
//! ```
//!
//! Only the seed needs the oracle. Every child key is derived and used
//! in-process, and is recomputable at any time from the same oracle key.

use thiserror::Error;

mod node;
mod path;
mod seed;
mod wallet;

pub use node::{derive_child, ChildNode};
pub use path::{BasePath, DEFAULT_BASE_PATH};
pub use seed::{
    derive_seed, entropy_from_seed, master_node, seed_digest, MasterNode, SEED_MESSAGE,
    VALID_ENTROPY_LENGTHS,
};
pub use wallet::{HdIdentity, HdWallet, SeedState};

/// Errors raised while building the HD tree.
#[derive(Debug, Error)]
pub enum DerivationError {
    /// Entropy reached the mnemonic step with a length BIP39 rejects.
    #[error("entropy length {0} is not one of 16, 20, 24, 28, 32")]
    EntropyLengthInvalid(usize),
    /// Malformed derivation path or index.
    #[error("invalid derivation path: {0}")]
    DerivationPath(String),
    /// Mnemonic construction failed.
    #[error("mnemonic error: {0}")]
    Mnemonic(#[from] bip39::Error),
    /// BIP32 master or child derivation failed.
    #[error("bip32 error: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),
    /// Derived scalar is not a usable secp256k1 key.
    #[error("derived child key is invalid")]
    ChildKey,
}
