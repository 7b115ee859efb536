//! Ethereum signer backed by an external KMS key.
//!
//! Exposes:
//! * `signature` — DER → canonical `(r, s, v)` adapter (low-`s`, recovery id search)
//! * `oracle` — the [`SigningOracle`] boundary; `local` and `kms` provide backends
//! * `identity` — [`KmsIdentity`], one oracle key, every signature an oracle call
//! * `hd` — [`HdWallet`], a BIP32 tree seeded by one oracle signature, and its
//!   per-index [`HdIdentity`]
//! * `kms` — [`SignerRegistry`], JSON-configured named signers
//!
//! Every identity implements [`EthSigner`].

pub mod hd;
pub mod identity;
pub mod kms;
pub mod local;
pub mod metrics;
pub mod oracle;
pub mod signature;
pub mod signer;
pub mod util;

pub use hd::{HdIdentity, HdWallet};
pub use identity::KmsIdentity;
pub use kms::{SignerError, SignerRegistry};
pub use local::LocalOracle;
pub use oracle::{OracleError, SigningOracle};
pub use signature::{CanonicalSignature, SignatureError};
pub use signer::EthSigner;
