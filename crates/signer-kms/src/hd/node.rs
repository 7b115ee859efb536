//! Child keys derived from the master node and used in-process.

use core::fmt;

use alloy_primitives::{Address, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use bitcoin::bip32::DerivationPath;
use k256::ecdsa::SigningKey;

use super::{BasePath, DerivationError, MasterNode};
use crate::signature::CanonicalSignature;
use crate::util::{uncompressed_point, UNCOMPRESSED_POINT_LEN};

/// A derived key at `base_path/index`, held and used in-process.
#[derive(Clone)]
pub struct ChildNode {
    index: u32,
    path: DerivationPath,
    signer: PrivateKeySigner,
}

impl fmt::Debug for ChildNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildNode")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("address", &self.signer.address())
            .finish_non_exhaustive()
    }
}

/// Walk `master` down to `base_path/index`.
///
/// Pure: the same master, base path and index always give the same key.
pub fn derive_child(master: &MasterNode, base_path: &BasePath, index: u32) -> Result<ChildNode, DerivationError> {
    let path = base_path.child(index)?;
    let xpriv = master.derive(&path)?;
    let key = SigningKey::from_slice(&xpriv.private_key.secret_bytes()).map_err(|_| DerivationError::ChildKey)?;
    Ok(ChildNode { index, path, signer: PrivateKeySigner::from_signing_key(key) })
}

impl ChildNode {
    /// Index below the base path.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Full derivation path.
    pub const fn path(&self) -> &DerivationPath {
        &self.path
    }

    /// Address of the child key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// EIP-55 mixed-case checksummed address.
    pub fn checksum_address(&self) -> String {
        self.signer.address().to_checksum(None)
    }

    /// Uncompressed public key (`0x04 ‖ X ‖ Y`).
    pub fn public_key(&self) -> [u8; UNCOMPRESSED_POINT_LEN] {
        uncompressed_point(&k256::PublicKey::from(self.signer.credential().verifying_key()))
    }

    /// Raw 32-byte private key.
    pub fn private_key_material(&self) -> B256 {
        self.signer.to_bytes()
    }

    /// Sign a prehashed digest.
    pub fn sign_hash(&self, digest: &B256) -> Result<CanonicalSignature, alloy_signer::Error> {
        let sig = self.signer.sign_hash_sync(digest)?;
        Ok(CanonicalSignature::from(&sig))
    }

    /// Sign `message` under the EIP-191 prefix.
    pub fn sign_message(&self, message: &[u8]) -> Result<CanonicalSignature, alloy_signer::Error> {
        let sig = self.signer.sign_message_sync(message)?;
        Ok(CanonicalSignature::from(&sig))
    }
}
