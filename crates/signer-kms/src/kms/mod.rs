#![allow(missing_docs)]
//! KMS-backed and local signers registry.
//!
//! Every configured key becomes an [`EthSigner`]: either a single-key
//! [`KmsIdentity`] or, when an `hd` block is present, an
//! [`HdIdentity`](crate::hd::HdIdentity) at the
//! configured index.
//!
//! Use [`SignerRegistry::from_config`] to load a JSON configuration at runtime.

use core::fmt;
use std::{collections::HashMap, fs, path::Path, sync::Arc};

use serde::Deserialize;
use tracing::{info, warn};

use crate::hd::{BasePath, DerivationError, HdWallet, DEFAULT_BASE_PATH};
use crate::identity::KmsIdentity;
use crate::local::LocalOracle;
use crate::oracle::{OracleError, SigningOracle};
use crate::signature::SignatureError;
use crate::signer::EthSigner;

#[cfg(feature = "aws")]
mod aws;
#[cfg(feature = "aws")]
pub use aws::AwsKmsOracle;

/// Top-level error of this crate.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown backend '{0}' (feature disabled)")]
    UnknownBackend(String),
    #[error("key '{0}' not found in registry")]
    KeyNotFound(String),
    #[error("duplicate key name '{0}' in config file")]
    DuplicateKey(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error("local signing failed: {0}")]
    LocalSigning(#[from] alloy_signer::Error),
}

// === Config parsing ========================================================
#[derive(Debug, Deserialize)]
struct SignerFile {
    default_key: String,
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    name: String,
    /// Present for HD identities.
    #[serde(default)]
    hd: Option<HdConfig>,
    #[serde(flatten)]
    cfg: KeyConfig,
}

#[derive(Debug, Deserialize)]
struct HdConfig {
    #[serde(default = "default_base_path")]
    base_path: String,
    #[serde(default)]
    index: u32,
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
enum KeyConfig {
    /// Key held on this host. Dev/test only.
    Local {
        /// Raw hex string (0x…)
        #[serde(default)]
        private_key_hex: Option<String>,
        /// Name of an env var that contains the hex key
        #[serde(default)]
        env_var: Option<String>,
    },
    #[cfg(feature = "aws")]
    Aws {
        region: String,
        key_id: String,
    },
    #[cfg(not(feature = "aws"))]
    #[serde(other)]
    Unsupported,
}

impl KeyConfig {
    async fn build_oracle(self, name: &str) -> Result<Arc<dyn SigningOracle>, SignerError> {
        match self {
            Self::Local { private_key_hex, env_var } => {
                let pk_hex = match (private_key_hex, env_var) {
                    (Some(hex), _) => hex,
                    (None, Some(var)) => std::env::var(&var)
                        .map_err(|_| SignerError::InvalidKey(format!("env var {var} is not set")))?,
                    (None, None) => return Err(SignerError::InvalidKey("no local key provided".into())),
                };
                warn!(target: "signer", "Using local key '{name}' — DO NOT use in production");
                Ok(Arc::new(LocalOracle::from_hex(&pk_hex)?))
            }
            #[cfg(feature = "aws")]
            Self::Aws { region, key_id } => Ok(Arc::new(AwsKmsOracle::new(region, key_id).await)),
            #[cfg(not(feature = "aws"))]
            Self::Unsupported => Err(SignerError::UnknownBackend(name.to_owned())),
        }
    }
}

impl KeyEntry {
    async fn build_signer(self) -> Result<Arc<dyn EthSigner>, SignerError> {
        let oracle = self.cfg.build_oracle(&self.name).await?;
        let signer: Arc<dyn EthSigner> = match self.hd {
            Some(hd) => {
                let base_path = BasePath::parse(&hd.base_path)?;
                let wallet = Arc::new(HdWallet::with_base_path(oracle, base_path));
                Arc::new(wallet.identity(hd.index))
            }
            None => Arc::new(KmsIdentity::from_arc(oracle)),
        };
        Ok(signer)
    }
}

// === Registry ==============================================================

/// Holds a map of signers keyed by name.
pub struct SignerRegistry {
    signers: HashMap<String, Arc<dyn EthSigner>>,
    default: String,
}

impl fmt::Debug for SignerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&String> = self.signers.keys().collect();
        f.debug_struct("SignerRegistry")
            .field("keys", &keys)
            .field("default", &self.default)
            .finish()
    }
}

impl SignerRegistry {
    /// Load the registry from a JSON configuration file.
    pub async fn from_config(path: impl AsRef<Path>) -> Result<Self, SignerError> {
        let text = fs::read_to_string(&path)?;
        let registry = Self::from_json(&text).await?;
        info!(target: "signer", "Loaded {} signer(s) from {:?}", registry.signers.len(), path.as_ref());
        Ok(registry)
    }

    /// Build the registry from a JSON document.
    ///
    /// No oracle is contacted here; identities resolve lazily.
    pub async fn from_json(text: &str) -> Result<Self, SignerError> {
        let file: SignerFile = serde_json::from_str(text)?;

        let mut signers: HashMap<String, Arc<dyn EthSigner>> = HashMap::with_capacity(file.keys.len());
        for entry in file.keys {
            if signers.contains_key(&entry.name) {
                return Err(SignerError::DuplicateKey(entry.name));
            }
            let name = entry.name.clone();
            let signer = entry.build_signer().await?;
            signers.insert(name, signer);
        }

        if !signers.contains_key(&file.default_key) {
            return Err(SignerError::KeyNotFound(file.default_key));
        }
        Ok(Self { signers, default: file.default_key })
    }

    /// Returns the requested signer or the default one if `name` is `None`.
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn EthSigner>, SignerError> {
        let key = name.unwrap_or(&self.default);
        self.signers
            .get(key)
            .cloned()
            .ok_or_else(|| SignerError::KeyNotFound(key.to_owned()))
    }

    /// Configured signer names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.signers.keys().map(String::as_str)
    }
}
