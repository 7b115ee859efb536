//! AWS KMS-backed secp256k1 oracle.
//!
//! Enabled with the `aws` crate feature. Relies on the async `aws-sdk-kms`.
//! The key must be an `ECC_SECG_P256K1` key with `SIGN_VERIFY` usage. Digests
//! are sent with `MessageType::Digest` so KMS signs them as-is.
#![cfg(feature = "aws")]

use core::fmt;
use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_kms as kms;
use kms::config::Region as AwsRegion;
use kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use kms::primitives::Blob;
use kms::types::{MessageType, SigningAlgorithmSpec};
use kms::Client;
use tracing::info;

use crate::oracle::{OracleError, SigningOracle};

/// Service error codes meaning "this key will not sign for you".
const DENIED_CODES: &[&str] = &[
    "AccessDeniedException",
    "DisabledException",
    "NotFoundException",
    "KMSInvalidStateException",
    "InvalidKeyUsageException",
    "InvalidGrantTokenException",
];

fn classify<E, R>(err: SdkError<E, R>) -> OracleError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    let denied = err.code().is_some_and(|code| DENIED_CODES.contains(&code));
    let msg = DisplayErrorContext(&err).to_string();
    if denied {
        OracleError::Denied(msg)
    } else {
        OracleError::Unavailable(msg)
    }
}

/// AWS oracle instance.
#[derive(Clone)]
pub struct AwsKmsOracle {
    client: Arc<Client>,
    key_id: String,
}

impl fmt::Debug for AwsKmsOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsKmsOracle").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

impl AwsKmsOracle {
    /// Build a new oracle.
    ///
    /// * `region` – AWS region, e.g. `us-east-1`.
    /// * `key_id` – KMS key ID, ARN or alias.
    ///
    /// Credentials come from the default provider chain. No request is sent
    /// until the first signature or public-key lookup.
    pub async fn new(region: String, key_id: String) -> Self {
        let region_provider = RegionProviderChain::first_try(Some(AwsRegion::new(region)))
            .or_default_provider();
        let cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        info!(target: "signer", "Initialized AWS KMS oracle for key {key_id}");
        Self::from_client(Client::new(&cfg), key_id)
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client, key_id: String) -> Self {
        Self { client: Arc::new(client), key_id }
    }
}

#[async_trait]
impl SigningOracle for AwsKmsOracle {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError> {
        let resp = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message_type(MessageType::Digest)
            .message(Blob::new(digest.to_vec()))
            .signing_algorithm(SigningAlgorithmSpec::EcdsaSha256)
            .send()
            .await
            .map_err(classify)?;
        resp.signature
            .map(Blob::into_inner)
            .ok_or_else(|| OracleError::Unavailable("KMS returned no signature".into()))
    }

    async fn public_key(&self) -> Result<Vec<u8>, OracleError> {
        let resp = self.client.get_public_key().key_id(&self.key_id).send().await.map_err(classify)?;
        resp.public_key
            .map(Blob::into_inner)
            .ok_or_else(|| OracleError::Unavailable("KMS returned no public key".into()))
    }
}
