//! Prometheus metrics for oracle signing and HD derivation.

use metrics::{Counter, Histogram};
use metrics_derive::Metrics;
use once_cell::sync::Lazy;

/// Process-wide metrics handle.
pub(crate) static METRICS: Lazy<SignerMetrics> = Lazy::new(SignerMetrics::default);

/// Metrics for the oracle round-trip, the signature adapter and the HD tree.
#[derive(Metrics, Clone)]
#[metrics(scope = "signer_kms")]
pub struct SignerMetrics {
    /// Total oracle `sign_digest` calls.
    pub oracle_sign_total: Counter,
    /// Oracle `sign_digest` calls that returned an error.
    pub oracle_sign_failure_total: Counter,
    /// Oracle `public_key` calls.
    pub oracle_public_key_total: Counter,
    /// Oracle signing latency in seconds.
    pub oracle_sign_latency_seconds: Histogram,
    /// Signatures whose `s` had to be flipped to the lower half.
    pub low_s_flips_total: Counter,
    /// Signatures for which no recovery id matched the expected address.
    pub recovery_failure_total: Counter,
    /// Master nodes built from an oracle seed.
    pub master_node_resolutions_total: Counter,
    /// Child nodes derived (cache misses).
    pub child_derivations_total: Counter,
}
