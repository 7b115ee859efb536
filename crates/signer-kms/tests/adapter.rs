//! End-to-end tests for the DER → `(r, s, v)` adapter driven by a local oracle.

use alloy_primitives::{address, eip191_hash_message, keccak256, Address, B256, U256};
use async_trait::async_trait;
use signer_kms::{
    signature::{self, canonicalize_low_s, normalize, parse_der, SECP256K1_HALF_N, SECP256K1_N},
    EthSigner, KmsIdentity, LocalOracle, OracleError, SignatureError, SignerError, SigningOracle,
};

const KEY_ONE: Address = address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf");

/// DER-encode one unsigned integer.
fn der_int(value: &[u8; 32]) -> Vec<u8> {
    let first = value.iter().position(|b| *b != 0).unwrap_or(31);
    let mut body = value[first..].to_vec();
    if body[0] & 0x80 != 0 {
        body.insert(0, 0);
    }
    let mut out = vec![0x02, body.len() as u8];
    out.extend(body);
    out
}

fn der_sig(r: &[u8; 32], s: &[u8; 32]) -> Vec<u8> {
    let mut body = der_int(r);
    body.extend(der_int(s));
    let mut out = vec![0x30, body.len() as u8];
    out.extend(body);
    out
}

fn split(raw: &[u8]) -> ([u8; 32], [u8; 32]) {
    let (r, s) = parse_der(raw).unwrap();
    (normalize(r).unwrap(), normalize(s).unwrap())
}

/// Re-encodes every signature of the wrapped oracle with `s` replaced by `n - s`.
#[derive(Debug)]
struct HighSOracle(LocalOracle);

#[async_trait]
impl SigningOracle for HighSOracle {
    fn key_id(&self) -> &str {
        "high-s"
    }

    async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError> {
        let raw = self.0.sign_digest(digest).await?;
        let (r, s) = split(&raw);
        let high = (SECP256K1_N - U256::from_be_bytes(s)).to_be_bytes::<32>();
        Ok(der_sig(&r, &high))
    }

    async fn public_key(&self) -> Result<Vec<u8>, OracleError> {
        self.0.public_key().await
    }
}

#[tokio::test]
async fn high_s_signature_is_flipped_and_recoverable() {
    let local = LocalOracle::from_hex("0x01").unwrap();
    let digest = eip191_hash_message(b"transfer 1 ether");

    let raw_low = local.sign_digest(digest).await.unwrap();
    let (_, low_s) = split(&raw_low);

    let high_oracle = HighSOracle(local);
    let raw_high = high_oracle.sign_digest(digest).await.unwrap();
    let (_, high_s) = split(&raw_high);
    assert!(U256::from_be_bytes(high_s) > SECP256K1_HALF_N);

    let identity = KmsIdentity::new(high_oracle);
    let sig = identity.sign_hash(digest).await.unwrap();

    let s_prime = U256::from_be_bytes(sig.s.0);
    assert_eq!(s_prime, SECP256K1_N - U256::from_be_bytes(high_s));
    assert_eq!(sig.s.0, low_s);
    assert!(s_prime <= SECP256K1_HALF_N);
    assert_eq!(sig.recover_address(&digest), Some(KEY_ONE));
}

#[tokio::test]
async fn canonical_over_many_digests() {
    let oracle = LocalOracle::from_hex("0xdeadbeef").unwrap();
    let expected = oracle.address();
    let high = HighSOracle(oracle.clone());

    for i in 0u64..64 {
        let digest = keccak256(i.to_be_bytes());
        for raw in [oracle.sign_digest(digest).await.unwrap(), high.sign_digest(digest).await.unwrap()] {
            let sig = signature::adapt(&digest, &raw, expected).unwrap();
            assert!(U256::from_be_bytes(sig.s.0) <= SECP256K1_HALF_N);
            assert_eq!(sig.recover_address(&digest), Some(expected));

            let (r, s) = parse_der(&raw).unwrap();
            let r32 = normalize(r).unwrap();
            let digits = &r[r.iter().position(|b| *b != 0).unwrap()..];
            assert_eq!(&r32[32 - digits.len()..], digits);
            assert!(r32[..32 - digits.len()].iter().all(|b| *b == 0));
            assert_eq!(canonicalize_low_s(normalize(s).unwrap()), sig.s.0);
        }
    }
}

#[tokio::test]
async fn wrong_expected_address_fails() {
    let oracle = LocalOracle::from_hex("0x01").unwrap();
    let digest = eip191_hash_message(b"test");
    let unrelated = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");

    let res: Result<_, SignerError> = signature::sign(
        digest,
        |d| async move { oracle.sign_digest(d).await.map_err(SignerError::from) },
        unrelated,
    )
    .await;
    assert!(matches!(res, Err(SignerError::Signature(SignatureError::RecoveryParameterNotFound))));
}

#[tokio::test]
async fn corrupted_sequence_tag_is_malformed() {
    let oracle = LocalOracle::from_hex("0x01").unwrap();
    let digest = eip191_hash_message(b"test");
    let mut raw = oracle.sign_digest(digest).await.unwrap();
    raw[0] = 0x10;
    assert!(matches!(
        signature::adapt(&digest, &raw, KEY_ONE),
        Err(SignatureError::MalformedSignature(_))
    ));
}

#[test]
fn short_components_are_left_padded() {
    let mut r = [0u8; 32];
    r[31] = 0x05;
    let mut s = [0u8; 32];
    s[1..].fill(0x7f);
    let raw = der_sig(&r, &s);
    assert_eq!(raw.len(), 2 + 3 + 33);
    assert_eq!(split(&raw), (r, s));
}
