//! # Ceremony Verification
//!
//! Attestation and signature cryptography sit behind `CeremonyVerifier`.
//! The manager only needs a verdict: accept (with the public key or the new
//! signature counter) or reject. Challenge, origin, and counter policy stay in
//! the manager so every verifier gets them for free.
//!
//! `SignatureVerifier` is the production implementation. It expects the key
//! the browser exports with `getPublicKey()` (SubjectPublicKeyInfo, DER) and
//! the raw `authenticatorData` and `signature` of each assertion.

use crate::ceremony::types::{CredentialPayload, ES256, RS256};
use crate::db::models::Credential;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use ring::digest::{digest, SHA256};
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use serde::Deserialize;

/// Authenticator data layout: rpIdHash (32) | flags (1) | signCount (4, big endian)
const RP_ID_HASH_LEN: usize = 32;
const FLAGS_OFFSET: usize = 32;
const SIGN_COUNT_OFFSET: usize = 33;
const AUTH_DATA_MIN_LEN: usize = 37;
const FLAG_USER_PRESENT: u8 = 0x01;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_BIT_STRING: u8 = 0x03;
const TAG_OID: u8 = 0x06;

/// 1.2.840.10045.2.1
const OID_EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
/// 1.2.840.10045.3.1.7 (P-256)
const OID_PRIME256V1: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
/// 1.2.840.113549.1.1.1
const OID_RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

/// Outcome of a verifier call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Accept(T),
    Reject(String),
}

impl<T> From<Result<T, String>> for Verdict<T> {
    fn from(result: Result<T, String>) -> Self {
        match result {
            Ok(value) => Verdict::Accept(value),
            Err(reason) => Verdict::Reject(reason),
        }
    }
}

/// What a successful registration yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub credential_id: String,
    pub public_key: String,
}

#[async_trait]
pub trait CeremonyVerifier: Send + Sync {
    async fn verify_registration(
        &self,
        credential: &CredentialPayload,
        expected_challenge: &str,
    ) -> AppResult<Verdict<NewCredential>>;

    /// Returns the signature counter carried by the assertion.
    async fn verify_assertion(
        &self,
        credential: &CredentialPayload,
        expected_challenge: &str,
        stored: &Credential,
    ) -> AppResult<Verdict<u32>>;
}

/// The `clientDataJSON` fields the manager checks.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub origin: String,
}

impl ClientData {
    /// Browsers send standard base64, some wrappers send base64url; accept both.
    pub fn decode(encoded: &str) -> AppResult<Self> {
        let bytes = decode_b64(encoded)
            .ok_or_else(|| AppError::BadRequest("clientDataJSON is not base64".to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn challenge_matches(&self, expected: &str) -> bool {
        self.challenge.trim_end_matches('=') == expected.trim_end_matches('=')
    }
}

pub(crate) fn decode_b64(input: &str) -> Option<Vec<u8>> {
    [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(input).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAlgorithm {
    Es256,
    Rs256,
}

impl KeyAlgorithm {
    fn cose(self) -> i64 {
        match self {
            KeyAlgorithm::Es256 => ES256,
            KeyAlgorithm::Rs256 => RS256,
        }
    }

    fn verification(self) -> &'static dyn VerificationAlgorithm {
        match self {
            KeyAlgorithm::Es256 => &signature::ECDSA_P256_SHA256_ASN1,
            KeyAlgorithm::Rs256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        }
    }
}

/// A SubjectPublicKeyInfo reduced to what `ring` needs: the algorithm and
/// the subject key (an uncompressed EC point or a PKCS#1 RSA key).
struct SubjectKey<'a> {
    algorithm: KeyAlgorithm,
    key: &'a [u8],
}

/// One DER element: (tag, contents, remainder).
fn der_element(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let width = (first & 0x7f) as usize;
        if width == 0 || width > 4 || rest.len() < width {
            return None;
        }
        let len = rest[..width].iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, &rest[width..])
    };
    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

fn parse_spki(der: &[u8]) -> Option<SubjectKey<'_>> {
    let (tag, spki, _) = der_element(der)?;
    if tag != TAG_SEQUENCE {
        return None;
    }
    let (tag, algorithm_id, rest) = der_element(spki)?;
    if tag != TAG_SEQUENCE {
        return None;
    }
    let (tag, bits, _) = der_element(rest)?;
    if tag != TAG_BIT_STRING {
        return None;
    }
    let (&unused_bits, key) = bits.split_first()?;
    if unused_bits != 0 {
        return None;
    }

    let (tag, oid, params) = der_element(algorithm_id)?;
    if tag != TAG_OID {
        return None;
    }
    let algorithm = if oid == OID_EC_PUBLIC_KEY {
        let (tag, curve, _) = der_element(params)?;
        if tag != TAG_OID || curve != OID_PRIME256V1 {
            return None;
        }
        KeyAlgorithm::Es256
    } else if oid == OID_RSA_ENCRYPTION {
        KeyAlgorithm::Rs256
    } else {
        return None;
    };

    Some(SubjectKey { algorithm, key })
}

/// Verifies assertion signatures against the stored public key.
///
/// Registration uses attestation `none`, so there is no signature to check
/// at that step: the key must parse as a supported SubjectPublicKeyInfo and
/// any authenticator data sent along must be scoped to this relying party.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    rp_id_hash: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(rp_id: &str) -> Self {
        Self {
            rp_id_hash: digest(&SHA256, rp_id.as_bytes()).as_ref().to_vec(),
        }
    }

    /// Checks the relying party and user presence, returns the sign count.
    fn check_authenticator_data(&self, data: &[u8]) -> Result<u32, String> {
        if data.len() < AUTH_DATA_MIN_LEN {
            return Err("authenticator data is truncated".to_string());
        }
        if data[..RP_ID_HASH_LEN] != self.rp_id_hash[..] {
            return Err("authenticator data is scoped to another relying party".to_string());
        }
        if data[FLAGS_OFFSET] & FLAG_USER_PRESENT == 0 {
            return Err("user presence flag is not set".to_string());
        }
        let count = &data[SIGN_COUNT_OFFSET..SIGN_COUNT_OFFSET + 4];
        Ok(u32::from_be_bytes([count[0], count[1], count[2], count[3]]))
    }

    fn registration(&self, credential: &CredentialPayload) -> Result<NewCredential, String> {
        if credential.id.is_empty() {
            return Err("credential id is empty".to_string());
        }

        let der = credential
            .response
            .public_key
            .as_deref()
            .and_then(decode_b64)
            .ok_or("response carries no public key")?;
        let subject = parse_spki(&der).ok_or("public key is not an ES256 or RS256 SubjectPublicKeyInfo")?;

        if let Some(declared) = credential.response.public_key_algorithm {
            if declared != subject.algorithm.cose() {
                return Err(format!(
                    "declared algorithm {} does not match the public key",
                    declared
                ));
            }
        }

        if let Some(encoded) = credential.response.authenticator_data.as_deref() {
            let data = decode_b64(encoded).ok_or("authenticator data is not base64")?;
            self.check_authenticator_data(&data)?;
        }

        Ok(NewCredential {
            credential_id: credential.id.clone(),
            public_key: URL_SAFE_NO_PAD.encode(&der),
        })
    }

    fn assertion(&self, credential: &CredentialPayload, stored: &Credential) -> Result<u32, String> {
        if credential.id != stored.id {
            return Err("assertion is for another credential".to_string());
        }

        let auth_data = credential
            .response
            .authenticator_data
            .as_deref()
            .and_then(decode_b64)
            .ok_or("assertion carries no authenticator data")?;
        let sign_count = self.check_authenticator_data(&auth_data)?;

        let signature = credential
            .response
            .signature
            .as_deref()
            .and_then(decode_b64)
            .ok_or("assertion carries no signature")?;
        let client_data = decode_b64(&credential.response.client_data_json)
            .ok_or("clientDataJSON is not base64")?;

        let der = decode_b64(&stored.public_key).ok_or("stored public key is not base64")?;
        let subject = parse_spki(&der).ok_or("stored public key is unsupported")?;

        let mut signed = auth_data;
        signed.extend_from_slice(digest(&SHA256, &client_data).as_ref());

        UnparsedPublicKey::new(subject.algorithm.verification(), subject.key)
            .verify(&signed, &signature)
            .map_err(|_| "signature does not verify".to_string())?;

        Ok(sign_count)
    }
}

#[async_trait]
impl CeremonyVerifier for SignatureVerifier {
    async fn verify_registration(
        &self,
        credential: &CredentialPayload,
        _expected_challenge: &str,
    ) -> AppResult<Verdict<NewCredential>> {
        Ok(self.registration(credential).into())
    }

    async fn verify_assertion(
        &self,
        credential: &CredentialPayload,
        _expected_challenge: &str,
        stored: &Credential,
    ) -> AppResult<Verdict<u32>> {
        Ok(self.assertion(credential, stored).into())
    }
}
