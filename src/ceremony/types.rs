//! # Ceremony API Types
//!
//! Request and response bodies of the four ceremony endpoints. Field names
//! are camelCase on the wire, matching what `navigator.credentials` hands the
//! responder page.
//!
//! ## API Flow
//! Each ceremony has two steps: begin and complete
//! - Begin: broker issues a challenge and the options the authenticator needs
//! - Complete: responder sends the authenticator response back for verification

use serde::{Deserialize, Serialize};

pub const ES256: i64 = -7;
pub const RS256: i64 = -257;
pub const CEREMONY_TIMEOUT_MS: u32 = 60_000;

/// Request to begin either ceremony
///
/// ## Example JSON
/// ```json
/// {
///   "username": "alice",
///   "sessionId": "6f1c...",
///   "isAndroidChrome": false
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginCeremonyRequest {
    pub username: String,
    pub session_id: String,

    /// Chrome on Android cannot always satisfy `userVerification: required`
    #[serde(default)]
    pub is_android_chrome: bool,
}

/// Request to complete either ceremony
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteCeremonyRequest {
    pub username: String,
    pub session_id: String,

    /// The credential returned by `navigator.credentials.create()` / `.get()`
    pub credential: CredentialPayload,
}

/// Authenticator output as the responder page serialises it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub response: AuthenticatorPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorPayload {
    /// base64 or base64url JSON with `type`, `challenge`, `origin`
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,

    // Registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_algorithm: Option<i64>,

    // Authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingParty {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// base64url(username)
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub kind: String,
    pub alg: i64,
}

impl PubKeyCredParam {
    pub fn public_key(alg: i64) -> Self {
        Self {
            kind: "public-key".to_string(),
            alg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub authenticator_attachment: String,
    pub require_resident_key: bool,
    pub user_verification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub transports: Vec<String>,
}

impl CredentialDescriptor {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: "public-key".to_string(),
            transports: ["internal", "hybrid", "ble", "nfc", "usb"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

/// Options for `navigator.credentials.create()`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String,
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelection,
    pub timeout: u32,
    pub attestation: String,
}

/// Options for `navigator.credentials.get()`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: String,
    pub timeout: u32,
}

/// Returned to the responder when a ceremony (or a device approval) succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CeremonySuccess {
    pub success: bool,
    pub token: String,
    pub device_id: String,
}

/// `required` unless the client says it is Chrome on Android.
pub fn user_verification(is_android_chrome: bool) -> String {
    if is_android_chrome { "discouraged" } else { "required" }.to_string()
}
