//! # Database Models
//!
//! Rows of the record store and the session snapshot. A `User` is assembled
//! from its `users` row plus child rows (credentials, devices, browser
//! sessions) and written back as one record by `RecordStore::update`.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A user account and everything the ceremonies mutate on it.
///
/// Created on the first ceremony attempt for a username; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Random 24-hex-char id, used as the JWT subject
    pub id: String,

    /// Unique login name; the primary lookup key
    pub username: String,

    /// Registered passkeys, in registration order
    pub credentials: Vec<Credential>,

    /// The single outstanding challenge, if a ceremony is in flight.
    ///
    /// Overwritten by every Begin-* call and cleared by every successful
    /// Complete-*, so at most one ceremony per user can ever succeed.
    pub current_challenge: Option<String>,

    /// Pairing session the challenge was issued for
    pub challenge_session: Option<String>,

    pub challenge_issued_at: Option<DateTime<Utc>>,

    /// Phones registered for push-style login approval
    pub devices: Vec<Device>,

    /// Desktop browsers associated over the push channel
    pub browser_sessions: Vec<BrowserSession>,

    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn new(username: String) -> Self {
        let now = Utc::now().to_rfc3339();
        let mut id = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut id);

        Self {
            id: hex::encode(id),
            username,
            credentials: Vec::new(),
            current_challenge: None,
            challenge_session: None,
            challenge_issued_at: None,
            devices: Vec::new(),
            browser_sessions: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn credential(&self, credential_id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == credential_id)
    }

    pub fn credential_mut(&mut self, credential_id: &str) -> Option<&mut Credential> {
        self.credentials.iter_mut().find(|c| c.id == credential_id)
    }

    pub fn has_device(&self, token: &str) -> bool {
        self.devices.iter().any(|d| d.token == token)
    }

    /// Replace any outstanding challenge with one bound to `session_id`.
    pub fn issue_challenge(&mut self, challenge: String, session_id: &str) {
        self.current_challenge = Some(challenge);
        self.challenge_session = Some(session_id.to_string());
        self.challenge_issued_at = Some(Utc::now());
    }

    pub fn clear_challenge(&mut self) {
        self.current_challenge = None;
        self.challenge_session = None;
        self.challenge_issued_at = None;
    }

    /// The outstanding challenge, unless it belongs to another session or is
    /// older than `max_age` at `now`.
    pub fn live_challenge(
        &self,
        session_id: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<&str, ChallengeState> {
        let challenge = self.current_challenge.as_deref().ok_or(ChallengeState::Missing)?;
        if self.challenge_session.as_deref() != Some(session_id) {
            return Err(ChallengeState::OtherSession);
        }
        match self.challenge_issued_at {
            Some(issued_at) if now - issued_at <= max_age => Ok(challenge),
            _ => Err(ChallengeState::Expired),
        }
    }

    /// Drop browser associations whose expiry has passed.
    pub fn prune_browser_sessions(&mut self, now: DateTime<Utc>) {
        self.browser_sessions.retain(|b| {
            DateTime::parse_from_rfc3339(&b.expires_at)
                .map(|expires_at| expires_at.with_timezone(&Utc) > now)
                .unwrap_or(false)
        });
    }
}

/// Why a user has no usable challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Missing,
    OtherSession,
    Expired,
}

/// Only the `users` row; children are loaded separately.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub current_challenge: Option<String>,
    pub challenge_session: Option<String>,
    pub challenge_issued_at: Option<DateTime<Utc>>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn into_user(
        self,
        credentials: Vec<Credential>,
        devices: Vec<Device>,
        browser_sessions: Vec<BrowserSession>,
    ) -> User {
        User {
            id: self.id,
            username: self.username,
            credentials,
            current_challenge: self.current_challenge,
            challenge_session: self.challenge_session,
            challenge_issued_at: self.challenge_issued_at,
            devices,
            browser_sessions,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A registered passkey
///
/// ## Security Note
/// Only the public key is stored; the private key never leaves the
/// authenticator. The counter is the replay defence: every accepted
/// assertion must carry a strictly larger value than the one stored here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    /// Credential id as reported by the authenticator (base64url)
    pub id: String,

    /// Opaque public key material handed back by the verifier
    pub public_key: String,

    /// Signature counter; starts at 0 on registration
    #[sqlx(try_from = "i64")]
    pub counter: u32,

    pub created_at: String,
    pub last_used_at: Option<String>,
}

impl Credential {
    pub fn new(id: String, public_key: String) -> Self {
        Self {
            id,
            public_key,
            counter: 0,
            created_at: Utc::now().to_rfc3339(),
            last_used_at: None,
        }
    }
}

/// A phone registered to approve logins for this user
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub token: String,
    /// Client-reported device description, kept as JSON text
    pub info: String,
    pub registered_at: String,
    pub last_seen: String,
}

/// A desktop browser tab bound to a push channel
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BrowserSession {
    pub device_id: String,
    pub channel_id: String,
    /// RFC 3339; seven days after the last association
    pub expires_at: String,
}

/// Which ceremony a pairing session is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CeremonyMode {
    Registration,
    Authentication,
}

impl CeremonyMode {
    pub fn is_registration(&self) -> bool {
        matches!(self, CeremonyMode::Registration)
    }
}

/// The short-lived link between an initiator and a responder
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingSession {
    /// UUID v4; unguessable, carried in the pairing URL
    pub session_id: String,
    pub username: String,
    /// Push channel of the initiator; reassigned by `associate`
    pub channel_id: String,
    pub mode: CeremonyMode,
    /// Creation time, refreshed by `touch`; the sweeper ages sessions from here
    pub created_at: DateTime<Utc>,
}

impl PendingSession {
    pub fn new(session_id: String, username: String, channel_id: String, mode: CeremonyMode) -> Self {
        Self {
            session_id,
            username,
            channel_id,
            mode,
            created_at: Utc::now(),
        }
    }
}

/// A completed ceremony waiting for the initiator's poll
///
/// Consumed on the first successful read.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOutcome {
    pub session_id: String,
    pub username: String,
    pub user_id: String,
    pub mode: CeremonyMode,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}
