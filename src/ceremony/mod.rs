//! # Ceremony Manager
//!
//! Drives the two-phase passkey ceremonies for the responder device and owns
//! every mutation of a user record.
//!
//! ## Submodules
//! - `types`: request/response bodies of the ceremony endpoints
//! - `registration`: creating a new passkey
//! - `authentication`: signing in with an existing passkey
//! - `devices`: device approval, browser association, username lookup
//! - `verifier`: the black-box attestation/assertion check
//! - `locks`: per-user mutual exclusion
//!
//! ## Ceremony Flow
//! 1. Responder opens the pairing URL → `begin_registration` / `begin_authentication`
//! 2. Broker stores a fresh challenge on the user (overwriting any earlier one)
//! 3. Responder's authenticator signs it
//! 4. Responder posts the result → `complete_registration` / `complete_authentication`
//! 5. Broker checks challenge, origin, verifier verdict, and counter
//! 6. On success the challenge is cleared, a token is minted, and the outcome
//!    fans out to the initiator
//!
//! ## Concurrency
//! Every read-check-write on a user runs under that user's lock, and the
//! complete step holds it across verification and persistence. Two racing
//! completions for one user therefore see each other's writes: the loser finds
//! the challenge already cleared or the counter already advanced.

pub mod authentication;
pub mod devices;
pub mod locks;
pub mod registration;
pub mod types;
pub mod verifier;

use crate::ceremony::locks::UserLocks;
use crate::ceremony::types::{CeremonySuccess, CredentialPayload};
use crate::ceremony::verifier::{CeremonyVerifier, ClientData, Verdict};
use crate::config::{Config, Environment};
use crate::db::models::{CeremonyMode, ChallengeState, PendingSession, User};
use crate::db::RecordStore;
use crate::error::{bounded, AppError, AppResult};
use crate::fanout::{CeremonyOutcome, OutcomeFanout};
use crate::sessions::SessionTable;
use crate::token::TokenIssuer;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Relying-party identity and the environment-dependent checks.
#[derive(Debug, Clone)]
pub struct CeremonyPolicy {
    pub rp_id: String,
    pub rp_name: String,
    pub rp_origin: String,
    pub environment: Environment,

    /// Recreate missing pairing sessions instead of failing
    pub lenient_sessions: bool,

    /// Bound on each record-store and verifier call
    pub timeout: Duration,

    /// Age after which an issued challenge is refused
    pub challenge_ttl: chrono::Duration,
}

impl CeremonyPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rp_id: config.rp_id.clone(),
            rp_name: config.rp_name.clone(),
            rp_origin: config.rp_origin.clone(),
            environment: config.environment,
            lenient_sessions: config.lenient_sessions,
            timeout: config.store_timeout,
            challenge_ttl: chrono::Duration::from_std(config.challenge_ttl)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    pub fn strict_origin(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn allows_unregistered_devices(&self) -> bool {
        self.environment == Environment::Development
    }
}

pub struct CeremonyManager {
    store: Arc<dyn RecordStore>,
    sessions: Arc<SessionTable>,
    verifier: Arc<dyn CeremonyVerifier>,
    fanout: Arc<OutcomeFanout>,
    tokens: TokenIssuer,
    locks: UserLocks,
    policy: CeremonyPolicy,
}

impl CeremonyManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sessions: Arc<SessionTable>,
        verifier: Arc<dyn CeremonyVerifier>,
        fanout: Arc<OutcomeFanout>,
        tokens: TokenIssuer,
        policy: CeremonyPolicy,
    ) -> Self {
        Self {
            store,
            sessions,
            verifier,
            fanout,
            tokens,
            locks: UserLocks::new(),
            policy,
        }
    }

    /// Find the pairing session a ceremony request refers to.
    ///
    /// Strict: the session must exist and belong to `username`. Lenient: a
    /// missing session is recreated under the caller's id and a username
    /// mismatch is rebound, both with a warning.
    async fn resolve_session(
        &self,
        session_id: &str,
        username: &str,
        mode: CeremonyMode,
        placeholder_channel: &str,
    ) -> AppResult<PendingSession> {
        if !self.policy.lenient_sessions {
            let session = self
                .sessions
                .get(session_id)
                .await
                .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
            if session.username != username {
                return Err(AppError::BadRequest(format!(
                    "Session {} belongs to another user",
                    session_id
                )));
            }
            return Ok(session);
        }

        let session = self
            .sessions
            .ensure(session_id, username, mode, placeholder_channel)
            .await?;
        if session.username != username {
            tracing::warn!(
                session_id,
                expected = %session.username,
                got = username,
                "Username mismatch on pairing session, rebinding"
            );
            return self.sessions.rebind_username(session_id, username).await;
        }
        Ok(session)
    }

    async fn load_user(&self, username: &str) -> AppResult<Option<User>> {
        bounded(self.policy.timeout, self.store.find_by_username(username)).await
    }

    /// Read-only lookup by internal id, for token holders.
    pub async fn find_user(&self, user_id: &str) -> AppResult<User> {
        bounded(self.policy.timeout, self.store.find_by_id(user_id))
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))
    }

    async fn require_user(&self, username: &str) -> AppResult<User> {
        self.load_user(username)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))
    }

    async fn save_user(&self, user: &mut User) -> AppResult<()> {
        user.updated_at = Utc::now().to_rfc3339();
        bounded(self.policy.timeout, self.store.update(user)).await
    }

    /// The user's challenge for `session_id`, if it is still usable.
    fn outstanding_challenge(&self, user: &User, session_id: &str) -> AppResult<String> {
        match user.live_challenge(session_id, self.policy.challenge_ttl, Utc::now()) {
            Ok(challenge) => Ok(challenge.to_string()),
            Err(state) => {
                if state != ChallengeState::Missing {
                    tracing::warn!(username = %user.username, session_id, ?state, "Challenge refused");
                }
                Err(AppError::NoChallenge)
            }
        }
    }

    async fn verify<T, F>(&self, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<Verdict<T>>>,
    {
        match bounded(self.policy.timeout, call).await? {
            Verdict::Accept(value) => Ok(value),
            Verdict::Reject(reason) => Err(AppError::VerificationFailed(reason)),
        }
    }

    /// Challenge, origin, then ceremony type, in that order.
    fn check_client_data(
        &self,
        credential: &CredentialPayload,
        expected_kind: &str,
        expected_challenge: &str,
    ) -> AppResult<()> {
        let client = ClientData::decode(&credential.response.client_data_json)?;

        if !client.challenge_matches(expected_challenge) {
            return Err(AppError::ChallengeMismatch);
        }
        self.check_origin(&client.origin)?;
        if client.kind != expected_kind {
            return Err(AppError::VerificationFailed(format!(
                "unexpected client data type '{}'",
                client.kind
            )));
        }
        Ok(())
    }

    fn check_origin(&self, origin: &str) -> AppResult<()> {
        let expected = self.policy.rp_origin.trim_end_matches('/');
        if origin.trim_end_matches('/') == expected {
            return Ok(());
        }

        if self.policy.strict_origin() {
            return Err(AppError::OriginMismatch {
                got: origin.to_string(),
                expected: expected.to_string(),
            });
        }
        tracing::warn!(got = origin, expected, "Origin mismatch accepted in development");
        Ok(())
    }

    /// Mint the token, announce the result, and retire the session.
    async fn succeed(
        &self,
        user: &User,
        session: &PendingSession,
        mode: CeremonyMode,
        device_id: String,
    ) -> AppResult<CeremonySuccess> {
        let token = self.tokens.issue(&user.id, &user.username)?;

        // The initiator may have re-associated since we resolved the session
        let channel_id = self
            .sessions
            .get(&session.session_id)
            .await
            .map(|s| s.channel_id)
            .unwrap_or_else(|| session.channel_id.clone());

        self.fanout
            .publish(&CeremonyOutcome {
                session_id: session.session_id.clone(),
                channel_id,
                username: user.username.clone(),
                user_id: user.id.clone(),
                mode,
                token: token.clone(),
                device_id: device_id.clone(),
            })
            .await;

        Ok(CeremonySuccess {
            success: true,
            token,
            device_id,
        })
    }
}

/// Fresh single-use challenge: 32 random bytes, base64url.
pub fn new_challenge() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn new_device_id() -> String {
    Uuid::new_v4().to_string()
}
