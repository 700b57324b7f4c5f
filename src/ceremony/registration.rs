//! # Passkey Registration
//!
//! Creating a new passkey from the responder device. Two steps: begin and
//! complete.
//!
//! ## Registration Flow
//! 1. **Begin**: store a fresh challenge on the user → return creation options
//! 2. **Complete**: check the authenticator response → append the credential
//!
//! ## Security Concepts
//! - **Challenge**: single-use random value the authenticator must sign over;
//!   a later Begin overwrites it, so only the most recent ceremony can finish
//! - **Public key**: the only key material the broker stores
//! - **Attestation**: requested as `none`; the verifier decides what to trust

use crate::ceremony::types::{
    user_verification, AuthenticatorSelection, BeginCeremonyRequest, CeremonySuccess,
    CompleteCeremonyRequest, CredentialDescriptor, PubKeyCredParam, RegistrationOptions,
    RelyingParty, UserEntity, CEREMONY_TIMEOUT_MS, ES256, RS256,
};
use crate::ceremony::{new_challenge, new_device_id, CeremonyManager};
use crate::db::models::{CeremonyMode, Credential};
use crate::error::{bounded, AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Placeholder channel recorded on sessions recreated by the begin step.
const BEGIN_PLACEHOLDER: &str = "manual-creation";
/// Placeholder channel recorded on sessions recreated by the complete step.
const COMPLETE_PLACEHOLDER: &str = "auto-verification";

impl CeremonyManager {
    /// Begin passkey registration
    ///
    /// ## Flow
    /// 1. Resolve the pairing session (strict or lenient)
    /// 2. Look up the user, creating the record on first contact
    /// 3. Overwrite the outstanding challenge and persist it
    /// 4. Return the options for `navigator.credentials.create()`
    ///
    /// ## Errors
    /// - SessionNotFound: unknown session in strict mode
    /// - BadRequest: empty username, or session owned by another user
    /// - StoreUnavailable / Timeout: the record store failed or stalled
    pub async fn begin_registration(&self, req: &BeginCeremonyRequest) -> AppResult<RegistrationOptions> {
        let username = req.username.trim();
        if username.is_empty() {
            return Err(AppError::BadRequest("username is required".to_string()));
        }

        self.resolve_session(&req.session_id, username, CeremonyMode::Registration, BEGIN_PLACEHOLDER)
            .await?;

        let _guard = self.locks.acquire(username).await;

        let mut user = match self.load_user(username).await? {
            Some(user) => user,
            None => {
                let user = bounded(self.policy.timeout, self.store.create(username)).await?;
                tracing::info!(username, user_id = %user.id, "Created user");
                user
            }
        };

        let challenge = new_challenge();
        user.issue_challenge(challenge.clone(), &req.session_id);
        self.save_user(&mut user).await?;

        tracing::info!(
            username,
            session_id = %req.session_id,
            existing_credentials = user.credentials.len(),
            "Registration challenge issued"
        );

        Ok(RegistrationOptions {
            challenge,
            rp: RelyingParty {
                name: self.policy.rp_name.clone(),
                id: self.policy.rp_id.clone(),
            },
            user: UserEntity {
                id: URL_SAFE_NO_PAD.encode(username),
                name: username.to_string(),
                display_name: username.to_string(),
            },
            pub_key_cred_params: vec![PubKeyCredParam::public_key(ES256), PubKeyCredParam::public_key(RS256)],
            exclude_credentials: user
                .credentials
                .iter()
                .map(|c| CredentialDescriptor::new(&c.id))
                .collect(),
            authenticator_selection: AuthenticatorSelection {
                authenticator_attachment: "platform".to_string(),
                require_resident_key: false,
                user_verification: user_verification(req.is_android_chrome),
            },
            timeout: CEREMONY_TIMEOUT_MS,
            attestation: "none".to_string(),
        })
    }

    /// Complete passkey registration
    ///
    /// ## What gets checked, in order
    /// - the user exists and has an outstanding challenge
    /// - `clientDataJSON` carries that challenge and an acceptable origin
    /// - the verifier accepts the attestation
    /// - the credential id is new for this user
    ///
    /// On success the credential is appended with counter 0, the challenge is
    /// cleared, and the outcome fans out to the initiator. A retried
    /// completion therefore fails with `NoChallenge`.
    pub async fn complete_registration(&self, req: &CompleteCeremonyRequest) -> AppResult<CeremonySuccess> {
        let username = req.username.trim();
        let session = self
            .resolve_session(&req.session_id, username, CeremonyMode::Registration, COMPLETE_PLACEHOLDER)
            .await?;

        let guard = self.locks.acquire(username).await;

        let mut user = self.require_user(username).await?;
        let expected = self.outstanding_challenge(&user, &session.session_id)?;

        self.check_client_data(&req.credential, "webauthn.create", &expected)?;

        let issued = self
            .verify(self.verifier.verify_registration(&req.credential, &expected))
            .await?;

        if user.credential(&issued.credential_id).is_some() {
            return Err(AppError::BadRequest(format!(
                "Credential '{}' is already registered",
                issued.credential_id
            )));
        }

        user.credentials
            .push(Credential::new(issued.credential_id.clone(), issued.public_key));
        user.clear_challenge();
        self.save_user(&mut user).await?;
        drop(guard);

        tracing::info!(
            username,
            session_id = %session.session_id,
            credential_id = %issued.credential_id,
            "Passkey registered"
        );

        self.succeed(&user, &session, CeremonyMode::Registration, new_device_id())
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::ceremony::testing::*;
    use crate::ceremony::types::{BeginCeremonyRequest, CompleteCeremonyRequest};
    use crate::config::Config;
    use crate::db::models::CeremonyMode;
    use crate::db::RecordStore;
    use crate::error::AppError;

    fn begin(username: &str, session_id: &str) -> BeginCeremonyRequest {
        BeginCeremonyRequest {
            username: username.to_string(),
            session_id: session_id.to_string(),
            is_android_chrome: false,
        }
    }

    fn complete(username: &str, session_id: &str, credential_id: &str, challenge: &str) -> CompleteCeremonyRequest {
        CompleteCeremonyRequest {
            username: username.to_string(),
            session_id: session_id.to_string(),
            credential: registration_payload(credential_id, challenge),
        }
    }

    #[tokio::test]
    async fn alice_registers_first_passkey() {
        let h = harness(Config::for_tests()).await;
        let session = h.sessions.create("alice", CeremonyMode::Registration, None).await.unwrap();

        let options = h.manager.begin_registration(&begin("alice", &session.session_id)).await.unwrap();
        assert_eq!(options.user.id, "YWxpY2U");
        assert_eq!(options.authenticator_selection.user_verification, "required");
        assert!(options.exclude_credentials.is_empty());
        assert_eq!(options.pub_key_cred_params.len(), 2);

        let result = h
            .manager
            .complete_registration(&complete("alice", &session.session_id, "C1", &options.challenge))
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.token.is_empty());

        let user = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.credentials.len(), 1);
        assert_eq!(user.credentials[0].id, "C1");
        assert_eq!(user.credentials[0].counter, 0);
        assert!(user.current_challenge.is_none());

        // Session retired, outcome parked for the poll
        assert!(h.sessions.get(&session.session_id).await.is_none());
        assert!(h.sessions.take_outcome(&session.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_begin_invalidates_first_challenge() {
        let h = harness(Config::for_tests()).await;
        let session = h.sessions.create("alice", CeremonyMode::Registration, None).await.unwrap();

        let first = h.manager.begin_registration(&begin("alice", &session.session_id)).await.unwrap();
        let second = h.manager.begin_registration(&begin("alice", &session.session_id)).await.unwrap();
        assert_ne!(first.challenge, second.challenge);

        let err = h
            .manager
            .complete_registration(&complete("alice", &session.session_id, "C1", &first.challenge))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ChallengeMismatch));

        h.manager
            .complete_registration(&complete("alice", &session.session_id, "C1", &second.challenge))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retried_completion_is_rejected() {
        let h = harness(development()).await;
        let options = h.manager.begin_registration(&begin("alice", "s-1")).await.unwrap();
        let req = complete("alice", "s-1", "C1", &options.challenge);

        h.manager.complete_registration(&req).await.unwrap();
        // Lenient mode recreates the retired session, but the challenge is gone
        let err = h.manager.complete_registration(&req).await.unwrap_err();
        assert!(matches!(err, AppError::NoChallenge));
    }

    #[tokio::test]
    async fn completed_session_cannot_be_completed_again() {
        let h = harness(Config::for_tests()).await;
        let session = h.sessions.create("alice", CeremonyMode::Registration, None).await.unwrap();
        let options = h.manager.begin_registration(&begin("alice", &session.session_id)).await.unwrap();
        let req = complete("alice", &session.session_id, "C1", &options.challenge);

        h.manager.complete_registration(&req).await.unwrap();
        let err = h.manager.complete_registration(&req).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));

        let user = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.credentials.len(), 1);
    }

    #[tokio::test]
    async fn complete_without_user_or_challenge() {
        let h = harness(development()).await;
        let err = h
            .manager
            .complete_registration(&complete("nobody", "s-1", "C1", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UserNotFound(_)));

        let options = h.manager.begin_registration(&begin("alice", "s-2")).await.unwrap();
        h.manager
            .complete_registration(&complete("alice", "s-2", "C1", &options.challenge))
            .await
            .unwrap();
        let err = h
            .manager
            .complete_registration(&complete("alice", "s-3", "C2", &options.challenge))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoChallenge));
    }

    #[tokio::test]
    async fn duplicate_credential_id_rejected() {
        let h = harness(development()).await;
        let options = h.manager.begin_registration(&begin("alice", "s-1")).await.unwrap();
        h.manager
            .complete_registration(&complete("alice", "s-1", "C1", &options.challenge))
            .await
            .unwrap();

        let options = h.manager.begin_registration(&begin("alice", "s-2")).await.unwrap();
        assert_eq!(options.exclude_credentials[0].id, "C1");
        assert_eq!(options.exclude_credentials[0].transports.len(), 5);

        let err = h
            .manager
            .complete_registration(&complete("alice", "s-2", "C1", &options.challenge))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn strict_mode_requires_known_session() {
        let h = harness(Config::for_tests()).await;
        let err = h.manager.begin_registration(&begin("alice", "missing")).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
        assert!(h.store.find_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn android_chrome_relaxes_user_verification() {
        let h = harness(development()).await;
        let mut req = begin("alice", "s-1");
        req.is_android_chrome = true;
        let options = h.manager.begin_registration(&req).await.unwrap();
        assert_eq!(options.authenticator_selection.user_verification, "discouraged");
    }

    #[tokio::test]
    async fn origin_policy_depends_on_environment() {
        // Production rejects a foreign origin
        let h = harness(Config::for_tests()).await;
        let session = h.sessions.create("alice", CeremonyMode::Registration, None).await.unwrap();
        let options = h.manager.begin_registration(&begin("alice", &session.session_id)).await.unwrap();
        let mut req = complete("alice", &session.session_id, "C1", &options.challenge);
        req.credential.response.client_data_json =
            client_data("webauthn.create", &options.challenge, "https://evil.example");
        let err = h.manager.complete_registration(&req).await.unwrap_err();
        assert!(matches!(err, AppError::OriginMismatch { .. }));

        // Development only warns
        let h = harness(development()).await;
        let options = h.manager.begin_registration(&begin("alice", "s-1")).await.unwrap();
        let mut req = complete("alice", "s-1", "C1", &options.challenge);
        req.credential.response.client_data_json =
            client_data("webauthn.create", &options.challenge, "https://evil.example");
        assert!(h.manager.complete_registration(&req).await.is_ok());
    }
}
