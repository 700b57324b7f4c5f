use crate::ceremony::types::{
    user_verification, AuthenticationOptions, BeginCeremonyRequest, CeremonySuccess,
    CompleteCeremonyRequest, CredentialDescriptor, CEREMONY_TIMEOUT_MS,
};
use crate::ceremony::{new_challenge, new_device_id, CeremonyManager};
use crate::db::models::CeremonyMode;
use crate::error::{AppError, AppResult};
use chrono::Utc;

const PLACEHOLDER: &str = "auto-authentication";

impl CeremonyManager {
    pub async fn begin_authentication(&self, req: &BeginCeremonyRequest) -> AppResult<AuthenticationOptions> {
        let username = req.username.trim();
        self.resolve_session(&req.session_id, username, CeremonyMode::Authentication, PLACEHOLDER)
            .await?;

        let _guard = self.locks.acquire(username).await;

        let mut user = self.require_user(username).await?;
        if user.credentials.is_empty() {
            return Err(AppError::NoCredentials(username.to_string()));
        }

        let challenge = new_challenge();
        user.issue_challenge(challenge.clone(), &req.session_id);
        self.save_user(&mut user).await?;

        tracing::info!(username, session_id = %req.session_id, "Authentication challenge issued");

        Ok(AuthenticationOptions {
            challenge,
            rp_id: self.policy.rp_id.clone(),
            allow_credentials: user
                .credentials
                .iter()
                .map(|c| CredentialDescriptor::new(&c.id))
                .collect(),
            user_verification: user_verification(req.is_android_chrome),
            timeout: CEREMONY_TIMEOUT_MS,
        })
    }

    /// The lock is held from the first read to the final write, so the
    /// counter comparison always sees the latest accepted value.
    pub async fn complete_authentication(&self, req: &CompleteCeremonyRequest) -> AppResult<CeremonySuccess> {
        let username = req.username.trim();
        let session = self
            .resolve_session(&req.session_id, username, CeremonyMode::Authentication, PLACEHOLDER)
            .await?;

        let guard = self.locks.acquire(username).await;

        let mut user = self.require_user(username).await?;
        let stored = user
            .credential(&req.credential.id)
            .cloned()
            .ok_or_else(|| AppError::CredentialNotFound(req.credential.id.clone()))?;
        let expected = self.outstanding_challenge(&user, &session.session_id)?;

        self.check_client_data(&req.credential, "webauthn.get", &expected)?;

        let counter = self
            .verify(self.verifier.verify_assertion(&req.credential, &expected, &stored))
            .await?;

        if counter <= stored.counter {
            tracing::warn!(
                username,
                credential_id = %stored.id,
                presented = counter,
                stored = stored.counter,
                "Signature counter did not advance"
            );
            return Err(AppError::ReplayDetected {
                presented: counter,
                stored: stored.counter,
            });
        }

        if let Some(credential) = user.credential_mut(&stored.id) {
            credential.counter = counter;
            credential.last_used_at = Some(Utc::now().to_rfc3339());
        }
        user.clear_challenge();
        self.save_user(&mut user).await?;
        drop(guard);

        tracing::info!(username, session_id = %session.session_id, counter, "Passkey authenticated");

        self.succeed(&user, &session, CeremonyMode::Authentication, new_device_id())
            .await
    }
}
