//! # Error Handling
//!
//! One error type for the whole broker. Every variant is recoverable at the
//! request level: handlers return `AppResult<T>` and the `IntoResponse` impl
//! below turns failures into a JSON body the responder page can render as a
//! retry prompt.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// No pairing session with this id (expired, retired, or never created)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A freshly generated session id is already in use
    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("User '{0}' not found")]
    UserNotFound(String),

    /// Authentication requested for a user without any registered passkey
    #[error("No passkeys registered for user '{0}'")]
    NoCredentials(String),

    /// No outstanding challenge; the ceremony was never begun or already completed
    #[error("No challenge outstanding")]
    NoChallenge,

    #[error("Challenge mismatch")]
    ChallengeMismatch,

    #[error("Credential '{0}' not found")]
    CredentialNotFound(String),

    /// Signature counter did not advance: a cloned authenticator or a replayed assertion
    #[error("Potential replay attack: counter {presented} is not greater than {stored}")]
    ReplayDetected { presented: u32, stored: u32 },

    #[error("Origin mismatch: got '{got}', expected '{expected}'")]
    OriginMismatch { got: String, expected: String },

    /// The ceremony verifier rejected the response
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Record store or session snapshot could not be read or written.
    ///
    /// `#[from]` lets `?` lift any `sqlx::Error` into this variant.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind, sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SessionNotFound(_) => "SessionNotFound",
            AppError::SessionExists(_) => "SessionExists",
            AppError::UserNotFound(_) => "UserNotFound",
            AppError::NoCredentials(_) => "NoCredentials",
            AppError::NoChallenge => "NoChallenge",
            AppError::ChallengeMismatch => "ChallengeMismatch",
            AppError::CredentialNotFound(_) => "CredentialNotFound",
            AppError::ReplayDetected { .. } => "ReplayDetected",
            AppError::OriginMismatch { .. } => "OriginMismatch",
            AppError::VerificationFailed(_) => "VerificationFailed",
            AppError::StoreUnavailable(_) => "StoreUnavailable",
            AppError::Timeout(_) => "Timeout",
            AppError::Serialization(_) => "Serialization",
            AppError::BadRequest(_) => "BadRequest",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::StoreUnavailable(e) => {
                // Don't leak database internals
                tracing::error!("Store error: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::SessionNotFound(_)
            | AppError::UserNotFound(_)
            | AppError::CredentialNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::SessionExists(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Unauthorized(_) | AppError::VerificationFailed(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            AppError::NoCredentials(_)
            | AppError::NoChallenge
            | AppError::ChallengeMismatch
            | AppError::ReplayDetected { .. }
            | AppError::OriginMismatch { .. }
            | AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Run `fut` but give up after `limit`, surfacing `AppError::Timeout`.
///
/// Wraps every record-store, snapshot, and verifier call so a stuck
/// collaborator can never park a request forever.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let ok = bounded(Duration::from_secs(1), async { Ok::<_, AppError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = bounded(Duration::from_secs(1), async {
            Err::<(), _>(AppError::NoChallenge)
        })
        .await;
        assert!(matches!(err, Err(AppError::NoChallenge)));
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let res = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(res, Err(AppError::Timeout(_))));
    }

    #[test]
    fn replay_maps_to_bad_request() {
        let resp = AppError::ReplayDetected { presented: 5, stored: 5 }.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = AppError::SessionNotFound("s".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
