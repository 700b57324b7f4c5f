//! # HTTP Request Handlers
//!
//! ## Submodules
//! - `ceremony`: the four passkey ceremony endpoints used by the responder
//! - `sessions`: pairing sessions for the initiator (create, associate, poll)
//! - `devices`: phone registration, login approval, username lookup
//! - `users`: endpoints behind the bearer token
//! - `socket`: the WebSocket push channel
//! - `health`: liveness and status
//!
//! ## Handler Pattern
//! Handlers extract `State<AppState>` plus the request body, call into the
//! Ceremony Manager or Session Table, and return `AppResult<Json<Value>>`.
//! Errors turn into `{"error", "code"}` bodies via `AppError::into_response`.

pub mod ceremony;
pub mod devices;
pub mod health;
pub mod sessions;
pub mod socket;
pub mod users;

use crate::middleware::auth::require_auth;
use crate::state::AppState;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The complete application router.
pub fn router(state: AppState) -> Router {
    // The pairing page is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected_routes = Router::new()
        .route("/api/protected", get(users::protected))
        .route("/api/users/me", get(users::get_current_user))
        .route("/mobile/register-device", post(devices::register_device))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(health::status))
        .route("/health", get(health::health_check))
        .route("/ws", get(socket::ws_handler))

        // Responder: passkey ceremonies
        .route("/api/webauthn/registration-options", post(ceremony::registration_options))
        .route("/api/webauthn/registration-verification", post(ceremony::registration_verification))
        .route("/api/webauthn/authentication-options", post(ceremony::authentication_options))
        .route("/api/webauthn/authentication-verification", post(ceremony::authentication_verification))

        // Initiator: pairing sessions
        .route("/api/sessions", post(sessions::create_session))
        .route("/api/sessions/associate", post(sessions::associate_session))
        .route("/api/auth-status/:session_id", get(sessions::auth_status))
        .route("/api/verify-session", post(sessions::verify_session))

        .route("/api/check-username", post(devices::check_username))
        .route("/mobile/approve-login", post(devices::approve_login))

        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceremony::testing::{assertion_payload, registration_payload};
    use crate::config::Config;
    use axum::{
        body::{self, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn open_session(app: &Router, username: &str, mode: &str) -> String {
        let (_, created) = call(
            app,
            "POST",
            "/api/sessions",
            Some(json!({"username": username, "mode": mode})),
            None,
        )
        .await;
        created["sessionId"].as_str().unwrap().to_string()
    }

    /// Registers a passkey for `username` and returns the token handed back.
    async fn register(app: &Router, username: &str) -> String {
        let session_id = open_session(app, username, "registration").await;
        let (_, options) = call(
            app,
            "POST",
            "/api/webauthn/registration-options",
            Some(json!({"username": username, "sessionId": session_id})),
            None,
        )
        .await;
        let challenge = options["challenge"].as_str().unwrap();
        let (status, verified) = call(
            app,
            "POST",
            "/api/webauthn/registration-verification",
            Some(json!({
                "username": username,
                "sessionId": session_id,
                "credential": registration_payload(&format!("{}-key", username), challenge),
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        verified["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn device_approval_cannot_take_over_another_account() {
        let app = router(AppState::for_tests(Config::for_tests()).await);
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let mallory_session = open_session(&app, "mallory", "authentication").await;

        let evil = json!({"username": "alice", "deviceToken": "evil"});
        let (status, _) = call(&app, "POST", "/mobile/register-device", Some(evil.clone()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, "POST", "/mobile/register-device", Some(evil), Some(&bob)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            "POST",
            "/mobile/approve-login",
            Some(json!({"sessionId": mallory_session, "username": "alice", "deviceToken": "evil"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("token").is_none());

        // An unregistered device cannot approve even alice's own session
        let alice_session = open_session(&app, "alice", "authentication").await;
        let (status, _) = call(
            &app,
            "POST",
            "/mobile/approve-login",
            Some(json!({"sessionId": alice_session, "username": "alice", "deviceToken": "evil"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // The owner registers a phone and approves with it
        let (status, _) = call(
            &app,
            "POST",
            "/mobile/register-device",
            Some(json!({"username": "alice", "deviceToken": "phone"})),
            Some(&alice),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(
            &app,
            "POST",
            "/mobile/approve-login",
            Some(json!({"sessionId": alice_session, "username": "alice", "deviceToken": "phone"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().is_some());
    }

    #[tokio::test]
    async fn pairing_round_trip_over_http() {
        let app = router(AppState::for_tests(Config::for_tests()).await);

        let (status, created) = call(
            &app,
            "POST",
            "/api/sessions",
            Some(json!({"username": "alice", "mode": "registration"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let session_id = created["sessionId"].as_str().unwrap().to_string();
        assert!(created["pairingUrl"].as_str().unwrap().ends_with("&register=true"));

        let (status, options) = call(
            &app,
            "POST",
            "/api/webauthn/registration-options",
            Some(json!({"username": "alice", "sessionId": session_id})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(options["rp"]["name"], "FastKey");
        assert_eq!(options["attestation"], "none");
        let challenge = options["challenge"].as_str().unwrap();

        let (status, verified) = call(
            &app,
            "POST",
            "/api/webauthn/registration-verification",
            Some(json!({
                "username": "alice",
                "sessionId": session_id,
                "credential": registration_payload("C1", challenge),
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verified["success"], true);

        // Initiator polls once
        let uri = format!("/api/auth-status/{}", session_id);
        let (_, polled) = call(&app, "GET", &uri, None, None).await;
        assert_eq!(polled["success"], true);
        assert_eq!(polled["isRegistration"], true);
        let token = polled["token"].as_str().unwrap().to_string();
        let (_, again) = call(&app, "GET", &uri, None, None).await;
        assert_eq!(again["success"], false);

        let (status, me) = call(&app, "GET", "/api/users/me", None, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "alice");
        assert_eq!(me["passkeys"], 1);

        let (status, _) = call(&app, "GET", "/api/protected", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, "GET", "/api/protected", None, Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn errors_carry_their_kind() {
        let app = router(AppState::for_tests(Config::for_tests()).await);

        let (status, body) = call(
            &app,
            "POST",
            "/api/webauthn/authentication-verification",
            Some(json!({
                "username": "alice",
                "sessionId": "nope",
                "credential": assertion_payload("C1", "x", 1),
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SessionNotFound");

        let (status, body) = call(
            &app,
            "POST",
            "/api/sessions/associate",
            Some(json!({"sessionId": "nope", "channelId": "c"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SessionNotFound");
    }

    #[tokio::test]
    async fn verify_session_touches_or_replaces() {
        let strict = router(AppState::for_tests(Config::for_tests()).await);
        let (_, body) = call(&strict, "POST", "/api/verify-session", Some(json!({"sessionId": "gone"})), None).await;
        assert_eq!(body["valid"], false);
        assert!(body.get("newSessionId").is_none());

        let (status, _) = call(&strict, "POST", "/api/verify-session", Some(json!({})), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let lenient = router(
            AppState::for_tests(Config {
                lenient_sessions: true,
                ..Config::for_tests()
            })
            .await,
        );
        let (_, body) = call(&lenient, "POST", "/api/verify-session", Some(json!({"sessionId": "gone"})), None).await;
        assert_eq!(body["valid"], false);
        let replacement = body["newSessionId"].as_str().unwrap().to_string();

        let (_, body) = call(&lenient, "POST", "/api/verify-session", Some(json!({"sessionId": replacement})), None).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["username"], "pending");
    }

    #[tokio::test]
    async fn status_and_health() {
        let app = router(AppState::for_tests(Config::for_tests()).await);
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (_, body) = call(&app, "GET", "/", None, None).await;
        assert_eq!(body["status"], "online");
        assert_eq!(body["pendingAuthSessions"], 0);
        assert_eq!(body["environment"], "production");

        let (_, body) = call(&app, "POST", "/api/check-username", Some(json!({"username": "alice"})), None).await;
        assert_eq!(body["exists"], false);
    }
}
