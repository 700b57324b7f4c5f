//! # User Handlers
//!
//! Endpoints behind the bearer-token middleware.

use crate::error::AppResult;
use crate::state::AppState;
use crate::token::Claims;
use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

/// Get the profile of the token holder
///
/// ## Route
/// GET /api/users/me
///
/// ## Authentication
/// `Authorization: Bearer <token>`; `require_auth` puts the verified
/// [`Claims`] into the request extensions.
///
/// ## Response
/// ```json
/// {
///   "id": "65f1c0a2b3d4e5f6a7b8c9d0",
///   "username": "alice",
///   "passkeys": 1,
///   "devices": 0,
///   "createdAt": "2025-01-15T10:30:00+00:00"
/// }
/// ```
///
/// Key material and challenges are never returned.
pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Value>> {
    let user = state.ceremonies.find_user(&claims.sub).await?;

    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "passkeys": user.credentials.len(),
        "devices": user.devices.len(),
        "createdAt": user.created_at,
    })))
}

pub async fn protected(Extension(claims): Extension<Claims>) -> Json<Value> {
    Json(json!({
        "message": "This is protected data",
        "user": claims.username,
    }))
}
