use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::token::Claims;
use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct CheckUsernameRequest {
    pub username: String,
}

pub async fn check_username(
    State(state): State<AppState>,
    Json(req): Json<CheckUsernameRequest>,
) -> AppResult<Json<Value>> {
    let exists = state.ceremonies.username_exists(&req.username).await?;

    Ok(Json(json!({ "exists": exists })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub username: String,
    pub device_token: String,
    #[serde(default)]
    pub device_info: Value,
}

/// Register a phone for login approval
///
/// ## Route
/// POST /mobile/register-device (behind `require_auth`)
///
/// Only the token holder may add devices, and only to their own account.
pub async fn register_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterDeviceRequest>,
) -> AppResult<Json<Value>> {
    if claims.username != req.username.trim() {
        return Err(AppError::Unauthorized(
            "Devices can only be registered to your own account".to_string(),
        ));
    }

    state
        .ceremonies
        .register_device(req.username.trim(), &req.device_token, &req.device_info)
        .await?;

    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveLoginRequest {
    pub session_id: String,
    pub username: String,
    pub device_token: String,
}

pub async fn approve_login(
    State(state): State<AppState>,
    Json(req): Json<ApproveLoginRequest>,
) -> AppResult<Json<Value>> {
    let result = state
        .ceremonies
        .approve_login(&req.session_id, &req.username, &req.device_token)
        .await?;

    Ok(Json(json!({
        "success": true,
        "token": result.token,
    })))
}
