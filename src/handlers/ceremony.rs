use crate::ceremony::types::{BeginCeremonyRequest, CompleteCeremonyRequest};
use crate::error::AppResult;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};

// Registration endpoints

pub async fn registration_options(
    State(state): State<AppState>,
    Json(req): Json<BeginCeremonyRequest>,
) -> AppResult<Json<Value>> {
    let options = state.ceremonies.begin_registration(&req).await?;

    Ok(Json(json!(options)))
}

pub async fn registration_verification(
    State(state): State<AppState>,
    Json(req): Json<CompleteCeremonyRequest>,
) -> AppResult<Json<Value>> {
    let result = state.ceremonies.complete_registration(&req).await?;

    Ok(Json(json!(result)))
}

// Authentication endpoints

pub async fn authentication_options(
    State(state): State<AppState>,
    Json(req): Json<BeginCeremonyRequest>,
) -> AppResult<Json<Value>> {
    let options = state.ceremonies.begin_authentication(&req).await?;

    Ok(Json(json!(options)))
}

pub async fn authentication_verification(
    State(state): State<AppState>,
    Json(req): Json<CompleteCeremonyRequest>,
) -> AppResult<Json<Value>> {
    let result = state.ceremonies.complete_authentication(&req).await?;

    Ok(Json(json!(result)))
}
