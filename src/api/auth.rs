use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use super::extract::{BearerToken, ValidJson};
use crate::auth::Principal;
use crate::error::Result;
use crate::services::{CustomerSession, LoginResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

pub async fn login(State(state): State<AppState>, ValidJson(req): ValidJson<LoginRequest>) -> Result<Json<LoginResponse>> {
    let response = state.services.auth.login(req.username.trim(), &req.password).await?;
    Ok(Json(response))
}

pub async fn refresh(State(state): State<AppState>, BearerToken(token): BearerToken) -> Result<Json<LoginResponse>> {
    Ok(Json(state.services.auth.refresh(&token).await?))
}

pub async fn logout(State(state): State<AppState>, BearerToken(token): BearerToken) -> Result<Json<Value>> {
    state.services.auth.logout(&token).await?;
    Ok(Json(json!({ "message": "logged out" })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1))]
    pub old_password: String,
    #[validate(length(min = 1))]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> Result<Json<Value>> {
    state
        .services
        .auth
        .change_password(&principal, &req.old_password, &req.new_password)
        .await?;
    Ok(Json(json!({ "message": "password changed" })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateTempTokenRequest {
    pub shop_id: i64,
    #[validate(length(min = 1, max = 16))]
    pub token: String,
}

/// Exchange a shop's temp code for a customer session. No bearer needed.
pub async fn validate_temp_token(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ValidateTempTokenRequest>,
) -> Result<Json<CustomerSession>> {
    Ok(Json(state.services.temp_tokens.validate(req.shop_id, &req.token).await?))
}
