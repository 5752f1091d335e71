use axum::{
    extract::State,
    Json,
};

use super::extract::{ApiJson, ApiPath};
use crate::auth::Principal;
use crate::domain::aggregates::User;
use crate::error::Result;
use crate::services::NewUser;
use crate::state::AppState;

pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(new): ApiJson<NewUser>,
) -> Result<Json<User>> {
    Ok(Json(state.services.users.create_user(&principal, new).await?))
}

pub async fn get_user(State(state): State<AppState>, principal: Principal, ApiPath(id): ApiPath<i64>) -> Result<Json<User>> {
    Ok(Json(state.services.users.get_user(&principal, id).await?))
}
