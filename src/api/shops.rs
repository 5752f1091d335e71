use axum::{
    extract::State,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

use super::extract::{ApiJson, ApiPath, Paging, ValidJson};
use crate::auth::Principal;
use crate::domain::aggregates::{Shop, TempToken};
use crate::domain::flow::OrderStatusFlow;
use crate::domain::value_objects::Paginated;
use crate::error::Result;
use crate::services::{NewShop, ShopUpdate};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateShopRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub owner_username: String,
    pub owner_password: String,
    #[serde(default)]
    pub contact_phone: String,
    #[serde(default)]
    #[validate(email)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_ref: String,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub settings: serde_json::Value,
    pub order_status_flow: Option<OrderStatusFlow>,
}

pub async fn create_shop(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(req): ValidJson<CreateShopRequest>,
) -> Result<Json<Shop>> {
    let new = NewShop {
        name: req.name,
        owner_username: req.owner_username,
        owner_password: req.owner_password,
        contact_phone: req.contact_phone,
        contact_email: req.contact_email.unwrap_or_default(),
        address: req.address,
        description: req.description,
        image_ref: req.image_ref,
        valid_until: req.valid_until,
        settings: req.settings,
        order_status_flow: req.order_status_flow,
    };
    Ok(Json(state.services.shops.create_shop(&principal, new).await?))
}

pub async fn list_shops(
    State(state): State<AppState>,
    principal: Principal,
    Paging(page): Paging,
) -> Result<Json<Paginated<Shop>>> {
    Ok(Json(state.services.shops.list_shops(&principal, page).await?))
}

pub async fn get_shop(State(state): State<AppState>, principal: Principal, ApiPath(id): ApiPath<i64>) -> Result<Json<Shop>> {
    Ok(Json(state.services.shops.get_shop(&principal, id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateShopRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    pub contact_phone: Option<String>,
    #[validate(email)]
    pub contact_email: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub image_ref: Option<String>,
    pub settings: Option<serde_json::Value>,
    pub valid_until: Option<DateTime<Utc>>,
}

pub async fn update_shop(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ValidJson(req): ValidJson<UpdateShopRequest>,
) -> Result<Json<Shop>> {
    let update = ShopUpdate {
        name: req.name,
        contact_phone: req.contact_phone,
        contact_email: req.contact_email,
        address: req.address,
        description: req.description,
        image_ref: req.image_ref,
        settings: req.settings,
        valid_until: req.valid_until,
    };
    Ok(Json(state.services.shops.update_shop(&principal, id, update).await?))
}

pub async fn get_flow(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<OrderStatusFlow>> {
    let flow = state.services.shops.get_flow(&principal, id).await?;
    Ok(Json(flow.as_ref().clone()))
}

pub async fn replace_flow(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ApiJson(flow): ApiJson<OrderStatusFlow>,
) -> Result<Json<OrderStatusFlow>> {
    let flow = state.services.shops.replace_flow(&principal, id, flow).await?;
    Ok(Json(flow.as_ref().clone()))
}

pub async fn temp_token(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<TempToken>> {
    Ok(Json(state.services.temp_tokens.get_or_issue(&principal, id).await?))
}

pub async fn rotate_temp_token(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<TempToken>> {
    Ok(Json(state.services.temp_tokens.rotate(&principal, id).await?))
}
