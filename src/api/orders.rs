use axum::{
    extract::State,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::catalog::ShopQuery;
use super::extract::{ApiJson, ApiPath, ApiQuery, Paging};
use crate::auth::Principal;
use crate::domain::aggregates::{DraftItem, Order, OrderDraft, OrderStatusLog};
use crate::domain::value_objects::{Money, Paginated};
use crate::error::Result;
use crate::services::{OrderSearch, OrderUpdate};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreatedOrder {
    pub order_id: i64,
    pub total_price: Money,
    pub status: i32,
}

pub async fn create_order(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(draft): ApiJson<OrderDraft>,
) -> Result<Json<CreatedOrder>> {
    let order = state.services.orders.create_order(&principal, draft).await?;
    Ok(Json(CreatedOrder { order_id: order.id, total_price: order.total_price, status: order.status }))
}

pub async fn get_order(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<ShopQuery>,
) -> Result<Json<Order>> {
    Ok(Json(state.services.orders.get_order(&principal, id, q.shop_id).await?))
}

pub async fn order_history(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<ShopQuery>,
) -> Result<Json<Vec<OrderStatusLog>>> {
    Ok(Json(state.services.orders.order_history(&principal, id, q.shop_id).await?))
}

pub async fn list_orders(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(q): ApiQuery<ShopQuery>,
    Paging(page): Paging,
) -> Result<Json<Paginated<Order>>> {
    Ok(Json(state.services.orders.list_orders_by_shop(&principal, q.shop_id, page).await?))
}

pub async fn list_unfinished(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(q): ApiQuery<ShopQuery>,
    Paging(page): Paging,
) -> Result<Json<Paginated<Order>>> {
    principal.require_staff(q.shop_id)?;
    let flow = state.services.shops.flow(q.shop_id).await?;
    let orders = state
        .services
        .orders
        .list_unfinished_orders(&principal, q.shop_id, &flow, page)
        .await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct ByUserQuery {
    pub user_id: i64,
    pub shop_id: i64,
}

pub async fn list_by_user(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(q): ApiQuery<ByUserQuery>,
    Paging(page): Paging,
) -> Result<Json<Paginated<Order>>> {
    let orders = state
        .services
        .orders
        .list_orders_by_user(&principal, q.user_id, q.shop_id, page)
        .await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub shop_id: i64,
    pub user_id: Option<i64>,
    pub statuses: Option<Vec<i32>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

pub async fn search_orders(
    State(state): State<AppState>,
    principal: Principal,
    Paging(page): Paging,
    ApiJson(req): ApiJson<SearchRequest>,
) -> Result<Json<Paginated<Order>>> {
    let search = OrderSearch {
        shop_id: req.shop_id,
        user_id: req.user_id,
        // An empty list means "any status".
        statuses: req.statuses.filter(|s| !s.is_empty()),
        start: req.start,
        end: req.end,
    };
    Ok(Json(state.services.orders.search_orders(&principal, search, page).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub remark: Option<String>,
    pub items: Option<Vec<DraftItem>>,
}

pub async fn update_order(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<ShopQuery>,
    ApiJson(req): ApiJson<UpdateOrderRequest>,
) -> Result<Json<Order>> {
    principal.require_staff(q.shop_id)?;
    let flow = state.services.shops.flow(q.shop_id).await?;
    let update = OrderUpdate { remark: req.remark, items: req.items };
    let order = state
        .services
        .orders
        .update_order(&principal, id, q.shop_id, update, &flow)
        .await?;
    Ok(Json(order))
}

pub async fn delete_order(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<ShopQuery>,
) -> Result<Json<Value>> {
    state.services.orders.delete_order(&principal, id, q.shop_id).await?;
    Ok(Json(json!({ "message": "order deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct ToggleQuery {
    pub shop_id: i64,
    pub next: i32,
}

pub async fn toggle_status(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<ToggleQuery>,
) -> Result<Json<Order>> {
    principal.require_staff(q.shop_id)?;
    let flow = state.services.shops.flow(q.shop_id).await?;
    let order = state
        .services
        .orders
        .toggle_status(&principal, id, q.shop_id, q.next, &flow)
        .await?;
    Ok(Json(order))
}
