use axum::{
    extract::State,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use super::extract::{ApiPath, ApiQuery, Paging, ValidJson};
use crate::auth::Principal;
use crate::domain::aggregates::{CategorySpec, OptionSpec, Product, ProductDetail, ProductSpec, ProductStatus, Tag};
use crate::domain::value_objects::{Money, Paginated};
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct OptionBody {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[serde(default)]
    pub price_adjustment: Money,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryBody {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_multiple: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    #[validate]
    pub options: Vec<OptionBody>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductBody {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_ref: String,
    pub price: Money,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[serde(default)]
    #[validate]
    pub option_categories: Vec<CategoryBody>,
}

impl From<ProductBody> for ProductSpec {
    fn from(body: ProductBody) -> Self {
        ProductSpec {
            name: body.name,
            description: body.description,
            image_ref: body.image_ref,
            price: body.price,
            stock: body.stock,
            option_categories: body
                .option_categories
                .into_iter()
                .map(|c| CategorySpec {
                    name: c.name,
                    is_required: c.is_required,
                    is_multiple: c.is_multiple,
                    display_order: c.display_order,
                    options: c
                        .options
                        .into_iter()
                        .map(|o| OptionSpec {
                            name: o.name,
                            price_adjustment: o.price_adjustment,
                            is_default: o.is_default,
                            display_order: o.display_order,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    pub shop_id: i64,
    #[serde(flatten)]
    #[validate]
    pub product: ProductBody,
}

pub async fn create_product(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(req): ValidJson<CreateProductRequest>,
) -> Result<Json<ProductDetail>> {
    let detail = state
        .services
        .catalog
        .create_product(&principal, req.shop_id, req.product.into())
        .await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
pub struct ProductListQuery {
    pub shop_id: i64,
    pub status: Option<String>,
}

pub async fn list_products(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(q): ApiQuery<ProductListQuery>,
    Paging(page): Paging,
) -> Result<Json<Paginated<Product>>> {
    let status = q.status.as_deref().map(ProductStatus::parse).transpose()?;
    let products = state
        .services
        .catalog
        .list_products(&principal, q.shop_id, status, page)
        .await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ProductDetail>> {
    Ok(Json(state.services.catalog.get_product(&principal, id).await?))
}

pub async fn update_product(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ValidJson(body): ValidJson<ProductBody>,
) -> Result<Json<ProductDetail>> {
    Ok(Json(state.services.catalog.update_product(&principal, id, body.into()).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusBody {
    #[validate(length(min = 1))]
    pub status: String,
}

pub async fn set_product_status(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ValidJson(req): ValidJson<StatusBody>,
) -> Result<Json<Product>> {
    let status = ProductStatus::parse(&req.status)?;
    Ok(Json(state.services.catalog.set_status(&principal, id, status).await?))
}

pub async fn delete_product(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>> {
    state.services.catalog.delete_product(&principal, id).await?;
    Ok(Json(json!({ "message": "product deleted" })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductTagsRequest {
    #[validate(length(max = 50))]
    pub tag_ids: Vec<i64>,
}

pub async fn set_product_tags(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<i64>,
    ValidJson(req): ValidJson<ProductTagsRequest>,
) -> Result<Json<Vec<Tag>>> {
    let mut tag_ids = req.tag_ids;
    tag_ids.sort_unstable();
    tag_ids.dedup();
    Ok(Json(state.services.catalog.set_product_tags(&principal, id, tag_ids).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTagRequest {
    pub shop_id: i64,
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub async fn create_tag(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(req): ValidJson<CreateTagRequest>,
) -> Result<Json<Tag>> {
    let tag = state
        .services
        .catalog
        .create_tag(&principal, req.shop_id, req.name, req.description)
        .await?;
    Ok(Json(tag))
}

#[derive(Debug, Deserialize)]
pub struct ShopQuery {
    pub shop_id: i64,
}

pub async fn list_tags(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(q): ApiQuery<ShopQuery>,
) -> Result<Json<Vec<Tag>>> {
    Ok(Json(state.services.catalog.list_tags(&principal, q.shop_id).await?))
}

pub async fn delete_tag(State(state): State<AppState>, principal: Principal, ApiPath(id): ApiPath<i64>) -> Result<Json<Value>> {
    state.services.catalog.delete_tag(&principal, id).await?;
    Ok(Json(json!({ "message": "tag deleted" })))
}
