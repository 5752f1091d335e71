//! Persistence ports.
//!
//! Each aggregate has a repository trait exposing only what its service needs.
//! A [`UnitOfWork`] is one open transaction implementing all of them; services
//! reach it exclusively through [`with_transaction`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

use crate::domain::aggregates::{
    OptionCategory, Operator, Order, OrderStatusLog, Product, ProductOption, ProductStatus, Shop, Tag,
    TempToken, User,
};
use crate::domain::value_objects::Page;
use crate::error::AppError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OperatorRepository {
    async fn find_operator(&mut self, id: i64) -> StoreResult<Option<Operator>>;
    async fn find_operator_by_username(&mut self, username: &str) -> StoreResult<Option<Operator>>;
    async fn insert_operator(&mut self, operator: &Operator) -> StoreResult<()>;
    async fn update_operator_password(&mut self, id: i64, password_hash: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ShopRepository {
    async fn find_shop(&mut self, id: i64) -> StoreResult<Option<Shop>>;
    async fn find_shop_by_owner(&mut self, owner_username: &str) -> StoreResult<Option<Shop>>;
    async fn list_shops(&mut self, page: Page) -> StoreResult<(Vec<Shop>, i64)>;
    /// `Conflict` on a duplicate name or owner username.
    async fn insert_shop(&mut self, shop: &Shop) -> StoreResult<()>;
    async fn update_shop(&mut self, shop: &Shop) -> StoreResult<()>;
}

#[async_trait]
pub trait UserRepository {
    async fn find_user(&mut self, id: i64) -> StoreResult<Option<User>>;
    async fn find_user_by_name(&mut self, name: &str) -> StoreResult<Option<User>>;
    async fn insert_user(&mut self, user: &User) -> StoreResult<()>;
}

/// Read-only catalog access used while pricing orders.
#[async_trait]
pub trait CatalogLookup {
    async fn find_product(&mut self, id: i64) -> StoreResult<Option<Product>>;
    async fn find_option(&mut self, id: i64) -> StoreResult<Option<ProductOption>>;
    /// The category without its options.
    async fn find_option_category(&mut self, id: i64) -> StoreResult<Option<OptionCategory>>;
}

#[async_trait]
pub trait ProductRepository: CatalogLookup {
    /// Like `find_product` but holds a row lock until the transaction ends.
    async fn lock_product(&mut self, id: i64) -> StoreResult<Option<Product>>;
    async fn list_products(
        &mut self,
        shop_id: i64,
        status: Option<ProductStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Product>, i64)>;
    async fn insert_product(&mut self, product: &Product) -> StoreResult<()>;
    async fn update_product(&mut self, product: &Product) -> StoreResult<()>;
    async fn set_stock(&mut self, product_id: i64, stock: i32) -> StoreResult<()>;
    /// Categories with their options, ordered by `display_order` then id.
    async fn option_categories(&mut self, product_id: i64) -> StoreResult<Vec<OptionCategory>>;
    /// Delete-all-then-insert.
    async fn replace_option_categories(
        &mut self,
        product_id: i64,
        categories: &[OptionCategory],
    ) -> StoreResult<()>;
    async fn count_order_items_for_product(&mut self, product_id: i64) -> StoreResult<i64>;
    /// Removes the product with its categories, options and tag links.
    async fn delete_product(&mut self, product_id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait TagRepository {
    async fn find_tag(&mut self, id: i64) -> StoreResult<Option<Tag>>;
    async fn list_tags(&mut self, shop_id: i64) -> StoreResult<Vec<Tag>>;
    async fn insert_tag(&mut self, tag: &Tag) -> StoreResult<()>;
    async fn delete_tag(&mut self, id: i64) -> StoreResult<()>;
    async fn count_tag_links(&mut self, tag_id: i64) -> StoreResult<i64>;
    async fn product_tags(&mut self, product_id: i64) -> StoreResult<Vec<Tag>>;
    async fn set_product_tags(&mut self, product_id: i64, shop_id: i64, tag_ids: &[i64]) -> StoreResult<()>;
}

/// Conjunctive order filter. Bounds are inclusive; `None` means unbounded.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub shop_id: i64,
    pub user_id: Option<i64>,
    pub statuses: Option<Vec<i32>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn for_shop(shop_id: i64) -> Self {
        Self { shop_id, ..Default::default() }
    }

    pub fn matches(&self, order: &Order) -> bool {
        order.shop_id == self.shop_id
            && self.user_id.map_or(true, |u| order.user_id == u)
            && self.statuses.as_ref().map_or(true, |s| s.contains(&order.status))
            && self.start.map_or(true, |t| order.created_at >= t)
            && self.end.map_or(true, |t| order.created_at <= t)
    }
}

#[async_trait]
pub trait OrderRepository {
    /// Order header with items and item options.
    async fn find_order(&mut self, id: i64) -> StoreResult<Option<Order>>;
    /// Like `find_order` but holds a row lock on the header.
    async fn lock_order(&mut self, id: i64) -> StoreResult<Option<Order>>;
    /// Sorted by `created_at DESC, id DESC`, with the total match count.
    async fn search_orders(&mut self, filter: &OrderFilter, page: Page) -> StoreResult<(Vec<Order>, i64)>;
    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;
    /// Header fields only: status, remark, total, updated_at.
    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;
    async fn replace_order_items(&mut self, order: &Order) -> StoreResult<()>;
    /// Options, items, status logs, then the order.
    async fn delete_order(&mut self, id: i64) -> StoreResult<()>;
    async fn insert_status_log(&mut self, log: &OrderStatusLog) -> StoreResult<()>;
    async fn status_logs(&mut self, order_id: i64) -> StoreResult<Vec<OrderStatusLog>>;
}

#[async_trait]
pub trait RevokedTokenRepository {
    /// Idempotent.
    async fn revoke_token(&mut self, token: &str, expired_at: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<()>;
    async fn is_token_revoked(&mut self, token: &str) -> StoreResult<bool>;
    /// Drops entries with `expired_at < now`; returns how many.
    async fn purge_revoked_tokens(&mut self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait TempTokenRepository {
    async fn find_temp_token(&mut self, shop_id: i64) -> StoreResult<Option<TempToken>>;
    async fn lock_temp_token(&mut self, shop_id: i64) -> StoreResult<Option<TempToken>>;
    async fn upsert_temp_token(&mut self, token: &TempToken) -> StoreResult<()>;
    async fn list_temp_tokens(&mut self) -> StoreResult<Vec<TempToken>>;
}

/// One open transaction.
#[async_trait]
pub trait UnitOfWork:
    OperatorRepository
    + ShopRepository
    + UserRepository
    + ProductRepository
    + TagRepository
    + OrderRepository
    + RevokedTokenRepository
    + TempTokenRepository
    + Send
{
    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

pub type Tx = dyn UnitOfWork;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<Tx>>;
}

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
/// A panic drops the transaction, which discards it as well.
pub async fn with_transaction<T, F>(store: &dyn Store, f: F) -> Result<T, AppError>
where
    T: Send,
    F: for<'a> FnOnce(&'a mut Tx) -> BoxFuture<'a, Result<T, AppError>> + Send,
{
    let mut tx = store.begin().await?;
    match f(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
