//! PostgreSQL store.
//!
//! Transactions run at READ COMMITTED. Rows whose current value a transaction
//! reads and then writes back (product stock, order status, a shop's temp
//! token) are read with `SELECT ... FOR UPDATE`; products are always locked in
//! ascending id order by the callers.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool, Postgres, QueryBuilder, Transaction};

use super::*;
use crate::domain::aggregates::{OrderItem, OrderItemOption, UserRole, UserType};
use crate::domain::flow::OrderStatusFlow;
use crate::domain::value_objects::Money;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// `database.log_level`: 1 silent, 2 error, 3 warn, 4 info, 5 debug.
pub fn statement_log_level(level: u8) -> log::LevelFilter {
    match level {
        0 | 1 => log::LevelFilter::Off,
        2 => log::LevelFilter::Error,
        3 => log::LevelFilter::Warn,
        4 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}

impl PgStore {
    pub async fn connect(dsn: &str, log_level: u8) -> StoreResult<Self> {
        let options = PgConnectOptions::from_str(dsn)?.log_statements(statement_log_level(log_level));
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<Tx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Unique violations become `Conflict` named after the violated index.
fn write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let what = match db.constraint() {
                Some("uq_shops_name") => "shop name",
                Some("uq_shops_owner_username") => "owner username",
                Some("uq_operators_username") => "operator username",
                Some("uq_users_name") => "user name",
                Some("uq_tags_shop_name") => "tag name",
                _ => "record",
            };
            return StoreError::Conflict(format!("{what} already exists"));
        }
    }
    StoreError::Database(err)
}

fn corrupt(what: &str, id: impl std::fmt::Display, cause: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what} {id}: {cause}"))
}

// ---- rows ----------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct OperatorRow {
    id: i64,
    username: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<OperatorRow> for Operator {
    fn from(r: OperatorRow) -> Self {
        Operator { id: r.id, username: r.username, password_hash: r.password_hash, created_at: r.created_at }
    }
}

const SHOP_COLUMNS: &str = "id, name, owner_username, owner_password_hash, contact_phone, contact_email, \
     address, description, image_ref, valid_until, settings, order_status_flow, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ShopRow {
    id: i64,
    name: String,
    owner_username: String,
    owner_password_hash: String,
    contact_phone: String,
    contact_email: String,
    address: String,
    description: String,
    image_ref: String,
    valid_until: DateTime<Utc>,
    settings: String,
    order_status_flow: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShopRow> for Shop {
    type Error = StoreError;

    fn try_from(r: ShopRow) -> Result<Self, Self::Error> {
        let order_status_flow =
            OrderStatusFlow::parse(&r.order_status_flow).map_err(|e| corrupt("shop flow", r.id, e))?;
        let settings = serde_json::from_str(&r.settings).map_err(|e| corrupt("shop settings", r.id, e))?;
        Ok(Shop {
            id: r.id,
            name: r.name,
            owner_username: r.owner_username,
            owner_password_hash: r.owner_password_hash,
            contact_phone: r.contact_phone,
            contact_email: r.contact_email,
            address: r.address,
            description: r.description,
            image_ref: r.image_ref,
            valid_until: r.valid_until,
            settings,
            order_status_flow,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    nickname: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    role: String,
    #[sqlx(rename = "type")]
    kind: String,
    password_hash: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role = UserRole::parse(&r.role).ok_or_else(|| corrupt("user role", r.id, &r.role))?;
        let kind = UserType::parse(&r.kind).ok_or_else(|| corrupt("user type", r.id, &r.kind))?;
        Ok(User {
            id: r.id,
            name: r.name,
            nickname: r.nickname,
            phone: r.phone,
            address: r.address,
            role,
            kind,
            password_hash: r.password_hash,
            created_at: r.created_at,
        })
    }
}

const PRODUCT_COLUMNS: &str =
    "id, shop_id, name, description, image_ref, price, stock, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    shop_id: i64,
    name: String,
    description: String,
    image_ref: String,
    price: Decimal,
    stock: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(r: ProductRow) -> Result<Self, Self::Error> {
        let status = ProductStatus::parse(&r.status).map_err(|e| corrupt("product", r.id, e))?;
        Ok(Product {
            id: r.id,
            shop_id: r.shop_id,
            name: r.name,
            description: r.description,
            image_ref: r.image_ref,
            price: Money::new(r.price),
            stock: r.stock,
            status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: i64,
    product_id: i64,
    name: String,
    is_required: bool,
    is_multiple: bool,
    display_order: i32,
}

impl From<CategoryRow> for OptionCategory {
    fn from(r: CategoryRow) -> Self {
        OptionCategory {
            id: r.id,
            product_id: r.product_id,
            name: r.name,
            is_required: r.is_required,
            is_multiple: r.is_multiple,
            display_order: r.display_order,
            options: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    id: i64,
    category_id: i64,
    name: String,
    price_adjustment: Decimal,
    is_default: bool,
    display_order: i32,
}

impl From<OptionRow> for ProductOption {
    fn from(r: OptionRow) -> Self {
        ProductOption {
            id: r.id,
            category_id: r.category_id,
            name: r.name,
            price_adjustment: Money::new(r.price_adjustment),
            is_default: r.is_default,
            display_order: r.display_order,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TagRow {
    id: i64,
    shop_id: i64,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl From<TagRow> for Tag {
    fn from(r: TagRow) -> Self {
        Tag { id: r.id, shop_id: r.shop_id, name: r.name, description: r.description, created_at: r.created_at }
    }
}

const ORDER_COLUMNS: &str = "id, user_id, shop_id, total_price, status, remark, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    shop_id: i64,
    total_price: Decimal,
    status: i32,
    remark: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(r: OrderRow) -> Self {
        Order {
            id: r.id,
            user_id: r.user_id,
            shop_id: r.shop_id,
            total_price: Money::new(r.total_price),
            status: r.status,
            remark: r.remark,
            items: Vec::new(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    product_id: i64,
    quantity: i32,
    unit_price_snapshot: Decimal,
    total_price: Decimal,
    product_name_snapshot: String,
    product_description_snapshot: String,
    product_image_snapshot: String,
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        OrderItem {
            id: r.id,
            order_id: r.order_id,
            product_id: r.product_id,
            quantity: r.quantity,
            unit_price_snapshot: Money::new(r.unit_price_snapshot),
            total_price: Money::new(r.total_price),
            product_name_snapshot: r.product_name_snapshot,
            product_description_snapshot: r.product_description_snapshot,
            product_image_snapshot: r.product_image_snapshot,
            options: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemOptionRow {
    id: i64,
    order_item_id: i64,
    category_id: i64,
    option_id: i64,
    option_name_snapshot: String,
    category_name_snapshot: String,
    price_adjustment_snapshot: Decimal,
}

impl From<OrderItemOptionRow> for OrderItemOption {
    fn from(r: OrderItemOptionRow) -> Self {
        OrderItemOption {
            id: r.id,
            order_item_id: r.order_item_id,
            category_id: r.category_id,
            option_id: r.option_id,
            option_name_snapshot: r.option_name_snapshot,
            category_name_snapshot: r.category_name_snapshot,
            price_adjustment_snapshot: Money::new(r.price_adjustment_snapshot),
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatusLogRow {
    id: i64,
    order_id: i64,
    old_status: i32,
    new_status: i32,
    changed_time: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TempTokenRow {
    shop_id: i64,
    user_id: i64,
    token: String,
    expires_at: DateTime<Utc>,
}

impl From<TempTokenRow> for TempToken {
    fn from(r: TempTokenRow) -> Self {
        TempToken { shop_id: r.shop_id, user_id: r.user_id, token: r.token, expires_at: r.expires_at }
    }
}

// ---- helpers -------------------------------------------------------------

impl PgUnitOfWork {
    /// Attach items and their options to already loaded order headers.
    async fn load_items(&mut self, orders: &mut [Order]) -> StoreResult<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let order_ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let item_rows: Vec<OrderItemRow> = sqlx::query_as(
            "SELECT id, order_id, product_id, quantity, unit_price_snapshot, total_price, \
             product_name_snapshot, product_description_snapshot, product_image_snapshot \
             FROM order_items WHERE order_id = ANY($1) ORDER BY id",
        )
        .bind(&order_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let item_ids: Vec<i64> = item_rows.iter().map(|i| i.id).collect();
        let option_rows: Vec<OrderItemOptionRow> = sqlx::query_as(
            "SELECT id, order_item_id, category_id, option_id, option_name_snapshot, \
             category_name_snapshot, price_adjustment_snapshot \
             FROM order_item_options WHERE order_item_id = ANY($1) ORDER BY id",
        )
        .bind(&item_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut items: Vec<OrderItem> = item_rows.into_iter().map(OrderItem::from).collect();
        for option in option_rows {
            if let Some(item) = items.iter_mut().find(|i| i.id == option.order_item_id) {
                item.options.push(option.into());
            }
        }
        for item in items {
            if let Some(order) = orders.iter_mut().find(|o| o.id == item.order_id) {
                order.items.push(item);
            }
        }
        Ok(())
    }

    async fn insert_items(&mut self, order: &Order) -> StoreResult<()> {
        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price_snapshot, total_price, \
                 product_name_snapshot, product_description_snapshot, product_image_snapshot) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price_snapshot.amount())
            .bind(item.total_price.amount())
            .bind(&item.product_name_snapshot)
            .bind(&item.product_description_snapshot)
            .bind(&item.product_image_snapshot)
            .execute(&mut *self.tx)
            .await?;

            for option in &item.options {
                sqlx::query(
                    "INSERT INTO order_item_options (id, order_item_id, category_id, option_id, \
                     option_name_snapshot, category_name_snapshot, price_adjustment_snapshot) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(option.id)
                .bind(item.id)
                .bind(option.category_id)
                .bind(option.option_id)
                .bind(&option.option_name_snapshot)
                .bind(&option.category_name_snapshot)
                .bind(option.price_adjustment_snapshot.amount())
                .execute(&mut *self.tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn delete_items(&mut self, order_id: i64) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM order_item_options WHERE order_item_id IN \
             (SELECT id FROM order_items WHERE order_id = $1)",
        )
        .bind(order_id)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn fetch_order(&mut self, id: i64, lock: bool) -> StoreResult<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut orders = [Order::from(row)];
        self.load_items(&mut orders).await?;
        let [order] = orders;
        Ok(Some(order))
    }
}

fn push_order_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    qb.push(" WHERE shop_id = ").push_bind(filter.shop_id);
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(statuses) = &filter.statuses {
        qb.push(" AND status = ANY(").push_bind(statuses.clone()).push(")");
    }
    if let Some(start) = filter.start {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND created_at <= ").push_bind(end);
    }
}

// ---- repositories --------------------------------------------------------

#[async_trait]
impl OperatorRepository for PgUnitOfWork {
    async fn find_operator(&mut self, id: i64) -> StoreResult<Option<Operator>> {
        let row: Option<OperatorRow> =
            sqlx::query_as("SELECT id, username, password_hash, created_at FROM operators WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(Operator::from))
    }

    async fn find_operator_by_username(&mut self, username: &str) -> StoreResult<Option<Operator>> {
        let row: Option<OperatorRow> =
            sqlx::query_as("SELECT id, username, password_hash, created_at FROM operators WHERE username = $1")
                .bind(username)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(Operator::from))
    }

    async fn insert_operator(&mut self, operator: &Operator) -> StoreResult<()> {
        sqlx::query("INSERT INTO operators (id, username, password_hash, created_at) VALUES ($1, $2, $3, $4)")
            .bind(operator.id)
            .bind(&operator.username)
            .bind(&operator.password_hash)
            .bind(operator.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn update_operator_password(&mut self, id: i64, password_hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE operators SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ShopRepository for PgUnitOfWork {
    async fn find_shop(&mut self, id: i64) -> StoreResult<Option<Shop>> {
        let sql = format!("SELECT {SHOP_COLUMNS} FROM shops WHERE id = $1");
        let row: Option<ShopRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.map(Shop::try_from).transpose()
    }

    async fn find_shop_by_owner(&mut self, owner_username: &str) -> StoreResult<Option<Shop>> {
        let sql = format!("SELECT {SHOP_COLUMNS} FROM shops WHERE owner_username = $1");
        let row: Option<ShopRow> = sqlx::query_as(&sql)
            .bind(owner_username)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Shop::try_from).transpose()
    }

    async fn list_shops(&mut self, page: Page) -> StoreResult<(Vec<Shop>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shops")
            .fetch_one(&mut *self.tx)
            .await?;
        let sql = format!("SELECT {SHOP_COLUMNS} FROM shops ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2");
        let rows: Vec<ShopRow> = sqlx::query_as(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&mut *self.tx)
            .await?;
        let shops = rows.into_iter().map(Shop::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok((shops, total))
    }

    async fn insert_shop(&mut self, shop: &Shop) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO shops (id, name, owner_username, owner_password_hash, contact_phone, contact_email, \
             address, description, image_ref, valid_until, settings, order_status_flow, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(shop.id)
        .bind(&shop.name)
        .bind(&shop.owner_username)
        .bind(&shop.owner_password_hash)
        .bind(&shop.contact_phone)
        .bind(&shop.contact_email)
        .bind(&shop.address)
        .bind(&shop.description)
        .bind(&shop.image_ref)
        .bind(shop.valid_until)
        .bind(shop.settings.to_string())
        .bind(shop.order_status_flow.to_json())
        .bind(shop.created_at)
        .bind(shop.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn update_shop(&mut self, shop: &Shop) -> StoreResult<()> {
        sqlx::query(
            "UPDATE shops SET name = $2, owner_username = $3, owner_password_hash = $4, contact_phone = $5, \
             contact_email = $6, address = $7, description = $8, image_ref = $9, valid_until = $10, \
             settings = $11, order_status_flow = $12, updated_at = $13 WHERE id = $1",
        )
        .bind(shop.id)
        .bind(&shop.name)
        .bind(&shop.owner_username)
        .bind(&shop.owner_password_hash)
        .bind(&shop.contact_phone)
        .bind(&shop.contact_email)
        .bind(&shop.address)
        .bind(&shop.description)
        .bind(&shop.image_ref)
        .bind(shop.valid_until)
        .bind(shop.settings.to_string())
        .bind(shop.order_status_flow.to_json())
        .bind(shop.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }
}

const USER_COLUMNS: &str = "id, name, nickname, phone, address, role, type, password_hash, created_at";

#[async_trait]
impl UserRepository for PgUnitOfWork {
    async fn find_user(&mut self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row: Option<UserRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_name(&mut self, name: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE name = $1");
        let row: Option<UserRow> = sqlx::query_as(&sql).bind(name).fetch_optional(&mut *self.tx).await?;
        row.map(User::try_from).transpose()
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, nickname, phone, address, role, type, password_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.nickname)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(user.role.as_str())
        .bind(user.kind.as_str())
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }
}

#[async_trait]
impl CatalogLookup for PgUnitOfWork {
    async fn find_product(&mut self, id: i64) -> StoreResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row: Option<ProductRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.map(Product::try_from).transpose()
    }

    async fn find_option(&mut self, id: i64) -> StoreResult<Option<ProductOption>> {
        let row: Option<OptionRow> = sqlx::query_as(
            "SELECT id, category_id, name, price_adjustment, is_default, display_order \
             FROM product_options WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(ProductOption::from))
    }

    async fn find_option_category(&mut self, id: i64) -> StoreResult<Option<OptionCategory>> {
        let row: Option<CategoryRow> = sqlx::query_as(
            "SELECT id, product_id, name, is_required, is_multiple, display_order \
             FROM product_option_categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(OptionCategory::from))
    }
}

#[async_trait]
impl ProductRepository for PgUnitOfWork {
    async fn lock_product(&mut self, id: i64) -> StoreResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE");
        let row: Option<ProductRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.map(Product::try_from).transpose()
    }

    async fn list_products(
        &mut self,
        shop_id: i64,
        status: Option<ProductStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Product>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products WHERE shop_id = ");
        count.push_bind(shop_id);
        if let Some(status) = status {
            count.push(" AND status = ").push_bind(status.as_str());
        }
        let total: i64 = count.build_query_scalar().fetch_one(&mut *self.tx).await?;

        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE shop_id = "));
        query.push_bind(shop_id);
        if let Some(status) = status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<ProductRow> = query.build_query_as().fetch_all(&mut *self.tx).await?;
        let products = rows.into_iter().map(Product::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok((products, total))
    }

    async fn insert_product(&mut self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO products (id, shop_id, name, description, image_ref, price, stock, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(product.id)
        .bind(product.shop_id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.image_ref)
        .bind(product.price.amount())
        .bind(product.stock)
        .bind(product.status.as_str())
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            "UPDATE products SET name = $2, description = $3, image_ref = $4, price = $5, stock = $6, \
             status = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.image_ref)
        .bind(product.price.amount())
        .bind(product.stock)
        .bind(product.status.as_str())
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_stock(&mut self, product_id: i64, stock: i32) -> StoreResult<()> {
        sqlx::query("UPDATE products SET stock = $2 WHERE id = $1")
            .bind(product_id)
            .bind(stock)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn option_categories(&mut self, product_id: i64) -> StoreResult<Vec<OptionCategory>> {
        let rows: Vec<CategoryRow> = sqlx::query_as(
            "SELECT id, product_id, name, is_required, is_multiple, display_order \
             FROM product_option_categories WHERE product_id = $1 ORDER BY display_order, id",
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await?;
        let options: Vec<OptionRow> = sqlx::query_as(
            "SELECT o.id, o.category_id, o.name, o.price_adjustment, o.is_default, o.display_order \
             FROM product_options o JOIN product_option_categories c ON c.id = o.category_id \
             WHERE c.product_id = $1 ORDER BY o.display_order, o.id",
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut categories: Vec<OptionCategory> = rows.into_iter().map(OptionCategory::from).collect();
        for option in options {
            if let Some(c) = categories.iter_mut().find(|c| c.id == option.category_id) {
                c.options.push(option.into());
            }
        }
        Ok(categories)
    }

    async fn replace_option_categories(
        &mut self,
        product_id: i64,
        categories: &[OptionCategory],
    ) -> StoreResult<()> {
        // options go with their categories through ON DELETE CASCADE
        sqlx::query("DELETE FROM product_option_categories WHERE product_id = $1")
            .bind(product_id)
            .execute(&mut *self.tx)
            .await?;
        for category in categories {
            sqlx::query(
                "INSERT INTO product_option_categories (id, product_id, name, is_required, is_multiple, display_order) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(category.id)
            .bind(product_id)
            .bind(&category.name)
            .bind(category.is_required)
            .bind(category.is_multiple)
            .bind(category.display_order)
            .execute(&mut *self.tx)
            .await?;
            for option in &category.options {
                sqlx::query(
                    "INSERT INTO product_options (id, category_id, name, price_adjustment, is_default, display_order) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(option.id)
                .bind(category.id)
                .bind(&option.name)
                .bind(option.price_adjustment.amount())
                .bind(option.is_default)
                .bind(option.display_order)
                .execute(&mut *self.tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn count_order_items_for_product(&mut self, product_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items WHERE product_id = $1")
            .bind(product_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn delete_product(&mut self, product_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TagRepository for PgUnitOfWork {
    async fn find_tag(&mut self, id: i64) -> StoreResult<Option<Tag>> {
        let row: Option<TagRow> =
            sqlx::query_as("SELECT id, shop_id, name, description, created_at FROM tags WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(Tag::from))
    }

    async fn list_tags(&mut self, shop_id: i64) -> StoreResult<Vec<Tag>> {
        let rows: Vec<TagRow> = sqlx::query_as(
            "SELECT id, shop_id, name, description, created_at FROM tags WHERE shop_id = $1 ORDER BY name, id",
        )
        .bind(shop_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Tag::from).collect())
    }

    async fn insert_tag(&mut self, tag: &Tag) -> StoreResult<()> {
        sqlx::query("INSERT INTO tags (id, shop_id, name, description, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(tag.id)
            .bind(tag.shop_id)
            .bind(&tag.name)
            .bind(&tag.description)
            .bind(tag.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn delete_tag(&mut self, id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn count_tag_links(&mut self, tag_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_tags WHERE tag_id = $1")
            .bind(tag_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn product_tags(&mut self, product_id: i64) -> StoreResult<Vec<Tag>> {
        let rows: Vec<TagRow> = sqlx::query_as(
            "SELECT t.id, t.shop_id, t.name, t.description, t.created_at \
             FROM tags t JOIN product_tags pt ON pt.tag_id = t.id \
             WHERE pt.product_id = $1 ORDER BY t.name, t.id",
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Tag::from).collect())
    }

    async fn set_product_tags(&mut self, product_id: i64, shop_id: i64, tag_ids: &[i64]) -> StoreResult<()> {
        sqlx::query("DELETE FROM product_tags WHERE product_id = $1")
            .bind(product_id)
            .execute(&mut *self.tx)
            .await?;
        for tag_id in tag_ids {
            sqlx::query(
                "INSERT INTO product_tags (product_id, tag_id, shop_id) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(product_id)
            .bind(tag_id)
            .bind(shop_id)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgUnitOfWork {
    async fn find_order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        self.fetch_order(id, false).await
    }

    async fn lock_order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        self.fetch_order(id, true).await
    }

    async fn search_orders(&mut self, filter: &OrderFilter, page: Page) -> StoreResult<(Vec<Order>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
        push_order_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&mut *self.tx).await?;

        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders"));
        push_order_filter(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<OrderRow> = query.build_query_as().fetch_all(&mut *self.tx).await?;

        let mut orders: Vec<Order> = rows.into_iter().map(Order::from).collect();
        self.load_items(&mut orders).await?;
        Ok((orders, total))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, shop_id, total_price, status, remark, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.shop_id)
        .bind(order.total_price.amount())
        .bind(order.status)
        .bind(&order.remark)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        self.insert_items(order).await
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            "UPDATE orders SET status = $2, remark = $3, total_price = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(order.id)
        .bind(order.status)
        .bind(&order.remark)
        .bind(order.total_price.amount())
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn replace_order_items(&mut self, order: &Order) -> StoreResult<()> {
        self.delete_items(order.id).await?;
        self.insert_items(order).await
    }

    async fn delete_order(&mut self, id: i64) -> StoreResult<()> {
        self.delete_items(id).await?;
        sqlx::query("DELETE FROM order_status_logs WHERE order_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_status_log(&mut self, log: &OrderStatusLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO order_status_logs (id, order_id, old_status, new_status, changed_time) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(log.id)
        .bind(log.order_id)
        .bind(log.old_status)
        .bind(log.new_status)
        .bind(log.changed_time)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn status_logs(&mut self, order_id: i64) -> StoreResult<Vec<OrderStatusLog>> {
        let rows: Vec<StatusLogRow> = sqlx::query_as(
            "SELECT id, order_id, old_status, new_status, changed_time FROM order_status_logs \
             WHERE order_id = $1 ORDER BY changed_time, id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| OrderStatusLog {
                id: r.id,
                order_id: r.order_id,
                old_status: r.old_status,
                new_status: r.new_status,
                changed_time: r.changed_time,
            })
            .collect())
    }
}

#[async_trait]
impl RevokedTokenRepository for PgUnitOfWork {
    async fn revoke_token(&mut self, token: &str, expired_at: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO revoked_tokens (token, expired_at, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (token) DO NOTHING",
        )
        .bind(token)
        .bind(expired_at)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn is_token_revoked(&mut self, token: &str) -> StoreResult<bool> {
        let found: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE token = $1)")
            .bind(token)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(found)
    }

    async fn purge_revoked_tokens(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expired_at < $1")
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TempTokenRepository for PgUnitOfWork {
    async fn find_temp_token(&mut self, shop_id: i64) -> StoreResult<Option<TempToken>> {
        let row: Option<TempTokenRow> =
            sqlx::query_as("SELECT shop_id, user_id, token, expires_at FROM temp_tokens WHERE shop_id = $1")
                .bind(shop_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(TempToken::from))
    }

    async fn lock_temp_token(&mut self, shop_id: i64) -> StoreResult<Option<TempToken>> {
        let row: Option<TempTokenRow> = sqlx::query_as(
            "SELECT shop_id, user_id, token, expires_at FROM temp_tokens WHERE shop_id = $1 FOR UPDATE",
        )
        .bind(shop_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(TempToken::from))
    }

    async fn upsert_temp_token(&mut self, token: &TempToken) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO temp_tokens (shop_id, user_id, token, expires_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (shop_id) DO UPDATE SET user_id = EXCLUDED.user_id, token = EXCLUDED.token, \
             expires_at = EXCLUDED.expires_at",
        )
        .bind(token.shop_id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_temp_tokens(&mut self) -> StoreResult<Vec<TempToken>> {
        let rows: Vec<TempTokenRow> =
            sqlx::query_as("SELECT shop_id, user_id, token, expires_at FROM temp_tokens ORDER BY shop_id")
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(rows.into_iter().map(TempToken::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_map_to_filters() {
        assert_eq!(statement_log_level(1), log::LevelFilter::Off);
        assert_eq!(statement_log_level(2), log::LevelFilter::Error);
        assert_eq!(statement_log_level(3), log::LevelFilter::Warn);
        assert_eq!(statement_log_level(4), log::LevelFilter::Info);
        assert_eq!(statement_log_level(5), log::LevelFilter::Debug);
    }

    #[test]
    fn order_filter_sql_composes_with_and() {
        let filter = OrderFilter {
            shop_id: 1,
            user_id: Some(7),
            statuses: Some(vec![1, 2]),
            start: Some(Utc::now()),
            end: None,
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
        push_order_filter(&mut qb, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM orders WHERE shop_id = $1 AND user_id = $2 AND status = ANY($3) AND created_at >= $4"
        );
    }
}
