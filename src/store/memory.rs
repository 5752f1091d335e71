//! In-process store.
//!
//! A transaction takes the state lock for its whole lifetime and works on a
//! clone; commit writes the clone back, anything else throws it away. This
//! serializes transactions, which is stronger than the row locks `PgStore`
//! takes and gives the same observable outcomes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::*;
use crate::domain::aggregates::RevokedToken;

#[derive(Default, Clone)]
struct MemoryState {
    operators: BTreeMap<i64, Operator>,
    shops: BTreeMap<i64, Shop>,
    users: BTreeMap<i64, User>,
    products: BTreeMap<i64, Product>,
    categories: BTreeMap<i64, OptionCategory>,
    tags: BTreeMap<i64, Tag>,
    /// (product_id, tag_id)
    product_tags: BTreeSet<(i64, i64)>,
    orders: BTreeMap<i64, Order>,
    status_logs: Vec<OrderStatusLog>,
    revoked: HashMap<String, RevokedToken>,
    temp_tokens: BTreeMap<i64, TempToken>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<Tx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

fn conflict(what: &str) -> StoreError {
    StoreError::Conflict(format!("{what} already exists"))
}

/// `created_at DESC, id DESC`, then the requested page.
fn newest_first<T: Clone>(mut rows: Vec<T>, key: impl Fn(&T) -> (DateTime<Utc>, i64), page: Page) -> (Vec<T>, i64) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    let total = rows.len() as i64;
    (page.slice(&rows), total)
}

#[async_trait]
impl OperatorRepository for MemoryTx {
    async fn find_operator(&mut self, id: i64) -> StoreResult<Option<Operator>> {
        Ok(self.working.operators.get(&id).cloned())
    }

    async fn find_operator_by_username(&mut self, username: &str) -> StoreResult<Option<Operator>> {
        Ok(self.working.operators.values().find(|o| o.username == username).cloned())
    }

    async fn insert_operator(&mut self, operator: &Operator) -> StoreResult<()> {
        if self.working.operators.values().any(|o| o.username == operator.username) {
            return Err(conflict("operator username"));
        }
        self.working.operators.insert(operator.id, operator.clone());
        Ok(())
    }

    async fn update_operator_password(&mut self, id: i64, password_hash: &str) -> StoreResult<()> {
        if let Some(op) = self.working.operators.get_mut(&id) {
            op.password_hash = password_hash.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl ShopRepository for MemoryTx {
    async fn find_shop(&mut self, id: i64) -> StoreResult<Option<Shop>> {
        Ok(self.working.shops.get(&id).cloned())
    }

    async fn find_shop_by_owner(&mut self, owner_username: &str) -> StoreResult<Option<Shop>> {
        Ok(self.working.shops.values().find(|s| s.owner_username == owner_username).cloned())
    }

    async fn list_shops(&mut self, page: Page) -> StoreResult<(Vec<Shop>, i64)> {
        let rows = self.working.shops.values().cloned().collect();
        Ok(newest_first(rows, |s: &Shop| (s.created_at, s.id), page))
    }

    async fn insert_shop(&mut self, shop: &Shop) -> StoreResult<()> {
        let shops = &self.working.shops;
        if shops.values().any(|s| s.name == shop.name) {
            return Err(conflict("shop name"));
        }
        if shops.values().any(|s| s.owner_username == shop.owner_username) {
            return Err(conflict("owner username"));
        }
        self.working.shops.insert(shop.id, shop.clone());
        Ok(())
    }

    async fn update_shop(&mut self, shop: &Shop) -> StoreResult<()> {
        let others = || self.working.shops.values().filter(|s| s.id != shop.id);
        if others().any(|s| s.name == shop.name) {
            return Err(conflict("shop name"));
        }
        if others().any(|s| s.owner_username == shop.owner_username) {
            return Err(conflict("owner username"));
        }
        self.working.shops.insert(shop.id, shop.clone());
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryTx {
    async fn find_user(&mut self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_user_by_name(&mut self, name: &str) -> StoreResult<Option<User>> {
        Ok(self.working.users.values().find(|u| u.name == name).cloned())
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        if self.working.users.values().any(|u| u.name == user.name) {
            return Err(conflict("user name"));
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }
}

#[async_trait]
impl CatalogLookup for MemoryTx {
    async fn find_product(&mut self, id: i64) -> StoreResult<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn find_option(&mut self, id: i64) -> StoreResult<Option<ProductOption>> {
        Ok(self
            .working
            .categories
            .values()
            .flat_map(|c| c.options.iter())
            .find(|o| o.id == id)
            .cloned())
    }

    async fn find_option_category(&mut self, id: i64) -> StoreResult<Option<OptionCategory>> {
        Ok(self.working.categories.get(&id).map(|c| OptionCategory { options: Vec::new(), ..c.clone() }))
    }
}

#[async_trait]
impl ProductRepository for MemoryTx {
    async fn lock_product(&mut self, id: i64) -> StoreResult<Option<Product>> {
        self.find_product(id).await
    }

    async fn list_products(
        &mut self,
        shop_id: i64,
        status: Option<ProductStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Product>, i64)> {
        let rows = self
            .working
            .products
            .values()
            .filter(|p| p.shop_id == shop_id && status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        Ok(newest_first(rows, |p: &Product| (p.created_at, p.id), page))
    }

    async fn insert_product(&mut self, product: &Product) -> StoreResult<()> {
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> StoreResult<()> {
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn set_stock(&mut self, product_id: i64, stock: i32) -> StoreResult<()> {
        if let Some(p) = self.working.products.get_mut(&product_id) {
            p.stock = stock;
        }
        Ok(())
    }

    async fn option_categories(&mut self, product_id: i64) -> StoreResult<Vec<OptionCategory>> {
        let mut categories: Vec<OptionCategory> = self
            .working
            .categories
            .values()
            .filter(|c| c.product_id == product_id)
            .cloned()
            .collect();
        categories.sort_by_key(|c| (c.display_order, c.id));
        for c in &mut categories {
            c.options.sort_by_key(|o| (o.display_order, o.id));
        }
        Ok(categories)
    }

    async fn replace_option_categories(
        &mut self,
        product_id: i64,
        categories: &[OptionCategory],
    ) -> StoreResult<()> {
        self.working.categories.retain(|_, c| c.product_id != product_id);
        for c in categories {
            self.working.categories.insert(c.id, c.clone());
        }
        Ok(())
    }

    async fn count_order_items_for_product(&mut self, product_id: i64) -> StoreResult<i64> {
        Ok(self
            .working
            .orders
            .values()
            .flat_map(|o| o.items.iter())
            .filter(|i| i.product_id == product_id)
            .count() as i64)
    }

    async fn delete_product(&mut self, product_id: i64) -> StoreResult<()> {
        self.working.categories.retain(|_, c| c.product_id != product_id);
        self.working.product_tags.retain(|(p, _)| *p != product_id);
        self.working.products.remove(&product_id);
        Ok(())
    }
}

#[async_trait]
impl TagRepository for MemoryTx {
    async fn find_tag(&mut self, id: i64) -> StoreResult<Option<Tag>> {
        Ok(self.working.tags.get(&id).cloned())
    }

    async fn list_tags(&mut self, shop_id: i64) -> StoreResult<Vec<Tag>> {
        let mut tags: Vec<Tag> = self.working.tags.values().filter(|t| t.shop_id == shop_id).cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(tags)
    }

    async fn insert_tag(&mut self, tag: &Tag) -> StoreResult<()> {
        if self.working.tags.values().any(|t| t.shop_id == tag.shop_id && t.name == tag.name) {
            return Err(conflict("tag name"));
        }
        self.working.tags.insert(tag.id, tag.clone());
        Ok(())
    }

    async fn delete_tag(&mut self, id: i64) -> StoreResult<()> {
        self.working.tags.remove(&id);
        Ok(())
    }

    async fn count_tag_links(&mut self, tag_id: i64) -> StoreResult<i64> {
        Ok(self.working.product_tags.iter().filter(|(_, t)| *t == tag_id).count() as i64)
    }

    async fn product_tags(&mut self, product_id: i64) -> StoreResult<Vec<Tag>> {
        let state = &self.working;
        let mut tags: Vec<Tag> = state
            .product_tags
            .iter()
            .filter(|(p, _)| *p == product_id)
            .filter_map(|(_, t)| state.tags.get(t).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(tags)
    }

    async fn set_product_tags(&mut self, product_id: i64, _shop_id: i64, tag_ids: &[i64]) -> StoreResult<()> {
        self.working.product_tags.retain(|(p, _)| *p != product_id);
        for tag_id in tag_ids {
            self.working.product_tags.insert((product_id, *tag_id));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryTx {
    async fn find_order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        self.find_order(id).await
    }

    async fn search_orders(&mut self, filter: &OrderFilter, page: Page) -> StoreResult<(Vec<Order>, i64)> {
        let rows = self.working.orders.values().filter(|o| filter.matches(o)).cloned().collect();
        Ok(newest_first(rows, |o: &Order| (o.created_at, o.id), page))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        if let Some(stored) = self.working.orders.get_mut(&order.id) {
            stored.status = order.status;
            stored.remark = order.remark.clone();
            stored.total_price = order.total_price;
            stored.updated_at = order.updated_at;
        }
        Ok(())
    }

    async fn replace_order_items(&mut self, order: &Order) -> StoreResult<()> {
        if let Some(stored) = self.working.orders.get_mut(&order.id) {
            stored.items = order.items.clone();
        }
        Ok(())
    }

    async fn delete_order(&mut self, id: i64) -> StoreResult<()> {
        self.working.status_logs.retain(|l| l.order_id != id);
        self.working.orders.remove(&id);
        Ok(())
    }

    async fn insert_status_log(&mut self, log: &OrderStatusLog) -> StoreResult<()> {
        self.working.status_logs.push(log.clone());
        Ok(())
    }

    async fn status_logs(&mut self, order_id: i64) -> StoreResult<Vec<OrderStatusLog>> {
        Ok(self.working.status_logs.iter().filter(|l| l.order_id == order_id).cloned().collect())
    }
}

#[async_trait]
impl RevokedTokenRepository for MemoryTx {
    async fn revoke_token(&mut self, token: &str, expired_at: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<()> {
        self.working
            .revoked
            .entry(token.to_string())
            .or_insert_with(|| RevokedToken { token: token.to_string(), expired_at, created_at: now });
        Ok(())
    }

    async fn is_token_revoked(&mut self, token: &str) -> StoreResult<bool> {
        Ok(self.working.revoked.contains_key(token))
    }

    async fn purge_revoked_tokens(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let before = self.working.revoked.len();
        self.working.revoked.retain(|_, r| r.expired_at >= now);
        Ok((before - self.working.revoked.len()) as u64)
    }
}

#[async_trait]
impl TempTokenRepository for MemoryTx {
    async fn find_temp_token(&mut self, shop_id: i64) -> StoreResult<Option<TempToken>> {
        Ok(self.working.temp_tokens.get(&shop_id).cloned())
    }

    async fn lock_temp_token(&mut self, shop_id: i64) -> StoreResult<Option<TempToken>> {
        self.find_temp_token(shop_id).await
    }

    async fn upsert_temp_token(&mut self, token: &TempToken) -> StoreResult<()> {
        self.working.temp_tokens.insert(token.shop_id, token.clone());
        Ok(())
    }

    async fn list_temp_tokens(&mut self) -> StoreResult<Vec<TempToken>> {
        Ok(self.working.temp_tokens.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::UserType;

    fn user(name: &str) -> User {
        let mut u = User::system_for_shop(1, Utc::now());
        u.name = name.to_string();
        u.kind = UserType::Pickup;
        u
    }

    #[tokio::test]
    async fn commit_publishes_and_drop_discards() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user("kept")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user("dropped")).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_user_by_name("kept").await.unwrap().is_some());
        assert!(tx.find_user_by_name("dropped").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unique_names_conflict() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user("a")).await.unwrap();
        let err = tx.insert_user(&user("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn purge_keeps_unexpired_entries() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();
        tx.revoke_token("old", now - chrono::Duration::seconds(1), now).await.unwrap();
        tx.revoke_token("new", now + chrono::Duration::seconds(60), now).await.unwrap();
        assert_eq!(tx.purge_revoked_tokens(now).await.unwrap(), 1);
        assert!(!tx.is_token_revoked("old").await.unwrap());
        assert!(tx.is_token_revoked("new").await.unwrap());
    }
}
