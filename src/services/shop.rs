//! Shop management and the per-shop status-flow cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::RwLock;

use crate::auth::{password, Policy, Principal};
use crate::clock::Clock;
use crate::domain::aggregates::Shop;
use crate::domain::flow::OrderStatusFlow;
use crate::domain::value_objects::{Page, Paginated};
use crate::error::{AppError, Result};
use crate::store::{with_transaction, Store, Tx};

/// Parsed flows keyed by shop id. Every replacement bumps the shop's
/// generation, and a loaded flow is only cached if the generation it was
/// loaded under is still current.
#[derive(Clone, Default)]
pub struct FlowCache {
    entries: Arc<RwLock<FlowEntries>>,
}

#[derive(Default)]
struct FlowEntries {
    flows: HashMap<i64, Arc<OrderStatusFlow>>,
    generations: HashMap<i64, u64>,
}

impl FlowCache {
    pub async fn get(&self, shop_id: i64) -> Option<Arc<OrderStatusFlow>> {
        self.entries.read().await.flows.get(&shop_id).cloned()
    }

    /// Generation to pass to [`FlowCache::put`] for a load that starts now.
    pub async fn generation(&self, shop_id: i64) -> u64 {
        self.entries.read().await.generations.get(&shop_id).copied().unwrap_or(0)
    }

    /// Cache a flow read from the store. Returns false, caching nothing, when
    /// the flow was replaced after `seen` was taken.
    pub async fn put(&self, shop_id: i64, seen: u64, flow: Arc<OrderStatusFlow>) -> bool {
        let mut entries = self.entries.write().await;
        if entries.generations.get(&shop_id).copied().unwrap_or(0) != seen {
            return false;
        }
        entries.flows.insert(shop_id, flow);
        true
    }

    /// Install a freshly committed flow.
    pub async fn replace(&self, shop_id: i64, flow: Arc<OrderStatusFlow>) {
        let mut entries = self.entries.write().await;
        *entries.generations.entry(shop_id).or_insert(0) += 1;
        entries.flows.insert(shop_id, flow);
    }
}

#[derive(Debug, Clone)]
pub struct NewShop {
    pub name: String,
    pub owner_username: String,
    pub owner_password: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub address: String,
    pub description: String,
    pub image_ref: String,
    pub valid_until: DateTime<Utc>,
    pub settings: serde_json::Value,
    pub order_status_flow: Option<OrderStatusFlow>,
}

/// Profile fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ShopUpdate {
    pub name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub image_ref: Option<String>,
    pub settings: Option<serde_json::Value>,
    /// Operators only.
    pub valid_until: Option<DateTime<Utc>>,
}

pub(crate) async fn load_shop(tx: &mut Tx, shop_id: i64) -> Result<Shop> {
    tx.find_shop(shop_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("shop {shop_id}")))
}

pub struct ShopService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    flows: FlowCache,
}

impl ShopService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, flows: FlowCache) -> Self {
        Self { store, clock, flows }
    }

    pub async fn create_shop(&self, principal: &Principal, new: NewShop) -> Result<Shop> {
        principal.require_operator()?;
        if new.name.trim().is_empty() {
            return Err(AppError::invalid("shop name is required"));
        }
        if new.owner_username.trim().is_empty() {
            return Err(AppError::invalid("owner username is required"));
        }
        Policy::Strict.check(&new.owner_password)?;
        let flow = new.order_status_flow.unwrap_or_default();
        flow.validate()?;

        let now = self.clock.now();
        let shop = Shop {
            id: crate::id::next_id(),
            name: new.name.trim().to_string(),
            owner_username: new.owner_username.trim().to_string(),
            owner_password_hash: password::hash(&new.owner_password)?,
            contact_phone: new.contact_phone,
            contact_email: new.contact_email,
            address: new.address,
            description: new.description,
            image_ref: new.image_ref,
            valid_until: new.valid_until,
            settings: new.settings,
            order_status_flow: flow,
            created_at: now,
            updated_at: now,
        };

        let created = shop.clone();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                if tx.find_operator_by_username(&shop.owner_username).await?.is_some() {
                    return Err(AppError::Conflict("owner username already exists".into()));
                }
                tx.insert_shop(&shop).await?;
                Ok(())
            }
            .boxed()
        })
        .await?;

        tracing::info!(shop_id = created.id, name = %created.name, "shop created");
        Ok(created)
    }

    pub async fn get_shop(&self, principal: &Principal, shop_id: i64) -> Result<Shop> {
        principal.require_staff(shop_id)?;
        with_transaction(self.store.as_ref(), move |tx| load_shop(tx, shop_id).boxed()).await
    }

    pub async fn list_shops(&self, principal: &Principal, page: Page) -> Result<Paginated<Shop>> {
        principal.require_operator()?;
        let (shops, total) =
            with_transaction(self.store.as_ref(), move |tx| async move { Ok(tx.list_shops(page).await?) }.boxed())
                .await?;
        Ok(Paginated::new(shops, total, page))
    }

    pub async fn update_shop(&self, principal: &Principal, shop_id: i64, update: ShopUpdate) -> Result<Shop> {
        principal.require_staff(shop_id)?;
        if update.valid_until.is_some() {
            principal.require_operator()?;
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::invalid("shop name must not be empty"));
        }
        let now = self.clock.now();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let mut shop = load_shop(tx, shop_id).await?;
                if let Some(name) = update.name {
                    shop.name = name.trim().to_string();
                }
                if let Some(v) = update.contact_phone {
                    shop.contact_phone = v;
                }
                if let Some(v) = update.contact_email {
                    shop.contact_email = v;
                }
                if let Some(v) = update.address {
                    shop.address = v;
                }
                if let Some(v) = update.description {
                    shop.description = v;
                }
                if let Some(v) = update.image_ref {
                    shop.image_ref = v;
                }
                if let Some(v) = update.settings {
                    shop.settings = v;
                }
                if let Some(v) = update.valid_until {
                    shop.valid_until = v;
                }
                shop.updated_at = now;
                tx.update_shop(&shop).await?;
                Ok(shop)
            }
            .boxed()
        })
        .await
    }

    /// Current flow of a shop, served from the cache when possible.
    pub async fn flow(&self, shop_id: i64) -> Result<Arc<OrderStatusFlow>> {
        if let Some(flow) = self.flows.get(shop_id).await {
            return Ok(flow);
        }
        let seen = self.flows.generation(shop_id).await;
        let shop = with_transaction(self.store.as_ref(), move |tx| load_shop(tx, shop_id).boxed()).await?;
        let flow = Arc::new(shop.order_status_flow);
        if !self.flows.put(shop_id, seen, flow.clone()).await {
            tracing::debug!(shop_id, "flow replaced during load, not caching");
        }
        Ok(flow)
    }

    pub async fn get_flow(&self, principal: &Principal, shop_id: i64) -> Result<Arc<OrderStatusFlow>> {
        principal.require_shop(shop_id)?;
        self.flow(shop_id).await
    }

    pub async fn replace_flow(
        &self,
        principal: &Principal,
        shop_id: i64,
        flow: OrderStatusFlow,
    ) -> Result<Arc<OrderStatusFlow>> {
        principal.require_staff(shop_id)?;
        flow.validate()?;
        let now = self.clock.now();
        let stored = flow.clone();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let mut shop = load_shop(tx, shop_id).await?;
                shop.order_status_flow = stored;
                shop.updated_at = now;
                tx.update_shop(&shop).await?;
                Ok(())
            }
            .boxed()
        })
        .await?;

        let flow = Arc::new(flow);
        self.flows.replace(shop_id, flow.clone()).await;
        tracing::info!(shop_id, statuses = flow.statuses.len(), "order status flow replaced");
        Ok(flow)
    }
}
