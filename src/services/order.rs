//! Order lifecycle: create, read, update, delete and status transitions.
//!
//! Every mutation runs in one transaction. Product rows are locked in
//! ascending id order before their stock is read, so concurrent orders for the
//! same product serialize instead of overselling.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;

use super::events::EventPublisher;
use super::shop::load_shop;
use crate::auth::Principal;
use crate::clock::Clock;
use crate::domain::aggregates::order::{check_selection, quantities_by_product, validate_items};
use crate::domain::aggregates::{
    DraftItem, OptionCategory, Order, OrderDraft, OrderError, OrderItem, OrderStatusLog, Product, ProductOption,
};
use crate::domain::events::OrderEvent;
use crate::domain::flow::{OrderStatusFlow, STOCK_RESTORING_STATUSES, UNDELETABLE_STATUSES};
use crate::domain::value_objects::{Page, Paginated};
use crate::error::{AppError, Result};
use crate::store::{with_transaction, OrderFilter, Store, Tx};

/// Fields a caller may change on an existing order.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub remark: Option<String>,
    pub items: Option<Vec<DraftItem>>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderSearch {
    pub shop_id: i64,
    pub user_id: Option<i64>,
    pub statuses: Option<Vec<i32>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl From<OrderSearch> for OrderFilter {
    fn from(s: OrderSearch) -> Self {
        OrderFilter { shop_id: s.shop_id, user_id: s.user_id, statuses: s.statuses, start: s.start, end: s.end }
    }
}

pub struct OrderService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, events: EventPublisher) -> Self {
        Self { store, clock, events }
    }

    pub async fn create_order(&self, principal: &Principal, mut draft: OrderDraft) -> Result<Order> {
        principal.require_shop(draft.shop_id)?;
        if let Principal::Customer { user_id, .. } = principal {
            draft.user_id = *user_id;
        }
        draft.validate()?;

        let now = self.clock.now();
        let order = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let shop = load_shop(tx, draft.shop_id).await?;
                if shop.is_expired_at(now) {
                    return Err(AppError::ShopExpired);
                }

                let wanted = quantities_by_product(draft.items.iter().map(|i| (i.product_id, i.quantity)));
                let mut products = lock_products(tx, wanted.keys().copied()).await?;
                for product in products.values() {
                    if product.shop_id != draft.shop_id {
                        return Err(OrderError::ForeignProduct { product_id: product.id }.into());
                    }
                }
                apply_stock_delta(&mut products, &BTreeMap::new(), &wanted)?;

                let items = price_items(tx, &products, &draft.items).await?;
                let (order, log) = Order::create(draft.user_id, draft.shop_id, draft.remark, items, now);

                persist_stock(tx, &products, wanted.keys()).await?;
                tx.insert_order(&order).await?;
                tx.insert_status_log(&log).await?;
                Ok(order)
            }
            .boxed()
        })
        .await?;

        tracing::info!(
            order_id = order.id,
            shop_id = order.shop_id,
            user_id = order.user_id,
            total = %order.total_price,
            "order created"
        );
        self.events
            .publish(OrderEvent::Created {
                order_id: order.id,
                shop_id: order.shop_id,
                user_id: order.user_id,
                total_price: order.total_price,
                at: now,
            })
            .await;
        Ok(order)
    }

    pub async fn get_order(&self, principal: &Principal, id: i64, shop_id: i64) -> Result<Order> {
        principal.require_shop(shop_id)?;
        let order = with_transaction(self.store.as_ref(), move |tx| load_order(tx, id, shop_id, false).boxed()).await?;
        ensure_own_order(principal, &order)?;
        Ok(order)
    }

    /// Status history of an order, oldest first.
    pub async fn order_history(&self, principal: &Principal, id: i64, shop_id: i64) -> Result<Vec<OrderStatusLog>> {
        principal.require_shop(shop_id)?;
        let (order, logs) = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let order = load_order(tx, id, shop_id, false).await?;
                let logs = tx.status_logs(id).await?;
                Ok((order, logs))
            }
            .boxed()
        })
        .await?;
        ensure_own_order(principal, &order)?;
        Ok(logs)
    }

    pub async fn list_orders_by_shop(&self, principal: &Principal, shop_id: i64, page: Page) -> Result<Paginated<Order>> {
        principal.require_staff(shop_id)?;
        self.search(OrderFilter::for_shop(shop_id), page).await
    }

    pub async fn list_orders_by_user(
        &self,
        principal: &Principal,
        user_id: i64,
        shop_id: i64,
        page: Page,
    ) -> Result<Paginated<Order>> {
        principal.require_shop(shop_id)?;
        if let Principal::Customer { user_id: own, .. } = principal {
            if *own != user_id {
                return Err(AppError::Forbidden);
            }
        }
        self.search(OrderFilter { user_id: Some(user_id), ..OrderFilter::for_shop(shop_id) }, page)
            .await
    }

    pub async fn list_unfinished_orders(
        &self,
        principal: &Principal,
        shop_id: i64,
        flow: &OrderStatusFlow,
        page: Page,
    ) -> Result<Paginated<Order>> {
        principal.require_staff(shop_id)?;
        let statuses = flow.unfinished_statuses().into_iter().collect();
        self.search(OrderFilter { statuses: Some(statuses), ..OrderFilter::for_shop(shop_id) }, page)
            .await
    }

    pub async fn search_orders(&self, principal: &Principal, search: OrderSearch, page: Page) -> Result<Paginated<Order>> {
        principal.require_staff(search.shop_id)?;
        if let (Some(start), Some(end)) = (search.start, search.end) {
            if start > end {
                return Err(AppError::invalid("start must not be after end"));
            }
        }
        self.search(search.into(), page).await
    }

    async fn search(&self, filter: OrderFilter, page: Page) -> Result<Paginated<Order>> {
        let (orders, total) = with_transaction(self.store.as_ref(), move |tx| {
            async move { Ok(tx.search_orders(&filter, page).await?) }.boxed()
        })
        .await?;
        Ok(Paginated::new(orders, total, page))
    }

    /// Replace the remark and/or the items. Stock moves by the per-product
    /// difference between the new and the old quantities. An order in a
    /// stock-restoring status holds no stock, so its items change without
    /// touching stock; leaving that status later takes the new quantities.
    pub async fn update_order(
        &self,
        principal: &Principal,
        id: i64,
        shop_id: i64,
        update: OrderUpdate,
        flow: &OrderStatusFlow,
    ) -> Result<Order> {
        principal.require_staff(shop_id)?;
        if let Some(items) = &update.items {
            validate_items(items)?;
        }

        let now = self.clock.now();
        let flow = flow.clone();
        let order = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let mut order = load_order(tx, id, shop_id, true).await?;
                if flow.is_final(order.status) {
                    return Err(AppError::OrderImmutable);
                }

                if let Some(items) = update.items {
                    let shop = load_shop(tx, shop_id).await?;
                    if shop.is_expired_at(now) {
                        return Err(AppError::ShopExpired);
                    }

                    let old = order.quantities();
                    let new = quantities_by_product(items.iter().map(|i| (i.product_id, i.quantity)));
                    let touched: BTreeSet<i64> = old.keys().chain(new.keys()).copied().collect();
                    let mut products = lock_products(tx, touched.iter().copied()).await?;
                    for product_id in new.keys() {
                        if products[product_id].shop_id != shop_id {
                            return Err(OrderError::ForeignProduct { product_id: *product_id }.into());
                        }
                    }
                    let holds_stock = !STOCK_RESTORING_STATUSES.contains(&order.status);
                    if holds_stock {
                        apply_stock_delta(&mut products, &old, &new)?;
                    }

                    let priced = price_items(tx, &products, &items).await?;
                    order.replace_items(priced, now);
                    if holds_stock {
                        persist_stock(tx, &products, touched.iter()).await?;
                    }
                    tx.replace_order_items(&order).await?;
                }
                if let Some(remark) = update.remark {
                    order.remark = remark;
                    order.updated_at = now;
                }
                tx.update_order(&order).await?;
                Ok(order)
            }
            .boxed()
        })
        .await?;

        tracing::info!(order_id = order.id, total = %order.total_price, "order updated");
        Ok(order)
    }

    /// Remove an order with its items, options and status log. Stock that is
    /// still held by the order goes back to the products.
    pub async fn delete_order(&self, principal: &Principal, id: i64, shop_id: i64) -> Result<()> {
        principal.require_staff(shop_id)?;
        let now = self.clock.now();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let order = load_order(tx, id, shop_id, true).await?;
                if UNDELETABLE_STATUSES.contains(&order.status) {
                    return Err(AppError::OrderImmutable);
                }
                if !STOCK_RESTORING_STATUSES.contains(&order.status) {
                    release_stock(tx, &order).await?;
                }
                tx.delete_order(order.id).await?;
                Ok(())
            }
            .boxed()
        })
        .await?;

        tracing::info!(order_id = id, shop_id, "order deleted");
        self.events.publish(OrderEvent::Deleted { order_id: id, shop_id, at: now }).await;
        Ok(())
    }

    /// Move an order along its shop's flow. Entering a stock-restoring status
    /// returns the items to stock in the same transaction; leaving one takes
    /// them again.
    pub async fn toggle_status(
        &self,
        principal: &Principal,
        id: i64,
        shop_id: i64,
        next_status: i32,
        flow: &OrderStatusFlow,
    ) -> Result<Order> {
        principal.require_staff(shop_id)?;
        let now = self.clock.now();
        let flow = flow.clone();
        let (order, log) = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let mut order = load_order(tx, id, shop_id, true).await?;
                if !flow.can_transition(order.status, next_status) {
                    return Err(AppError::StatusNotAllowed { from: order.status, to: next_status });
                }

                let was_restored = STOCK_RESTORING_STATUSES.contains(&order.status);
                let restores = STOCK_RESTORING_STATUSES.contains(&next_status);
                if restores && !was_restored {
                    release_stock(tx, &order).await?;
                } else if was_restored && !restores {
                    reclaim_stock(tx, &order).await?;
                }

                let log = order.transition(next_status, now);
                tx.update_order(&order).await?;
                tx.insert_status_log(&log).await?;
                Ok((order, log))
            }
            .boxed()
        })
        .await?;

        tracing::info!(order_id = id, from = log.old_status, to = log.new_status, "order status changed");
        self.events
            .publish(OrderEvent::StatusChanged {
                order_id: id,
                shop_id,
                old_status: log.old_status,
                new_status: log.new_status,
                at: now,
            })
            .await;
        Ok(order)
    }
}

/// Orders of another shop are reported as missing.
async fn load_order(tx: &mut Tx, id: i64, shop_id: i64, lock: bool) -> Result<Order> {
    let order = if lock { tx.lock_order(id).await? } else { tx.find_order(id).await? };
    order
        .filter(|o| o.shop_id == shop_id)
        .ok_or_else(|| AppError::not_found(format!("order {id}")))
}

fn ensure_own_order(principal: &Principal, order: &Order) -> Result<()> {
    match principal {
        Principal::Customer { user_id, .. } if *user_id != order.user_id => Err(AppError::Forbidden),
        _ => Ok(()),
    }
}

/// Lock the given products, in ascending id order.
async fn lock_products(tx: &mut Tx, ids: impl Iterator<Item = i64>) -> Result<BTreeMap<i64, Product>> {
    let ids: BTreeSet<i64> = ids.collect();
    let mut products = BTreeMap::new();
    for id in ids {
        let product = tx
            .lock_product(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("product {id}")))?;
        products.insert(id, product);
    }
    Ok(products)
}

/// Consume `new - old` units per product; a negative difference gives units back.
fn apply_stock_delta(
    products: &mut BTreeMap<i64, Product>,
    old: &BTreeMap<i64, i64>,
    new: &BTreeMap<i64, i64>,
) -> Result<()> {
    for (product_id, product) in products.iter_mut() {
        let delta = new.get(product_id).copied().unwrap_or(0) - old.get(product_id).copied().unwrap_or(0);
        let amount = i32::try_from(delta.abs())
            .map_err(|_| OrderError::InsufficientStock { product_id: *product_id })?;
        if delta > 0 {
            product.take_stock(amount)?;
        } else if delta < 0 {
            product.restore_stock(amount);
        }
    }
    Ok(())
}

async fn persist_stock<'i>(
    tx: &mut Tx,
    products: &BTreeMap<i64, Product>,
    ids: impl Iterator<Item = &'i i64> + Send,
) -> Result<()> {
    for id in ids {
        if let Some(product) = products.get(id) {
            tx.set_stock(product.id, product.stock).await?;
        }
    }
    Ok(())
}

async fn release_stock(tx: &mut Tx, order: &Order) -> Result<()> {
    let held = order.quantities();
    let mut products = lock_products(tx, held.keys().copied()).await?;
    apply_stock_delta(&mut products, &held, &BTreeMap::new())?;
    persist_stock(tx, &products, held.keys()).await
}

async fn reclaim_stock(tx: &mut Tx, order: &Order) -> Result<()> {
    let held = order.quantities();
    let mut products = lock_products(tx, held.keys().copied()).await?;
    apply_stock_delta(&mut products, &BTreeMap::new(), &held)?;
    persist_stock(tx, &products, held.keys()).await
}

/// Resolve and check every chosen option, then snapshot each line.
async fn price_items(tx: &mut Tx, products: &BTreeMap<i64, Product>, items: &[DraftItem]) -> Result<Vec<OrderItem>> {
    let mut trees: HashMap<i64, Vec<OptionCategory>> = HashMap::new();
    let mut priced = Vec::with_capacity(items.len());

    for item in items {
        let product = products
            .get(&item.product_id)
            .ok_or_else(|| AppError::not_found(format!("product {}", item.product_id)))?;

        let mut selection: Vec<(OptionCategory, ProductOption)> = Vec::with_capacity(item.options.len());
        for chosen in &item.options {
            let option = tx
                .find_option(chosen.option_id)
                .await?
                .ok_or_else(|| OrderError::InvalidOption(format!("option {} does not exist", chosen.option_id)))?;
            let category = tx
                .find_option_category(chosen.category_id)
                .await?
                .ok_or_else(|| {
                    OrderError::InvalidOption(format!("option category {} does not exist", chosen.category_id))
                })?;
            selection.push((category, option));
        }

        if !trees.contains_key(&product.id) {
            let tree = tx.option_categories(product.id).await?;
            trees.insert(product.id, tree);
        }
        let tree = trees.get(&product.id).map(Vec::as_slice).unwrap_or_default();
        check_selection(product.id, &item.options, &selection, tree)?;

        priced.push(OrderItem::snapshot(product, item.quantity, &selection));
    }
    Ok(priced)
}
