//! Order Aggregate
//!
//! An order owns its items and every item owns its chosen options. Product and
//! option fields are copied onto the items at creation so that later catalog
//! edits never rewrite history.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::product::{unit_price, OptionCategory, Product, ProductOption};
use crate::domain::flow::{STATUS_NONE, STATUS_PENDING};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub shop_id: i64,
    pub total_price: Money,
    pub status: i32,
    pub remark: String,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price_snapshot: Money,
    pub total_price: Money,
    pub product_name_snapshot: String,
    pub product_description_snapshot: String,
    pub product_image_snapshot: String,
    pub options: Vec<OrderItemOption>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrderItemOption {
    pub id: i64,
    pub order_item_id: i64,
    pub category_id: i64,
    pub option_id: i64,
    pub option_name_snapshot: String,
    pub category_name_snapshot: String,
    pub price_adjustment_snapshot: Money,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrderStatusLog {
    pub id: i64,
    pub order_id: i64,
    pub old_status: i32,
    pub new_status: i32,
    pub changed_time: DateTime<Utc>,
}

/// Requested order contents, before validation and pricing.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderDraft {
    /// Ignored for customer sessions, which always order as themselves.
    #[serde(default)]
    pub user_id: i64,
    pub shop_id: i64,
    pub items: Vec<DraftItem>,
    #[serde(default)]
    pub remark: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DraftItem {
    pub product_id: i64,
    pub quantity: i32,
    #[serde(default)]
    pub options: Vec<DraftOption>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct DraftOption {
    pub category_id: i64,
    pub option_id: i64,
}

impl OrderDraft {
    /// Structural checks that need no catalog access.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.user_id == 0 {
            return Err(OrderError::MissingUser);
        }
        validate_items(&self.items)
    }
}

pub fn validate_items(items: &[DraftItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::NoItems);
    }
    for item in items {
        if item.product_id == 0 {
            return Err(OrderError::MissingProduct);
        }
        if item.quantity < 1 {
            return Err(OrderError::InvalidQuantity { product_id: item.product_id });
        }
    }
    Ok(())
}

/// Total requested quantity per product.
pub fn quantities_by_product(items: impl IntoIterator<Item = (i64, i32)>) -> BTreeMap<i64, i64> {
    let mut totals = BTreeMap::new();
    for (product_id, qty) in items {
        *totals.entry(product_id).or_insert(0i64) += i64::from(qty);
    }
    totals
}

/// Check a line's chosen options against the product's option tree.
///
/// `resolved` holds the looked-up `(category, option)` for each entry of
/// `chosen`, in the same order. `product_categories` is the full tree of the
/// product, used for the required/single-choice rules.
pub fn check_selection(
    product_id: i64,
    chosen: &[DraftOption],
    resolved: &[(OptionCategory, ProductOption)],
    product_categories: &[OptionCategory],
) -> Result<(), OrderError> {
    let mut seen = HashSet::new();
    let mut per_category: HashMap<i64, usize> = HashMap::new();

    for (draft, (category, option)) in chosen.iter().zip(resolved) {
        if option.category_id != category.id || draft.category_id != category.id {
            return Err(OrderError::InvalidOption(format!(
                "option {} does not belong to category {}",
                draft.option_id, draft.category_id
            )));
        }
        if category.product_id != product_id {
            return Err(OrderError::InvalidOption(format!(
                "option {} does not belong to product {product_id}",
                option.id
            )));
        }
        if !seen.insert(option.id) {
            return Err(OrderError::InvalidOption(format!("option {} chosen twice", option.id)));
        }
        *per_category.entry(category.id).or_insert(0) += 1;
    }

    for category in product_categories {
        let count = per_category.get(&category.id).copied().unwrap_or(0);
        if category.is_required && count == 0 {
            return Err(OrderError::InvalidOption(format!(
                "category {} requires a choice",
                category.name
            )));
        }
        if !category.is_multiple && count > 1 {
            return Err(OrderError::InvalidOption(format!(
                "category {} allows a single choice",
                category.name
            )));
        }
    }
    Ok(())
}

impl OrderItem {
    /// Price one line and copy the catalog fields it depends on.
    pub fn snapshot(
        product: &Product,
        quantity: i32,
        selection: &[(OptionCategory, ProductOption)],
    ) -> Self {
        let item_id = crate::id::next_id();
        let unit = unit_price(product, selection.iter().map(|(_, o)| o));
        let options = selection
            .iter()
            .map(|(category, option)| OrderItemOption {
                id: crate::id::next_id(),
                order_item_id: item_id,
                category_id: category.id,
                option_id: option.id,
                option_name_snapshot: option.name.clone(),
                category_name_snapshot: category.name.clone(),
                price_adjustment_snapshot: option.price_adjustment,
            })
            .collect();

        Self {
            id: item_id,
            order_id: 0,
            product_id: product.id,
            quantity,
            unit_price_snapshot: product.price,
            total_price: unit.multiply(quantity),
            product_name_snapshot: product.name.clone(),
            product_description_snapshot: product.description.clone(),
            product_image_snapshot: product.image_ref.clone(),
            options,
        }
    }

    /// `quantity × (unit_price_snapshot + Σ price_adjustment_snapshot)`
    pub fn expected_total(&self) -> Money {
        let adjustments: Money = self.options.iter().map(|o| o.price_adjustment_snapshot).sum();
        (self.unit_price_snapshot + adjustments).multiply(self.quantity)
    }
}

impl Order {
    /// New order in `Pending`, together with its initial status log entry.
    pub fn create(
        user_id: i64,
        shop_id: i64,
        remark: String,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> (Self, OrderStatusLog) {
        let mut order = Self {
            id: crate::id::next_id(),
            user_id,
            shop_id,
            total_price: Money::zero(),
            status: STATUS_PENDING,
            remark,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        order.set_items(items);
        let log = OrderStatusLog::new(order.id, STATUS_NONE, STATUS_PENDING, now);
        (order, log)
    }

    pub fn replace_items(&mut self, items: Vec<OrderItem>, now: DateTime<Utc>) {
        self.set_items(items);
        self.updated_at = now;
    }

    /// Move to `next` and produce the log entry. The caller has checked the flow.
    pub fn transition(&mut self, next: i32, now: DateTime<Utc>) -> OrderStatusLog {
        let log = OrderStatusLog::new(self.id, self.status, next, now);
        self.status = next;
        self.updated_at = now;
        log
    }

    pub fn quantities(&self) -> BTreeMap<i64, i64> {
        quantities_by_product(self.items.iter().map(|i| (i.product_id, i.quantity)))
    }

    /// Every line total matches its unit price and quantity, and the order
    /// total matches the lines.
    pub fn is_consistent(&self) -> bool {
        self.items.iter().all(|i| i.total_price == i.expected_total())
            && self.total_price == self.items.iter().map(|i| i.total_price).sum::<Money>()
    }

    fn set_items(&mut self, mut items: Vec<OrderItem>) {
        for item in &mut items {
            item.order_id = self.id;
        }
        self.total_price = items.iter().map(|i| i.total_price).sum();
        self.items = items;
    }
}

impl OrderStatusLog {
    pub fn new(order_id: i64, old_status: i32, new_status: i32, changed_time: DateTime<Utc>) -> Self {
        Self { id: crate::id::next_id(), order_id, old_status, new_status, changed_time }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("user_id is required")]
    MissingUser,
    #[error("an order needs at least one item")]
    NoItems,
    #[error("product_id is required on every item")]
    MissingProduct,
    #[error("quantity for product {product_id} must be at least 1")]
    InvalidQuantity { product_id: i64 },
    #[error("product {product_id} does not belong to this shop")]
    ForeignProduct { product_id: i64 },
    #[error("{0}")]
    InvalidOption(String),
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: i64 },
}
