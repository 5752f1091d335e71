//! Product Aggregate
//!
//! A product owns its option categories, each category owns its options.
//! Selected options adjust the unit price of an order line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    #[default]
    Pending,
    Online,
    Offline,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ProductError> {
        match s {
            "pending" => Ok(Self::Pending),
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(ProductError::UnknownStatus(other.to_string())),
        }
    }

    /// `pending -> online -> offline`; offline is terminal.
    pub fn can_become(&self, next: ProductStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Online) | (Self::Online, Self::Offline)
        )
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Product {
    pub id: i64,
    pub shop_id: i64,
    pub name: String,
    pub description: String,
    pub image_ref: String,
    pub price: Money,
    pub stock: i32,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OptionCategory {
    pub id: i64,
    pub product_id: i64,
    pub name: String,
    pub is_required: bool,
    pub is_multiple: bool,
    pub display_order: i32,
    pub options: Vec<ProductOption>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProductOption {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub price_adjustment: Money,
    pub is_default: bool,
    pub display_order: i32,
}

#[derive(Clone, Debug, Serialize)]
pub struct Tag {
    pub id: i64,
    pub shop_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Product with its option tree and tags, as returned to clients.
#[derive(Clone, Debug, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub option_categories: Vec<OptionCategory>,
    pub tags: Vec<Tag>,
}

/// Editable product fields, used for both create and update.
#[derive(Clone, Debug)]
pub struct ProductSpec {
    pub name: String,
    pub description: String,
    pub image_ref: String,
    pub price: Money,
    pub stock: i32,
    pub option_categories: Vec<CategorySpec>,
}

#[derive(Clone, Debug)]
pub struct CategorySpec {
    pub name: String,
    pub is_required: bool,
    pub is_multiple: bool,
    pub display_order: i32,
    pub options: Vec<OptionSpec>,
}

#[derive(Clone, Debug)]
pub struct OptionSpec {
    pub name: String,
    pub price_adjustment: Money,
    pub is_default: bool,
    pub display_order: i32,
}

impl ProductSpec {
    pub fn validate(&self) -> Result<(), ProductError> {
        if self.name.trim().is_empty() {
            return Err(ProductError::MissingName);
        }
        if self.price.is_negative() {
            return Err(ProductError::NegativePrice);
        }
        if self.stock < 0 {
            return Err(ProductError::NegativeStock);
        }
        for category in &self.option_categories {
            if category.name.trim().is_empty() {
                return Err(ProductError::MissingCategoryName);
            }
            if category.options.iter().any(|o| o.name.trim().is_empty()) {
                return Err(ProductError::MissingOptionName { category: category.name.clone() });
            }
            if !category.is_multiple && category.options.iter().filter(|o| o.is_default).count() > 1 {
                return Err(ProductError::MultipleDefaults { category: category.name.clone() });
            }
        }
        Ok(())
    }

    /// Materialise the option tree for `product_id` with fresh ids.
    pub fn build_categories(&self, product_id: i64) -> Vec<OptionCategory> {
        self.option_categories
            .iter()
            .map(|spec| {
                let category_id = crate::id::next_id();
                OptionCategory {
                    id: category_id,
                    product_id,
                    name: spec.name.trim().to_string(),
                    is_required: spec.is_required,
                    is_multiple: spec.is_multiple,
                    display_order: spec.display_order,
                    options: spec
                        .options
                        .iter()
                        .map(|o| ProductOption {
                            id: crate::id::next_id(),
                            category_id,
                            name: o.name.trim().to_string(),
                            price_adjustment: o.price_adjustment,
                            is_default: o.is_default,
                            display_order: o.display_order,
                        })
                        .collect(),
                }
            })
            .collect()
    }
}

impl Product {
    /// New products start out `pending`.
    pub fn create(shop_id: i64, spec: &ProductSpec, now: DateTime<Utc>) -> Result<Self, ProductError> {
        spec.validate()?;
        Ok(Self {
            id: crate::id::next_id(),
            shop_id,
            name: spec.name.trim().to_string(),
            description: spec.description.clone(),
            image_ref: spec.image_ref.clone(),
            price: spec.price,
            stock: spec.stock,
            status: ProductStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, spec: &ProductSpec, now: DateTime<Utc>) -> Result<(), ProductError> {
        spec.validate()?;
        self.name = spec.name.trim().to_string();
        self.description = spec.description.clone();
        self.image_ref = spec.image_ref.clone();
        self.price = spec.price;
        self.stock = spec.stock;
        self.touch(now);
        Ok(())
    }

    pub fn set_status(&mut self, next: ProductStatus, now: DateTime<Utc>) -> Result<(), ProductError> {
        if !self.status.can_become(next) {
            return Err(ProductError::InvalidStatusTransition { from: self.status, to: next });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    pub fn take_stock(&mut self, qty: i32) -> Result<(), ProductError> {
        if qty < 0 || self.stock < qty {
            return Err(ProductError::InsufficientStock { product_id: self.id });
        }
        self.stock -= qty;
        Ok(())
    }

    pub fn restore_stock(&mut self, qty: i32) {
        self.stock = self.stock.saturating_add(qty);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// `product.price + Σ option.price_adjustment`
pub fn unit_price<'a>(product: &Product, options: impl IntoIterator<Item = &'a ProductOption>) -> Money {
    product.price + options.into_iter().map(|o| o.price_adjustment).sum::<Money>()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("product name is required")]
    MissingName,
    #[error("price must not be negative")]
    NegativePrice,
    #[error("stock must not be negative")]
    NegativeStock,
    #[error("option category name is required")]
    MissingCategoryName,
    #[error("option name is required in category {category}")]
    MissingOptionName { category: String },
    #[error("category {category} allows a single choice but has several defaults")]
    MultipleDefaults { category: String },
    #[error("unknown product status {0}")]
    UnknownStatus(String),
    #[error("product status cannot change from {from:?} to {to:?}")]
    InvalidStatusTransition { from: ProductStatus, to: ProductStatus },
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ProductSpec {
        ProductSpec {
            name: "Latte".into(),
            description: "Milk coffee".into(),
            image_ref: "latte.png".into(),
            price: Money::from_minor(1000),
            stock: 5,
            option_categories: vec![CategorySpec {
                name: "Size".into(),
                is_required: true,
                is_multiple: false,
                display_order: 1,
                options: vec![
                    OptionSpec { name: "Regular".into(), price_adjustment: Money::zero(), is_default: true, display_order: 1 },
                    OptionSpec { name: "Large".into(), price_adjustment: Money::from_minor(250), is_default: false, display_order: 2 },
                ],
            }],
        }
    }

    #[test]
    fn test_product_create() {
        let p = Product::create(1, &spec(), Utc::now()).unwrap();
        assert_eq!(p.name, "Latte");
        assert_eq!(p.status, ProductStatus::Pending);
        assert_eq!(p.shop_id, 1);
    }

    #[test]
    fn test_product_validation() {
        let mut s = spec();
        s.name = "  ".into();
        assert_eq!(Product::create(1, &s, Utc::now()).unwrap_err(), ProductError::MissingName);

        let mut s = spec();
        s.price = Money::from_minor(-1);
        assert_eq!(s.validate(), Err(ProductError::NegativePrice));

        let mut s = spec();
        s.stock = -1;
        assert_eq!(s.validate(), Err(ProductError::NegativeStock));

        let mut s = spec();
        s.price = Money::zero();
        s.stock = 0;
        assert_eq!(s.validate(), Ok(()));
    }

    #[test]
    fn test_status_transitions() {
        let now = Utc::now();
        let mut p = Product::create(1, &spec(), now).unwrap();
        assert!(p.set_status(ProductStatus::Offline, now).is_err());
        p.set_status(ProductStatus::Online, now).unwrap();
        p.set_status(ProductStatus::Offline, now).unwrap();
        assert!(p.set_status(ProductStatus::Online, now).is_err());
        assert!(p.set_status(ProductStatus::Pending, now).is_err());
    }

    #[test]
    fn test_inventory() {
        let mut p = Product::create(1, &spec(), Utc::now()).unwrap();
        p.take_stock(5).unwrap();
        assert_eq!(p.stock, 0);
        assert_eq!(p.take_stock(1), Err(ProductError::InsufficientStock { product_id: p.id }));
        p.restore_stock(3);
        assert_eq!(p.stock, 3);
    }

    #[test]
    fn test_unit_price_with_options() {
        let p = Product::create(1, &spec(), Utc::now()).unwrap();
        let categories = spec().build_categories(p.id);
        let large = &categories[0].options[1];
        assert_eq!(unit_price(&p, [large]), Money::from_minor(1250));
        assert_eq!(unit_price(&p, []), Money::from_minor(1000));
        assert_eq!(categories[0].product_id, p.id);
        assert_eq!(large.category_id, categories[0].id);
    }
}
