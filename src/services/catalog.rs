//! Products, their option trees, and tags.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use super::shop::load_shop;
use crate::auth::Principal;
use crate::clock::Clock;
use crate::domain::aggregates::{Product, ProductDetail, ProductSpec, ProductStatus, Tag};
use crate::domain::value_objects::{Page, Paginated};
use crate::error::{AppError, Result};
use crate::store::{with_transaction, Store, Tx};

/// Where product images live. Upload and compression happen elsewhere; the
/// catalog only ever removes files.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn remove(&self, image_ref: &str) -> std::io::Result<()>;
}

/// Images stored as files under a root directory.
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Refs are relative paths; anything escaping the root is refused.
    fn resolve(&self, image_ref: &str) -> Option<PathBuf> {
        let relative = Path::new(image_ref.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, std::path::Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn remove(&self, image_ref: &str) -> std::io::Result<()> {
        let path = self.resolve(image_ref).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid image ref {image_ref}"))
        })?;
        tokio::fs::remove_file(path).await
    }
}

async fn load_product(tx: &mut Tx, product_id: i64) -> Result<Product> {
    tx.find_product(product_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("product {product_id}")))
}

async fn load_detail(tx: &mut Tx, product: Product) -> Result<ProductDetail> {
    let option_categories = tx.option_categories(product.id).await?;
    let tags = tx.product_tags(product.id).await?;
    Ok(ProductDetail { product, option_categories, tags })
}

pub struct CatalogService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    images: Arc<dyn ImageStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, images: Arc<dyn ImageStore>) -> Self {
        Self { store, clock, images }
    }

    pub async fn create_product(&self, principal: &Principal, shop_id: i64, spec: ProductSpec) -> Result<ProductDetail> {
        principal.require_staff(shop_id)?;
        let product = Product::create(shop_id, &spec, self.clock.now())?;
        let categories = spec.build_categories(product.id);

        let detail = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                load_shop(tx, shop_id).await?;
                tx.insert_product(&product).await?;
                tx.replace_option_categories(product.id, &categories).await?;
                load_detail(tx, product).await
            }
            .boxed()
        })
        .await?;

        tracing::info!(product_id = detail.product.id, shop_id, "product created");
        Ok(detail)
    }

    pub async fn get_product(&self, principal: &Principal, product_id: i64) -> Result<ProductDetail> {
        let detail = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let product = load_product(tx, product_id).await?;
                load_detail(tx, product).await
            }
            .boxed()
        })
        .await?;
        principal.require_shop(detail.product.shop_id)?;
        Ok(detail)
    }

    pub async fn list_products(
        &self,
        principal: &Principal,
        shop_id: i64,
        status: Option<ProductStatus>,
        page: Page,
    ) -> Result<Paginated<Product>> {
        principal.require_shop(shop_id)?;
        let (products, total) = with_transaction(self.store.as_ref(), move |tx| {
            async move { Ok(tx.list_products(shop_id, status, page).await?) }.boxed()
        })
        .await?;
        Ok(Paginated::new(products, total, page))
    }

    /// Replace the editable fields; the option tree is replaced wholesale.
    /// Orders already placed keep their snapshots.
    pub async fn update_product(
        &self,
        principal: &Principal,
        product_id: i64,
        spec: ProductSpec,
    ) -> Result<ProductDetail> {
        spec.validate()?;
        let now = self.clock.now();
        let principal = principal.clone();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let mut product = tx
                    .lock_product(product_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("product {product_id}")))?;
                principal.require_staff(product.shop_id)?;
                product.apply(&spec, now)?;
                let categories = spec.build_categories(product.id);
                tx.update_product(&product).await?;
                tx.replace_option_categories(product.id, &categories).await?;
                load_detail(tx, product).await
            }
            .boxed()
        })
        .await
    }

    pub async fn set_status(&self, principal: &Principal, product_id: i64, status: ProductStatus) -> Result<Product> {
        let now = self.clock.now();
        let principal = principal.clone();
        let product = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let mut product = tx
                    .lock_product(product_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("product {product_id}")))?;
                principal.require_staff(product.shop_id)?;
                product.set_status(status, now)?;
                tx.update_product(&product).await?;
                Ok(product)
            }
            .boxed()
        })
        .await?;

        tracing::info!(product_id, status = product.status.as_str(), "product status changed");
        Ok(product)
    }

    /// Fails with `ProductInUse` while any order item references the product.
    /// A leftover image file is logged, not fatal.
    pub async fn delete_product(&self, principal: &Principal, product_id: i64) -> Result<()> {
        let principal = principal.clone();
        let product = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let product = tx
                    .lock_product(product_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("product {product_id}")))?;
                principal.require_staff(product.shop_id)?;
                if tx.count_order_items_for_product(product_id).await? > 0 {
                    return Err(AppError::ProductInUse);
                }
                tx.delete_product(product_id).await?;
                Ok(product)
            }
            .boxed()
        })
        .await?;

        if !product.image_ref.is_empty() {
            if let Err(e) = self.images.remove(&product.image_ref).await {
                tracing::warn!(product_id, image = %product.image_ref, error = %e, "failed to remove product image");
            }
        }
        tracing::info!(product_id, "product deleted");
        Ok(())
    }

    pub async fn create_tag(&self, principal: &Principal, shop_id: i64, name: String, description: String) -> Result<Tag> {
        principal.require_staff(shop_id)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::invalid("tag name is required"));
        }
        let tag = Tag { id: crate::id::next_id(), shop_id, name, description, created_at: self.clock.now() };
        let created = tag.clone();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                load_shop(tx, shop_id).await?;
                tx.insert_tag(&tag).await?;
                Ok(())
            }
            .boxed()
        })
        .await?;
        Ok(created)
    }

    pub async fn list_tags(&self, principal: &Principal, shop_id: i64) -> Result<Vec<Tag>> {
        principal.require_shop(shop_id)?;
        with_transaction(self.store.as_ref(), move |tx| async move { Ok(tx.list_tags(shop_id).await?) }.boxed()).await
    }

    /// Fails with `Conflict` while any product still carries the tag.
    pub async fn delete_tag(&self, principal: &Principal, tag_id: i64) -> Result<()> {
        let principal = principal.clone();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let tag = tx
                    .find_tag(tag_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("tag {tag_id}")))?;
                principal.require_staff(tag.shop_id)?;
                if tx.count_tag_links(tag_id).await? > 0 {
                    return Err(AppError::Conflict(format!("tag {} is still in use", tag.name)));
                }
                tx.delete_tag(tag_id).await?;
                Ok(())
            }
            .boxed()
        })
        .await
    }

    /// Replace the product's tag set. Every tag must belong to the product's shop.
    pub async fn set_product_tags(&self, principal: &Principal, product_id: i64, tag_ids: Vec<i64>) -> Result<Vec<Tag>> {
        let principal = principal.clone();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let product = load_product(tx, product_id).await?;
                principal.require_staff(product.shop_id)?;
                for tag_id in &tag_ids {
                    match tx.find_tag(*tag_id).await? {
                        Some(tag) if tag.shop_id == product.shop_id => {}
                        _ => return Err(AppError::invalid(format!("tag {tag_id} does not belong to this shop"))),
                    }
                }
                tx.set_product_tags(product_id, product.shop_id, &tag_ids).await?;
                Ok(tx.product_tags(product_id).await?)
            }
            .boxed()
        })
        .await
    }
}
