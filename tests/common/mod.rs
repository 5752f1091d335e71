// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use orderease::auth::{JwtService, Principal};
use orderease::clock::{Clock, ManualClock};
use orderease::domain::aggregates::{
    CategorySpec, DraftItem, DraftOption, OrderDraft, ProductDetail, ProductSpec, ProductStatus, Shop,
};
use orderease::domain::value_objects::Money;
use orderease::services::{EventPublisher, ImageStore, NewShop, Services};
use orderease::state::AppState;
use orderease::store::MemoryStore;

pub const SECRET: &str = "integration-test-secret";
pub const OPERATOR: &str = "root";
pub const OPERATOR_PASSWORD: &str = "Root@1234";
pub const OWNER_PASSWORD: &str = "Owner@1234";

/// Records removals instead of touching the filesystem.
#[derive(Default)]
pub struct RecordingImages {
    pub removed: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageStore for RecordingImages {
    async fn remove(&self, image_ref: &str) -> std::io::Result<()> {
        self.removed.lock().unwrap().push(image_ref.to_string());
        Ok(())
    }
}

pub struct TestApp {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub images: Arc<RecordingImages>,
    pub state: AppState,
    pub operator: Principal,
}

impl TestApp {
    pub fn services(&self) -> &Services {
        &self.state.services
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock_now_ts(&self) -> i64 {
        self.clock.now().timestamp()
    }
}

pub async fn setup() -> TestApp {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
    let images = Arc::new(RecordingImages::default());
    let services = Services::new(
        Arc::new(store.clone()),
        clock.clone(),
        JwtService::new(SECRET, 7200),
        EventPublisher::disabled(),
        images.clone(),
    );
    services.auth.ensure_operator(OPERATOR, OPERATOR_PASSWORD).await.unwrap();
    let login = services.auth.login(OPERATOR, OPERATOR_PASSWORD).await.unwrap();
    let operator = Principal::Operator { id: login.user_id, username: OPERATOR.into() };

    TestApp { store, clock, images, state: AppState::new(services), operator }
}

pub async fn create_shop(app: &TestApp, name: &str, owner: &str) -> Shop {
    let new = NewShop {
        name: name.into(),
        owner_username: owner.into(),
        owner_password: OWNER_PASSWORD.into(),
        contact_phone: String::new(),
        contact_email: String::new(),
        address: String::new(),
        description: String::new(),
        image_ref: String::new(),
        valid_until: app.clock.now() + Duration::days(30),
        settings: serde_json::Value::Null,
        order_status_flow: None,
    };
    app.services().shops.create_shop(&app.operator, new).await.unwrap()
}

pub fn owner_of(shop: &Shop) -> Principal {
    Principal::ShopOwner { shop_id: shop.id, username: shop.principal_name() }
}

pub fn spec(name: &str, price_minor: i64, stock: i32) -> ProductSpec {
    ProductSpec {
        name: name.into(),
        description: format!("{name} description"),
        image_ref: format!("products/{name}.png"),
        price: Money::from_minor(price_minor),
        stock,
        option_categories: Vec::new(),
    }
}

pub fn category(name: &str, required: bool, multiple: bool, options: &[(&str, i64)]) -> CategorySpec {
    CategorySpec {
        name: name.into(),
        is_required: required,
        is_multiple: multiple,
        display_order: 0,
        options: options
            .iter()
            .map(|(n, adj)| orderease::domain::aggregates::OptionSpec {
                name: (*n).into(),
                price_adjustment: Money::from_minor(*adj),
                is_default: false,
                display_order: 0,
            })
            .collect(),
    }
}

/// Create a product and put it online.
pub async fn create_product(app: &TestApp, shop: &Shop, spec: ProductSpec) -> ProductDetail {
    let owner = owner_of(shop);
    let mut detail = app.services().catalog.create_product(&owner, shop.id, spec).await.unwrap();
    detail.product = app
        .services()
        .catalog
        .set_status(&owner, detail.product.id, ProductStatus::Online)
        .await
        .unwrap();
    detail
}

pub async fn stock_of(app: &TestApp, product_id: i64) -> i32 {
    app.services()
        .catalog
        .get_product(&app.operator, product_id)
        .await
        .unwrap()
        .product
        .stock
}

pub fn item(product_id: i64, quantity: i32) -> DraftItem {
    DraftItem { product_id, quantity, options: Vec::new() }
}

pub fn item_with(product_id: i64, quantity: i32, options: &[(i64, i64)]) -> DraftItem {
    DraftItem {
        product_id,
        quantity,
        options: options
            .iter()
            .map(|(category_id, option_id)| DraftOption { category_id: *category_id, option_id: *option_id })
            .collect(),
    }
}

pub fn draft(user_id: i64, shop_id: i64, items: Vec<DraftItem>) -> OrderDraft {
    OrderDraft { user_id, shop_id, items, remark: String::new() }
}
