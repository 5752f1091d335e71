//! Application services. Each takes the calling [`Principal`] and enforces
//! its own authorization.
//!
//! [`Principal`]: crate::auth::Principal

pub mod auth;
pub mod catalog;
pub mod events;
pub mod order;
pub mod shop;
pub mod temp_token;
pub mod user;

use std::sync::Arc;

use crate::auth::JwtService;
use crate::clock::Clock;
use crate::store::Store;

pub use auth::{AuthService, LoginResponse};
pub use catalog::{CatalogService, ImageStore, LocalImageStore};
pub use events::EventPublisher;
pub use order::{OrderSearch, OrderService, OrderUpdate};
pub use shop::{FlowCache, NewShop, ShopService, ShopUpdate};
pub use temp_token::{CustomerSession, TempTokenService};
pub use user::{NewUser, UserService};

pub struct Services {
    pub auth: AuthService,
    pub shops: ShopService,
    pub catalog: CatalogService,
    pub orders: OrderService,
    pub temp_tokens: TempTokenService,
    pub users: UserService,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        jwt: JwtService,
        events: EventPublisher,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            auth: AuthService::new(store.clone(), clock.clone(), jwt.clone()),
            shops: ShopService::new(store.clone(), clock.clone(), FlowCache::default()),
            catalog: CatalogService::new(store.clone(), clock.clone(), images),
            orders: OrderService::new(store.clone(), clock.clone(), events),
            temp_tokens: TempTokenService::new(store.clone(), clock.clone(), jwt),
            users: UserService::new(store, clock),
        }
    }
}
