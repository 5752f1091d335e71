//! HTTP surface.

mod auth;
mod catalog;
pub mod extract;
mod orders;
mod shops;
mod users;

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// All routes, nested under `base_path` when one is configured.
pub fn router(state: AppState, base_path: &str) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/change-password", post(auth::change_password))
        .route("/temp-token/validate", post(auth::validate_temp_token))
        .route("/shops", get(shops::list_shops).post(shops::create_shop))
        .route("/shops/:id", get(shops::get_shop).put(shops::update_shop))
        .route("/shops/:id/flow", get(shops::get_flow).put(shops::replace_flow))
        .route("/shops/:id/temp-token", post(shops::temp_token))
        .route("/shops/:id/temp-token/rotate", post(shops::rotate_temp_token))
        .route("/products", get(catalog::list_products).post(catalog::create_product))
        .route(
            "/products/:id",
            get(catalog::get_product)
                .put(catalog::update_product)
                .delete(catalog::delete_product),
        )
        .route("/products/:id/status", post(catalog::set_product_status))
        .route("/products/:id/tags", put(catalog::set_product_tags))
        .route("/tags", get(catalog::list_tags).post(catalog::create_tag))
        .route("/tags/:id", axum::routing::delete(catalog::delete_tag))
        .route("/users", post(users::create_user))
        .route("/users/:id", get(users::get_user))
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/orders/search", post(orders::search_orders))
        .route("/orders/unfinished", get(orders::list_unfinished))
        .route("/orders/by-user", get(orders::list_by_user))
        .route(
            "/orders/:id",
            get(orders::get_order)
                .put(orders::update_order)
                .delete(orders::delete_order),
        )
        .route("/orders/:id/history", get(orders::order_history))
        .route("/orders/:id/toggle-status", post(orders::toggle_status));

    let app = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(base_path, routes)
    };
    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": "orderease" }))
}
