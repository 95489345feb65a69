use axum::{routing::get, Router};

pub mod common;
pub mod movements;
pub mod products;
pub mod stock;
pub mod stream;
pub mod system;
pub mod warehouses;

/// Router for all ledger and catalog endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/notifier/stats", get(system::notifier_stats))
        .nest("/stock", stock::router())
        .nest("/movements", movements::router())
        .nest("/warehouses", warehouses::router())
        .nest("/products", products::router())
        .nest("/stream", stream::router())
}
