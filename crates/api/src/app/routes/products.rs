use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::ProductId;
use stockledger_infra::{LevelFilter, NewProduct, ProductUpdate};

use crate::app::dto;
use crate::app::errors::{self, parse_id};
use crate::app::routes::common::respond;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/low-stock", get(low_stock))
        .route("/alerts", get(stock_alerts))
        .route("/top", get(top_products))
        .route("/reconciliation", get(reconciliation))
        .route("/:id", get(get_product).patch(update_product))
        .route("/:id/stock", get(product_stock))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewProduct>,
) -> axum::response::Response {
    respond(StatusCode::CREATED, services.catalog.register_product(body).await)
}

pub async fn list_products(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    respond(StatusCode::OK, services.catalog.products().await)
}

pub async fn low_stock(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    respond(StatusCode::OK, services.catalog.low_stock_products().await)
}

/// Low-stock products classified as `low_stock` or `out_of_stock`.
pub async fn stock_alerts(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    respond(StatusCode::OK, services.catalog.stock_alerts().await)
}

/// GET /products/top?by=stock|price&limit=
pub async fn top_products(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::TopProductsQuery>,
) -> axum::response::Response {
    respond(StatusCode::OK, services.catalog.top_products(query.by, query.limit()).await)
}

/// Catalog stock against ledger totals, one line per product.
pub async fn reconciliation(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    respond(StatusCode::OK, services.catalog.reconciliation().await)
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ProductId = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.catalog.product(id).await)
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<ProductUpdate>,
) -> axum::response::Response {
    let id: ProductId = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.catalog.update_product(id, body).await)
}

/// The product's ledger level in every warehouse that has held it.
pub async fn product_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ProductId = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = services.catalog.product(id).await {
        return errors::ledger_error_to_response(e);
    }
    let filter = LevelFilter {
        product_id: Some(id),
        ..LevelFilter::default()
    };
    respond(StatusCode::OK, services.engine.levels(filter).await)
}
