use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::WarehouseId;
use stockledger_infra::{LevelFilter, NewWarehouse, WarehouseUpdate};

use crate::app::errors::{self, parse_id};
use crate::app::routes::common::respond;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_warehouse).get(list_warehouses))
        .route("/:id", get(get_warehouse).patch(update_warehouse))
        .route("/:id/deactivate", post(deactivate_warehouse))
        .route("/:id/stock", get(warehouse_stock))
}

pub async fn create_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewWarehouse>,
) -> axum::response::Response {
    respond(StatusCode::CREATED, services.catalog.register_warehouse(body).await)
}

/// Every warehouse with its total stock and utilization percentage.
pub async fn list_warehouses(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    respond(StatusCode::OK, services.catalog.warehouses_with_utilization().await)
}

pub async fn get_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: WarehouseId = match parse_id(&id, "warehouse") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.catalog.warehouse(id).await)
}

pub async fn update_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<WarehouseUpdate>,
) -> axum::response::Response {
    let id: WarehouseId = match parse_id(&id, "warehouse") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.catalog.update_warehouse(id, body).await)
}

pub async fn deactivate_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: WarehouseId = match parse_id(&id, "warehouse") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.catalog.deactivate_warehouse(id).await)
}

/// Every stored level in the warehouse, one per product.
pub async fn warehouse_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: WarehouseId = match parse_id(&id, "warehouse") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = services.catalog.warehouse(id).await {
        return errors::ledger_error_to_response(e);
    }
    let filter = LevelFilter {
        warehouse_id: Some(id),
        ..LevelFilter::default()
    };
    respond(StatusCode::OK, services.engine.levels(filter).await)
}
