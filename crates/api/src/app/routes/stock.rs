use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::{ProductId, WarehouseId};

use crate::app::dto;
use crate::app::errors::{self, parse_id};
use crate::app::routes::common::respond;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/receive", post(receive))
        .route("/ship", post(ship))
        .route("/reserve", post(reserve))
        .route("/release", post(release))
        .route("/adjust", post(adjust))
        .route("/transfer", post(transfer))
        .route("/:product_id/:warehouse_id", get(get_level))
        .route("/:product_id/:warehouse_id/balance", get(get_balance))
}

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockOperationRequest>,
) -> axum::response::Response {
    let req = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.receive(req).await)
}

pub async fn ship(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockOperationRequest>,
) -> axum::response::Response {
    let req = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.ship(req).await)
}

pub async fn reserve(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockOperationRequest>,
) -> axum::response::Response {
    let req = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.reserve(req).await)
}

pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockOperationRequest>,
) -> axum::response::Response {
    let req = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.release(req).await)
}

pub async fn adjust(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    let req = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.adjust(req).await)
}

pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::TransferStockRequest>,
) -> axum::response::Response {
    let req = match body.into_request() {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.transfer(req).await)
}

fn parse_key(product_id: &str, warehouse_id: &str) -> Result<(ProductId, WarehouseId), axum::response::Response> {
    Ok((parse_id(product_id, "product")?, parse_id(warehouse_id, "warehouse")?))
}

pub async fn get_level(
    Extension(services): Extension<Arc<AppServices>>,
    Path((product_id, warehouse_id)): Path<(String, String)>,
) -> axum::response::Response {
    let (product_id, warehouse_id) = match parse_key(&product_id, &warehouse_id) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, services.engine.stock_level(product_id, warehouse_id).await)
}

/// Level next to the sum of its ledger entries.
pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Path((product_id, warehouse_id)): Path<(String, String)>,
) -> axum::response::Response {
    let (product_id, warehouse_id) = match parse_key(&product_id, &warehouse_id) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let level = match services.engine.stock_level(product_id, warehouse_id).await {
        Ok(l) => l,
        Err(e) => return errors::ledger_error_to_response(e),
    };
    let balance = services.engine.ledger_balance(product_id, warehouse_id).await;
    respond(
        StatusCode::OK,
        balance.map(|ledger_balance| {
            serde_json::json!({
                "quantity": level.quantity,
                "ledger_balance": ledger_balance,
                "consistent": level.quantity == ledger_balance,
            })
        }),
    )
}
