use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use axum::http::StatusCode;

use stockledger_core::{ProductId, WarehouseId};
use stockledger_infra::{AdjustRequest, MovementFilter, StockRequest, TopBy, TransferRequest};
use stockledger_inventory::{AdjustPolicy, AdjustmentReason, MovementContext, MovementType};

use crate::app::errors::{self, parse_id};

type Rejection = axum::response::Response;

// -------------------------
// Request DTOs
// -------------------------

/// Body of receive, ship, reserve and release.
#[derive(Debug, Deserialize)]
pub struct StockOperationRequest {
    pub product_id: String,
    pub warehouse_id: String,
    pub quantity: i64,
    #[serde(flatten)]
    pub context: MovementContext,
    pub timeout_ms: Option<u64>,
}

impl StockOperationRequest {
    pub fn into_request(self) -> Result<StockRequest, Rejection> {
        let product_id: ProductId = parse_id(&self.product_id, "product")?;
        let warehouse_id: WarehouseId = parse_id(&self.warehouse_id, "warehouse")?;
        let mut req = StockRequest::new(product_id, warehouse_id, self.quantity).with_context(self.context);
        if let Some(ms) = self.timeout_ms {
            req = req.with_timeout(Duration::from_millis(ms));
        }
        Ok(req)
    }
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub product_id: String,
    pub warehouse_id: String,
    pub delta: i64,
    /// One of DAMAGE, LOSS, EXPIRED, CORRECTION, THEFT, OTHER.
    pub reason: Option<String>,
    /// `clamp_at_zero` (default) or `reject`.
    pub policy: Option<AdjustPolicy>,
    #[serde(flatten)]
    pub context: MovementContext,
    pub timeout_ms: Option<u64>,
}

impl AdjustStockRequest {
    pub fn into_request(self) -> Result<AdjustRequest, Rejection> {
        let reason = self
            .reason
            .as_deref()
            .map(str::parse::<AdjustmentReason>)
            .transpose()
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation", e.to_string()))?;
        Ok(AdjustRequest {
            product_id: parse_id(&self.product_id, "product")?,
            warehouse_id: parse_id(&self.warehouse_id, "warehouse")?,
            delta: self.delta,
            reason,
            policy: self.policy.unwrap_or_default(),
            context: self.context,
            timeout: self.timeout_ms.map(Duration::from_millis),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TransferStockRequest {
    pub product_id: String,
    pub from_warehouse_id: String,
    pub to_warehouse_id: String,
    pub quantity: i64,
    #[serde(flatten)]
    pub context: MovementContext,
    pub timeout_ms: Option<u64>,
}

impl TransferStockRequest {
    pub fn into_request(self) -> Result<TransferRequest, Rejection> {
        Ok(TransferRequest {
            product_id: parse_id(&self.product_id, "product")?,
            from_warehouse_id: parse_id(&self.from_warehouse_id, "source warehouse")?,
            to_warehouse_id: parse_id(&self.to_warehouse_id, "destination warehouse")?,
            quantity: self.quantity,
            context: self.context,
            timeout: self.timeout_ms.map(Duration::from_millis),
        })
    }
}

/// Query string of `GET /movements`.
#[derive(Debug, Default, Deserialize)]
pub struct MovementQuery {
    pub product_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub movement_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MovementQuery {
    pub fn into_filter(self) -> Result<MovementFilter, Rejection> {
        let movement_type = self
            .movement_type
            .as_deref()
            .map(str::parse::<MovementType>)
            .transpose()
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation", e.to_string()))?;
        Ok(MovementFilter {
            product_id: self.product_id.as_deref().map(|s| parse_id(s, "product")).transpose()?,
            warehouse_id: self
                .warehouse_id
                .as_deref()
                .map(|s| parse_id(s, "warehouse"))
                .transpose()?,
            movement_type,
            occurred_after: self.from,
            occurred_before: self.to,
            limit: self.limit,
        })
    }
}

/// Query string of `GET /products/top`.
#[derive(Debug, Default, Deserialize)]
pub struct TopProductsQuery {
    #[serde(default)]
    pub by: TopBy,
    pub limit: Option<usize>,
}

impl TopProductsQuery {
    pub const DEFAULT_LIMIT: usize = 5;

    pub fn limit(&self) -> usize {
        self.limit.filter(|l| *l > 0).unwrap_or(Self::DEFAULT_LIMIT)
    }
}
