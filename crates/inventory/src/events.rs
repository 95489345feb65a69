//! Change events emitted after a ledger or catalog commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{MovementId, ProductId, WarehouseId};
use stockledger_events::Event;

use crate::movement::MovementRecord;
use crate::stock::StockKey;

/// Watchable collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Products,
    Warehouses,
    Movements,
    StockLevels,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Products,
        Topic::Warehouses,
        Topic::Movements,
        Topic::StockLevels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Products => "products",
            Topic::Warehouses => "warehouses",
            Topic::Movements => "movements",
            Topic::StockLevels => "stock_levels",
        }
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Topic {
    type Err = stockledger_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "products" => Ok(Topic::Products),
            "warehouses" => Ok(Topic::Warehouses),
            "movements" => Ok(Topic::Movements),
            "stock_levels" | "stock-levels" => Ok(Topic::StockLevels),
            other => Err(stockledger_core::DomainError::validation(format!("unknown topic: {other}"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Received,
    Shipped,
    Adjusted,
    Transferred,
    Reserved,
    Released,
    ProductUpserted,
    WarehouseUpserted,
    WarehouseDeactivated,
}

impl MutationKind {
    pub fn is_stock_mutation(&self) -> bool {
        !matches!(
            self,
            MutationKind::ProductUpserted
                | MutationKind::WarehouseUpserted
                | MutationKind::WarehouseDeactivated
        )
    }
}

/// What one commit changed.
///
/// `revision` is the store revision produced by the commit; watchers can use it
/// to discard notifications older than what they have already rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub revision: u64,
    pub kind: MutationKind,
    pub keys: Vec<StockKey>,
    pub warehouses: Vec<WarehouseId>,
    pub products: Vec<ProductId>,
    pub movement_ids: Vec<MovementId>,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEvent {
    /// Event for a committed stock operation, derived from its movement records.
    pub fn stock(
        kind: MutationKind,
        revision: u64,
        records: &[MovementRecord],
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut keys: Vec<StockKey> = records.iter().map(MovementRecord::key).collect();
        keys.sort();
        keys.dedup();

        let mut warehouses: Vec<WarehouseId> = keys.iter().map(|k| k.warehouse_id).collect();
        warehouses.sort();
        warehouses.dedup();

        let mut products: Vec<ProductId> = keys.iter().map(|k| k.product_id).collect();
        products.sort();
        products.dedup();

        Self {
            revision,
            kind,
            keys,
            warehouses,
            products,
            movement_ids: records.iter().map(|r| r.id).collect(),
            occurred_at,
        }
    }

    pub fn product_upserted(revision: u64, product_id: ProductId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            revision,
            kind: MutationKind::ProductUpserted,
            keys: Vec::new(),
            warehouses: Vec::new(),
            products: vec![product_id],
            movement_ids: Vec::new(),
            occurred_at,
        }
    }

    pub fn warehouse_changed(
        kind: MutationKind,
        revision: u64,
        warehouse_id: WarehouseId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            revision,
            kind,
            keys: Vec::new(),
            warehouses: vec![warehouse_id],
            products: Vec::new(),
            movement_ids: Vec::new(),
            occurred_at,
        }
    }

    /// Collections whose rendered state this event invalidates.
    pub fn topics(&self) -> Vec<Topic> {
        match self.kind {
            MutationKind::ProductUpserted => vec![Topic::Products],
            MutationKind::WarehouseUpserted | MutationKind::WarehouseDeactivated => {
                vec![Topic::Warehouses]
            }
            MutationKind::Reserved | MutationKind::Released => {
                vec![Topic::Movements, Topic::StockLevels]
            }
            // Warehouse utilization depends on on-hand totals.
            _ => vec![Topic::Warehouses, Topic::Movements, Topic::StockLevels],
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            MutationKind::Received => "stock.received",
            MutationKind::Shipped => "stock.shipped",
            MutationKind::Adjusted => "stock.adjusted",
            MutationKind::Transferred => "stock.transferred",
            MutationKind::Reserved => "stock.reserved",
            MutationKind::Released => "stock.released",
            MutationKind::ProductUpserted => "catalog.product.upserted",
            MutationKind::WarehouseUpserted => "catalog.warehouse.upserted",
            MutationKind::WarehouseDeactivated => "catalog.warehouse.deactivated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
