//! Movement ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, MovementId, ProductId, TransferId, WarehouseId};

use crate::stock::{StockChange, StockKey};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Receive,
    Ship,
    Transfer,
    Adjust,
    Reserve,
    Release,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receive => "RECEIVE",
            MovementType::Ship => "SHIP",
            MovementType::Transfer => "TRANSFER",
            MovementType::Adjust => "ADJUST",
            MovementType::Reserve => "RESERVE",
            MovementType::Release => "RELEASE",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RECEIVE" | "IN" => Ok(MovementType::Receive),
            "SHIP" | "OUT" => Ok(MovementType::Ship),
            "TRANSFER" => Ok(MovementType::Transfer),
            "ADJUST" | "ADJUSTMENT" => Ok(MovementType::Adjust),
            "RESERVE" => Ok(MovementType::Reserve),
            "RELEASE" => Ok(MovementType::Release),
            other => Err(DomainError::validation(format!("unknown movement type: {other}"))),
        }
    }
}

/// Why an adjustment was made. Required on every `ADJUST` movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentReason {
    Damage,
    Loss,
    Expired,
    Correction,
    Theft,
    Other,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Damage => "DAMAGE",
            AdjustmentReason::Loss => "LOSS",
            AdjustmentReason::Expired => "EXPIRED",
            AdjustmentReason::Correction => "CORRECTION",
            AdjustmentReason::Theft => "THEFT",
            AdjustmentReason::Other => "OTHER",
        }
    }
}

impl core::str::FromStr for AdjustmentReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DAMAGE" => Ok(AdjustmentReason::Damage),
            "LOSS" => Ok(AdjustmentReason::Loss),
            "EXPIRED" => Ok(AdjustmentReason::Expired),
            "CORRECTION" => Ok(AdjustmentReason::Correction),
            "THEFT" => Ok(AdjustmentReason::Theft),
            "OTHER" => Ok(AdjustmentReason::Other),
            other => Err(DomainError::validation(format!("unknown adjustment reason: {other}"))),
        }
    }
}

/// Caller-supplied metadata attached to a movement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementContext {
    pub reference_number: Option<String>,
    pub actor: Option<String>,
    pub notes: Option<String>,
    /// De-duplication token; a repeated call with the same key is a replay.
    pub dedup_key: Option<String>,
    /// Business time of the movement; defaults to the recording time.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// One immutable ledger entry.
///
/// `new_qty == previous_qty + quantity_delta` always holds; `new_qty` equals the
/// stock level quantity committed together with this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: MovementId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub quantity_delta: i64,
    pub reserved_delta: i64,
    /// Delta as requested; differs from `quantity_delta` for clamped adjustments.
    pub requested_delta: i64,
    pub previous_qty: i64,
    pub new_qty: i64,
    pub counterparty_warehouse_id: Option<WarehouseId>,
    pub transfer_id: Option<TransferId>,
    pub reason_code: Option<AdjustmentReason>,
    pub reference_number: Option<String>,
    pub actor: Option<String>,
    pub notes: Option<String>,
    pub dedup_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl MovementRecord {
    /// Describe `change` as a ledger entry recorded at `recorded_at`.
    pub fn from_change(
        id: MovementId,
        movement_type: MovementType,
        change: &StockChange,
        context: &MovementContext,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            product_id: change.after.product_id,
            warehouse_id: change.after.warehouse_id,
            movement_type,
            quantity_delta: change.quantity_delta,
            reserved_delta: change.reserved_delta,
            requested_delta: change.requested_delta,
            previous_qty: change.before.quantity,
            new_qty: change.after.quantity,
            counterparty_warehouse_id: None,
            transfer_id: None,
            reason_code: None,
            reference_number: context.reference_number.clone(),
            actor: context.actor.clone(),
            notes: context.notes.clone(),
            dedup_key: context.dedup_key.clone(),
            occurred_at: context.occurred_at.unwrap_or(recorded_at),
            recorded_at,
        }
    }

    pub fn with_reason(mut self, reason: AdjustmentReason) -> Self {
        self.reason_code = Some(reason);
        self
    }

    /// Mark this record as one leg of `transfer_id`, pointing at the other leg's warehouse.
    pub fn with_transfer(mut self, transfer_id: TransferId, counterparty: WarehouseId) -> Self {
        self.transfer_id = Some(transfer_id);
        self.counterparty_warehouse_id = Some(counterparty);
        if self.reference_number.is_none() {
            self.reference_number = Some(transfer_id.to_string());
        }
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }

    pub fn is_consistent(&self) -> bool {
        self.previous_qty.checked_add(self.quantity_delta) == Some(self.new_qty)
    }
}
