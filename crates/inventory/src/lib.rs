//! Inventory domain module (stock ledger).
//!
//! This crate contains business rules for multi-warehouse stock, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage). Every
//! quantity change is a transition `StockLevel -> StockChange`, and every
//! committed change is described by exactly one `MovementRecord`.

pub mod events;
pub mod movement;
pub mod product;
pub mod stock;
pub mod warehouse;

pub use events::{LedgerEvent, MutationKind, Topic};
pub use movement::{AdjustmentReason, MovementContext, MovementRecord, MovementType};
pub use product::Product;
pub use stock::{AdjustPolicy, StockChange, StockError, StockKey, StockLevel};
pub use warehouse::{Warehouse, WarehouseUtilization};
