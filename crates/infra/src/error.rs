//! Caller-facing ledger errors.
//!
//! Every failure maps to a stable [`ErrorKind`] plus a human-readable message.
//! Storage internals are logged here and never reach the message.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, warn};

use stockledger_core::{DomainError, WarehouseId};
use stockledger_inventory::StockError;

use crate::store::StoreError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InsufficientStock,
    CapacityExceeded,
    NotFound,
    InvalidQuantity,
    Validation,
    Conflict,
    StorageFailure,
    Timeout,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidQuantity => "invalid_quantity",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// Whether repeating the same call may succeed. Business-rule failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::StorageFailure | ErrorKind::Timeout)
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient stock available: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("insufficient stock available: requested release of {requested}, reserved {reserved}")]
    InsufficientReserved { requested: i64, reserved: i64 },

    #[error(
        "warehouse capacity exceeded: warehouse {warehouse_id} holds {current_total} of {capacity}, requested {requested}"
    )]
    CapacityExceeded {
        warehouse_id: WarehouseId,
        capacity: i64,
        current_total: i64,
        requested: i64,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("quantity must be greater than 0")]
    InvalidQuantity(i64),

    #[error("quantity overflow: {0}")]
    QuantityOverflow(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure")]
    StorageFailure,

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: &'static str, after: Duration },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InsufficientStock { .. } | LedgerError::InsufficientReserved { .. } => {
                ErrorKind::InsufficientStock
            }
            LedgerError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::InvalidQuantity(_) | LedgerError::QuantityOverflow(_) => ErrorKind::InvalidQuantity,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::StorageFailure => ErrorKind::StorageFailure,
            LedgerError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<StockError> for LedgerError {
    fn from(value: StockError) -> Self {
        match value {
            StockError::InvalidQuantity(q) => LedgerError::InvalidQuantity(q),
            StockError::ZeroAdjustment => LedgerError::InvalidQuantity(0),
            StockError::InsufficientStock { requested, available } => {
                LedgerError::InsufficientStock { requested, available }
            }
            StockError::InsufficientReserved { requested, reserved } => {
                LedgerError::InsufficientReserved { requested, reserved }
            }
            StockError::QuantityOverflow { current, delta } => {
                LedgerError::QuantityOverflow(format!("{current} + {delta} exceeds the largest stock quantity"))
            }
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::VersionConflict { key, .. } => {
                LedgerError::Conflict(format!("stock level {key} changed concurrently"))
            }
            StoreError::CapacityExceeded {
                warehouse_id,
                capacity,
                current_total,
                requested,
            } => LedgerError::CapacityExceeded {
                warehouse_id,
                capacity,
                current_total,
                requested,
            },
            StoreError::DuplicateDedupKey(key) => {
                LedgerError::Conflict(format!("de-duplication key {key} already used"))
            }
            StoreError::Conflict(msg) => LedgerError::Conflict(msg),
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::Overflow(what) => LedgerError::QuantityOverflow(what),
            err @ StoreError::InvalidWrite(_) => {
                warn!(error = %err, "store rejected write");
                LedgerError::StorageFailure
            }
            err @ (StoreError::Backend { .. } | StoreError::Poisoned) => {
                error!(error = %err, "storage failure");
                LedgerError::StorageFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_an_invalid_quantity() {
        let err: LedgerError = StockError::QuantityOverflow { current: 1, delta: i64::MAX }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
        assert!(!err.is_retryable());

        let err: LedgerError = StoreError::Overflow("warehouse total".into()).into();
        assert_eq!(err.kind().code(), "invalid_quantity");
        assert!(err.to_string().starts_with("quantity overflow"));
    }

    #[test]
    fn backend_details_do_not_leak() {
        let err: LedgerError = StoreError::backend("commit", "connection reset by peer at 10.0.0.5").into();
        assert_eq!(err, LedgerError::StorageFailure);
        assert!(!err.to_string().contains("10.0.0.5"));
        assert!(err.is_retryable());
    }

    #[test]
    fn business_failures_are_not_retryable() {
        let err: LedgerError = StockError::InsufficientStock {
            requested: 7,
            available: 5,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(err.kind().code(), "insufficient_stock");
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("insufficient stock available"));
    }

    #[test]
    fn capacity_message_keeps_stable_prefix() {
        let err = LedgerError::CapacityExceeded {
            warehouse_id: WarehouseId::new(),
            capacity: 100,
            current_total: 90,
            requested: 20,
        };
        assert!(err.to_string().starts_with("warehouse capacity exceeded"));
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = LedgerError::Timeout {
            operation: "receive",
            after: Duration::from_millis(10),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "receive timed out after 10ms");
    }
}
