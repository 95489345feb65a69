//! Warehouses and their capacity utilization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, WarehouseId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub manager_name: Option<String>,
    /// Total capacity in units; 0 means unconstrained.
    pub capacity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Warehouse {
    pub fn new(id: WarehouseId, name: impl Into<String>, capacity: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            address: None,
            city: None,
            country: None,
            manager_name: None,
            capacity,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty"));
        }
        if self.capacity < 0 {
            return Err(DomainError::validation("warehouse capacity cannot be negative"));
        }
        Ok(())
    }

    pub fn is_constrained(&self) -> bool {
        self.capacity > 0
    }

    /// Whether holding `current_total + delta` units stays within capacity.
    pub fn admits(&self, current_total: i64, delta: i64) -> bool {
        !self.is_constrained() || current_total.saturating_add(delta) <= self.capacity
    }
}

/// A warehouse together with its current fill level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseUtilization {
    #[serde(flatten)]
    pub warehouse: Warehouse,
    pub total_stock: i64,
    /// Percentage in `[0, 100]`; 0 for unconstrained warehouses.
    pub utilization: f64,
}

impl WarehouseUtilization {
    pub fn new(warehouse: Warehouse, total_stock: i64) -> Self {
        let utilization = if warehouse.is_constrained() {
            (total_stock as f64 / warehouse.capacity as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            warehouse,
            total_stock,
            utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse(capacity: i64) -> Warehouse {
        Warehouse::new(WarehouseId::new(), "Main", capacity, Utc::now())
    }

    #[test]
    fn zero_capacity_admits_anything() {
        assert!(warehouse(0).admits(1_000_000, 1_000_000));
    }

    #[test]
    fn capacity_boundary_is_inclusive() {
        let w = warehouse(100);
        assert!(w.admits(90, 10));
        assert!(!w.admits(90, 20));
    }

    #[test]
    fn utilization_is_capped_at_100() {
        assert_eq!(WarehouseUtilization::new(warehouse(100), 45).utilization, 45.0);
        assert_eq!(WarehouseUtilization::new(warehouse(100), 250).utilization, 100.0);
        assert_eq!(WarehouseUtilization::new(warehouse(0), 250).utilization, 0.0);
    }

    #[test]
    fn validation_rejects_blank_name_and_negative_capacity() {
        let mut w = warehouse(10);
        w.name = "  ".into();
        assert!(w.validate().is_err());

        let mut w = warehouse(-1);
        assert!(w.validate().is_err());
        w.capacity = 0;
        assert!(w.validate().is_ok());
    }
}
