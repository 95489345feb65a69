//! Catalog products.
//!
//! `Product::stock` is catalog master data maintained through the catalog. It is
//! not derived from per-warehouse stock levels, and ledger operations never
//! change it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, ProductId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub description: Option<String>,
    pub sku: String,
    pub barcode: Option<String>,
    /// Unit price in minor currency units.
    pub price: i64,
    pub stock: i64,
    pub low_stock_threshold: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

    pub fn new(id: ProductId, title: impl Into<String>, sku: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
            sku: sku.into(),
            barcode: None,
            price: 0,
            stock: 0,
            low_stock_threshold: Self::DEFAULT_LOW_STOCK_THRESHOLD,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("product title cannot be empty"));
        }
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("product sku cannot be empty"));
        }
        if self.price < 0 {
            return Err(DomainError::validation("product price cannot be negative"));
        }
        if self.stock < 0 {
            return Err(DomainError::validation("product stock cannot be negative"));
        }
        if self.low_stock_threshold < 0 {
            return Err(DomainError::validation("low stock threshold cannot be negative"));
        }
        Ok(())
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.low_stock_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_stock_is_inclusive_of_threshold() {
        let mut p = Product::new(ProductId::new(), "Widget", "W-1", Utc::now());
        p.stock = 10;
        assert!(p.is_low_stock());
        p.stock = 11;
        assert!(!p.is_low_stock());
    }

    #[test]
    fn blank_sku_is_invalid() {
        let p = Product::new(ProductId::new(), "Widget", "", Utc::now());
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));
    }
}
