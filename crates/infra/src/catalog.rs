//! Catalog service: products and warehouses.
//!
//! Catalog stock (`Product::stock`) is master data edited here. It is never
//! derived from ledger levels; `reconciliation` reports the drift between the two.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::{LedgerEvent, MutationKind, Product, Warehouse, WarehouseUtilization};

use crate::config::LedgerConfig;
use crate::deadline::within;
use crate::error::LedgerError;
use crate::locks::WarehouseLocks;
use crate::notifier::ChangePublisher;
use crate::store::{LedgerStore, LevelFilter};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewProduct {
    pub title: String,
    pub sku: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub low_stock_threshold: Option<i64>,
}

/// Partial product update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductUpdate {
    pub title: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub barcode: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i64>,
    pub low_stock_threshold: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewWarehouse {
    pub name: String,
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub manager_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WarehouseUpdate {
    pub name: Option<String>,
    pub capacity: Option<i64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub manager_name: Option<String>,
    pub is_active: Option<bool>,
}

/// Catalog stock against the sum of ledger levels for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationLine {
    pub product_id: ProductId,
    pub sku: String,
    pub catalog_stock: i64,
    pub ledger_stock: i64,
    /// `catalog_stock - ledger_stock`.
    pub drift: i64,
}

/// Ordering for `CatalogService::top_products`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopBy {
    #[default]
    Stock,
    Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    OutOfStock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub product_id: ProductId,
    pub sku: String,
    pub title: String,
    pub stock: i64,
    pub low_stock_threshold: i64,
    pub alert_type: AlertType,
}

impl StockAlert {
    pub fn from_product(product: &Product) -> Self {
        let alert_type = if product.stock == 0 {
            AlertType::OutOfStock
        } else {
            AlertType::LowStock
        };
        Self {
            product_id: product.id,
            sku: product.sku.clone(),
            title: product.title.clone(),
            stock: product.stock,
            low_stock_threshold: product.low_stock_threshold,
            alert_type,
        }
    }

    /// Alerts for the low-stock subset of `products`, lowest stock first.
    pub fn for_products(products: &[Product]) -> Vec<StockAlert> {
        let mut alerts: Vec<StockAlert> = products
            .iter()
            .filter(|p| p.is_low_stock())
            .map(StockAlert::from_product)
            .collect();
        alerts.sort_by_key(|a| a.stock);
        alerts
    }
}

pub struct CatalogService {
    store: Arc<dyn LedgerStore>,
    publisher: Arc<dyn ChangePublisher>,
    locks: Arc<WarehouseLocks>,
    operation_timeout: Duration,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        publisher: Arc<dyn ChangePublisher>,
        locks: Arc<WarehouseLocks>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            locks,
            operation_timeout: config.operation_timeout(),
        }
    }

    #[instrument(skip(self, input), fields(sku = %input.sku), err)]
    pub async fn register_product(&self, input: NewProduct) -> Result<Product, LedgerError> {
        let mut product = Product::new(ProductId::new(), input.title, input.sku, Utc::now());
        product.description = input.description;
        product.barcode = input.barcode;
        product.price = input.price;
        product.stock = input.stock;
        if let Some(threshold) = input.low_stock_threshold {
            product.low_stock_threshold = threshold;
        }
        self.save_product(product).await
    }

    #[instrument(skip(self, update), fields(product_id = %id), err)]
    pub async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product, LedgerError> {
        let mut product = self.product(id).await?;
        if let Some(title) = update.title {
            product.title = title;
        }
        if let Some(sku) = update.sku {
            product.sku = sku;
        }
        if update.description.is_some() {
            product.description = update.description;
        }
        if update.barcode.is_some() {
            product.barcode = update.barcode;
        }
        if let Some(price) = update.price {
            product.price = price;
        }
        if let Some(stock) = update.stock {
            product.stock = stock;
        }
        if let Some(threshold) = update.low_stock_threshold {
            product.low_stock_threshold = threshold;
        }
        product.updated_at = Utc::now();
        self.save_product(product).await
    }

    pub async fn product(&self, id: ProductId) -> Result<Product, LedgerError> {
        within("product", self.operation_timeout, async {
            self.store
                .product(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(format!("product {id}")))
        })
        .await
    }

    pub async fn products(&self) -> Result<Vec<Product>, LedgerError> {
        within("products", self.operation_timeout, async { Ok(self.store.list_products().await?) }).await
    }

    /// Products whose catalog stock is at or below their threshold.
    pub async fn low_stock_products(&self) -> Result<Vec<Product>, LedgerError> {
        let mut products = self.products().await?;
        products.retain(Product::is_low_stock);
        Ok(products)
    }

    /// The `limit` products with the most catalog stock or the highest price.
    /// Ties keep `products()` order.
    pub async fn top_products(&self, by: TopBy, limit: usize) -> Result<Vec<Product>, LedgerError> {
        let mut products = self.products().await?;
        match by {
            TopBy::Stock => products.sort_by(|a, b| b.stock.cmp(&a.stock)),
            TopBy::Price => products.sort_by(|a, b| b.price.cmp(&a.price)),
        }
        products.truncate(limit);
        Ok(products)
    }

    /// One alert per low-stock product, lowest stock first.
    pub async fn stock_alerts(&self) -> Result<Vec<StockAlert>, LedgerError> {
        Ok(StockAlert::for_products(&self.products().await?))
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    pub async fn register_warehouse(&self, input: NewWarehouse) -> Result<Warehouse, LedgerError> {
        let mut warehouse = Warehouse::new(WarehouseId::new(), input.name, input.capacity, Utc::now());
        warehouse.address = input.address;
        warehouse.city = input.city;
        warehouse.country = input.country;
        warehouse.manager_name = input.manager_name;
        warehouse.validate()?;

        let revision = within("register_warehouse", self.operation_timeout, async {
            Ok(self.store.put_warehouse(warehouse.clone()).await?)
        })
        .await?;
        self.publish_warehouse(MutationKind::WarehouseUpserted, revision, warehouse.id);
        info!(warehouse_id = %warehouse.id, capacity = warehouse.capacity, "warehouse registered");
        Ok(warehouse)
    }

    /// Applies `update` under the warehouse lock so a capacity change cannot
    /// interleave with a running stock operation.
    #[instrument(skip(self, update), fields(warehouse_id = %id), err)]
    pub async fn update_warehouse(&self, id: WarehouseId, update: WarehouseUpdate) -> Result<Warehouse, LedgerError> {
        let kind = if update.is_active == Some(false) {
            MutationKind::WarehouseDeactivated
        } else {
            MutationKind::WarehouseUpserted
        };

        let (warehouse, revision) = within("update_warehouse", self.operation_timeout, async {
            let _guard = self.locks.lock(&[id]).await;
            let mut warehouse = self
                .store
                .warehouse(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(format!("warehouse {id}")))?;
            if let Some(name) = update.name {
                warehouse.name = name;
            }
            if let Some(capacity) = update.capacity {
                warehouse.capacity = capacity;
            }
            if update.address.is_some() {
                warehouse.address = update.address;
            }
            if update.city.is_some() {
                warehouse.city = update.city;
            }
            if update.country.is_some() {
                warehouse.country = update.country;
            }
            if update.manager_name.is_some() {
                warehouse.manager_name = update.manager_name;
            }
            if let Some(active) = update.is_active {
                warehouse.is_active = active;
            }
            warehouse.updated_at = Utc::now();
            warehouse.validate()?;

            let revision = self.store.put_warehouse(warehouse.clone()).await?;
            self.publish_warehouse(kind, revision, id);
            Ok((warehouse, revision))
        })
        .await?;

        info!(warehouse_id = %id, revision, active = warehouse.is_active, "warehouse updated");
        Ok(warehouse)
    }

    /// Soft delete: the warehouse keeps its levels and history but rejects new operations.
    pub async fn deactivate_warehouse(&self, id: WarehouseId) -> Result<Warehouse, LedgerError> {
        self.update_warehouse(
            id,
            WarehouseUpdate {
                is_active: Some(false),
                ..WarehouseUpdate::default()
            },
        )
        .await
    }

    pub async fn warehouse(&self, id: WarehouseId) -> Result<Warehouse, LedgerError> {
        within("warehouse", self.operation_timeout, async {
            self.store
                .warehouse(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(format!("warehouse {id}")))
        })
        .await
    }

    pub async fn warehouses_with_utilization(&self) -> Result<Vec<WarehouseUtilization>, LedgerError> {
        within("warehouses_with_utilization", self.operation_timeout, async {
            let warehouses = self.store.list_warehouses().await?;
            let mut out = Vec::with_capacity(warehouses.len());
            for warehouse in warehouses {
                let total = self.store.warehouse_total(warehouse.id).await?;
                out.push(WarehouseUtilization::new(warehouse, total));
            }
            Ok(out)
        })
        .await
    }

    /// One line per product, ordered like `products()`.
    pub async fn reconciliation(&self) -> Result<Vec<ReconciliationLine>, LedgerError> {
        within("reconciliation", self.operation_timeout, async {
            let products = self.store.list_products().await?;
            let mut lines = Vec::with_capacity(products.len());
            for product in products {
                let levels = self
                    .store
                    .list_levels(LevelFilter {
                        product_id: Some(product.id),
                        warehouse_id: None,
                    })
                    .await?;
                let ledger_stock = levels
                    .iter()
                    .try_fold(0i64, |total, l| total.checked_add(l.quantity))
                    .ok_or_else(|| {
                        LedgerError::QuantityOverflow(format!("ledger total of product {}", product.id))
                    })?;
                let drift = product.stock.checked_sub(ledger_stock).ok_or_else(|| {
                    LedgerError::QuantityOverflow(format!("drift of product {}", product.id))
                })?;
                lines.push(ReconciliationLine {
                    product_id: product.id,
                    drift,
                    sku: product.sku,
                    catalog_stock: product.stock,
                    ledger_stock,
                });
            }
            Ok(lines)
        })
        .await
    }

    async fn save_product(&self, product: Product) -> Result<Product, LedgerError> {
        product.validate()?;
        let revision = within("save_product", self.operation_timeout, async {
            Ok(self.store.put_product(product.clone()).await?)
        })
        .await?;
        self.publisher
            .publish(LedgerEvent::product_upserted(revision, product.id, Utc::now()));
        info!(product_id = %product.id, sku = %product.sku, revision, "product saved");
        Ok(product)
    }

    fn publish_warehouse(&self, kind: MutationKind, revision: u64, id: WarehouseId) {
        self.publisher
            .publish(LedgerEvent::warehouse_changed(kind, revision, id, Utc::now()));
    }
}
