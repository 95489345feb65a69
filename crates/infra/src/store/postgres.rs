//! Postgres-backed ledger store.
//!
//! ## Schema
//!
//! The store expects the following tables. Migrations are applied outside
//! this crate.
//!
//! ```sql
//! CREATE TABLE ledger_revision (
//!     id        SMALLINT PRIMARY KEY CHECK (id = 1),
//!     revision  BIGINT   NOT NULL
//! );
//! INSERT INTO ledger_revision VALUES (1, 0);
//!
//! CREATE TABLE topic_revisions (
//!     topic     TEXT   PRIMARY KEY,
//!     revision  BIGINT NOT NULL
//! );
//!
//! CREATE TABLE warehouses (
//!     id            UUID PRIMARY KEY,
//!     name          TEXT NOT NULL,
//!     address       TEXT,
//!     city          TEXT,
//!     country       TEXT,
//!     manager_name  TEXT,
//!     capacity      BIGINT  NOT NULL CHECK (capacity >= 0),
//!     is_active     BOOLEAN NOT NULL,
//!     created_at    TIMESTAMPTZ NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE products (
//!     id                   UUID PRIMARY KEY,
//!     title                TEXT NOT NULL,
//!     description          TEXT,
//!     sku                  TEXT NOT NULL UNIQUE,
//!     barcode              TEXT,
//!     price                BIGINT NOT NULL,
//!     stock                BIGINT NOT NULL,
//!     low_stock_threshold  BIGINT NOT NULL,
//!     created_at           TIMESTAMPTZ NOT NULL,
//!     updated_at           TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE stock_levels (
//!     product_id    UUID   NOT NULL REFERENCES products (id),
//!     warehouse_id  UUID   NOT NULL REFERENCES warehouses (id),
//!     quantity      BIGINT NOT NULL CHECK (quantity >= 0),
//!     reserved      BIGINT NOT NULL CHECK (reserved >= 0 AND reserved <= quantity),
//!     version       BIGINT NOT NULL,
//!     PRIMARY KEY (product_id, warehouse_id)
//! );
//! CREATE INDEX stock_levels_warehouse_idx ON stock_levels (warehouse_id);
//!
//! CREATE TABLE stock_movements (
//!     seq                        BIGSERIAL UNIQUE,
//!     id                         UUID PRIMARY KEY,
//!     product_id                 UUID   NOT NULL,
//!     warehouse_id               UUID   NOT NULL,
//!     movement_type              TEXT   NOT NULL,
//!     quantity_delta             BIGINT NOT NULL,
//!     reserved_delta             BIGINT NOT NULL,
//!     requested_delta            BIGINT NOT NULL,
//!     previous_qty               BIGINT NOT NULL,
//!     new_qty                    BIGINT NOT NULL,
//!     counterparty_warehouse_id  UUID,
//!     transfer_id                UUID,
//!     reason_code                TEXT,
//!     reference_number           TEXT,
//!     actor                      TEXT,
//!     notes                      TEXT,
//!     dedup_key                  TEXT,
//!     occurred_at                TIMESTAMPTZ NOT NULL,
//!     recorded_at                TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX stock_movements_product_idx   ON stock_movements (product_id, occurred_at DESC);
//! CREATE INDEX stock_movements_warehouse_idx ON stock_movements (warehouse_id, occurred_at DESC);
//! CREATE INDEX stock_movements_dedup_idx     ON stock_movements (dedup_key) WHERE dedup_key IS NOT NULL;
//!
//! CREATE TABLE ledger_dedup_keys (
//!     dedup_key  TEXT   PRIMARY KEY,
//!     revision   BIGINT NOT NULL
//! );
//! ```
//!
//! ## Commit
//!
//! `commit()` runs in one transaction:
//! 1. bump `ledger_revision` (its row lock orders concurrent commits)
//! 2. claim the de-duplication key
//! 3. `SELECT ... FOR UPDATE` every claimed warehouse and re-check capacity
//! 4. lock each level row and check its expected version
//! 5. write levels, insert movements, record topic revisions
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `InvalidWrite` |
//! | Database (check constraint violation) | `23514` | `InvalidWrite` |
//! | Database (other), PoolClosed, Other | N/A | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::{MovementRecord, Product, StockKey, StockLevel, Topic, Warehouse};

use super::{
    CatalogStore, ChangeSet, LedgerCommit, LedgerStore, LevelFilter, MovementFilter, MovementLedger,
    QuantityStore, StoreError, validate_commit,
};

const MOVEMENT_COLUMNS: &str = "id, product_id, warehouse_id, movement_type, quantity_delta, reserved_delta, \
     requested_delta, previous_qty, new_qty, counterparty_warehouse_id, transfer_id, reason_code, \
     reference_number, actor, notes, dedup_key, occurred_at, recorded_at";

/// Postgres-backed `LedgerStore`.
///
/// `Send + Sync`; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect with a default pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl QuantityStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(key = %key), err)]
    async fn get(&self, key: StockKey) -> Result<Option<StockLevel>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT product_id, warehouse_id, quantity, reserved, version
            FROM stock_levels
            WHERE product_id = $1 AND warehouse_id = $2
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_level", e))?;

        row.as_ref().map(level_from_row).transpose()
    }

    #[instrument(skip(self, level), fields(key = %level.key()), err)]
    async fn upsert(&self, level: StockLevel) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        write_level(&mut tx, &level).await?;
        let revision = next_revision(&mut tx).await?;
        bump_topics(&mut tx, &[Topic::StockLevels, Topic::Warehouses], revision).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(warehouse_id = %warehouse_id), err)]
    async fn warehouse_total(&self, warehouse_id: WarehouseId) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT AS total FROM stock_levels WHERE warehouse_id = $1",
        )
        .bind(warehouse_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("warehouse_total", e))?;
        decode(&row, "total")
    }

    async fn list_levels(&self, filter: LevelFilter) -> Result<Vec<StockLevel>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, warehouse_id, quantity, reserved, version
            FROM stock_levels
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::uuid IS NULL OR warehouse_id = $2)
            ORDER BY product_id, warehouse_id
            "#,
        )
        .bind(filter.product_id.map(Uuid::from))
        .bind(filter.warehouse_id.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_levels", e))?;

        rows.iter().map(level_from_row).collect()
    }
}

#[async_trait]
impl MovementLedger for PostgresLedgerStore {
    #[instrument(skip(self, records), fields(movement_count = records.len()), err)]
    async fn append(&self, records: Vec<MovementRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(bad) = records.iter().find(|r| !r.is_consistent()) {
            return Err(StoreError::InvalidWrite(format!("movement {} is inconsistent", bad.id)));
        }

        let mut tx = self.begin().await?;
        for record in &records {
            insert_movement(&mut tx, record).await?;
        }
        let revision = next_revision(&mut tx).await?;
        bump_topics(&mut tx, &[Topic::Movements], revision).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn query(&self, filter: MovementFilter) -> Result<Vec<MovementRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::uuid IS NULL OR warehouse_id = $2)
              AND ($3::text IS NULL OR movement_type = $3)
              AND ($4::timestamptz IS NULL OR occurred_at >= $4)
              AND ($5::timestamptz IS NULL OR occurred_at <= $5)
            ORDER BY occurred_at DESC, recorded_at DESC, seq DESC
            LIMIT $6
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.product_id.map(Uuid::from))
            .bind(filter.warehouse_id.map(Uuid::from))
            .bind(filter.movement_type.map(|t| t.as_str()))
            .bind(filter.occurred_after)
            .bind(filter.occurred_before)
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;

        let span = Span::current();
        span.record("movement_count", rows.len());
        rows.iter().map(movement_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Vec<MovementRecord>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE dedup_key = $1 ORDER BY seq ASC");
        let rows = sqlx::query(&sql)
            .bind(dedup_key)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_dedup_key", e))?;
        rows.iter().map(movement_from_row).collect()
    }
}

#[async_trait]
impl CatalogStore for PostgresLedgerStore {
    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, address, city, country, manager_name, capacity, is_active, created_at, updated_at
            FROM warehouses
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_warehouse", e))?;
        row.as_ref().map(warehouse_from_row).transpose()
    }

    #[instrument(skip(self, warehouse), fields(warehouse_id = %warehouse.id), err)]
    async fn put_warehouse(&self, warehouse: Warehouse) -> Result<u64, StoreError> {
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO warehouses (
                id, name, address, city, country, manager_name, capacity, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                address = EXCLUDED.address,
                city = EXCLUDED.city,
                country = EXCLUDED.country,
                manager_name = EXCLUDED.manager_name,
                capacity = EXCLUDED.capacity,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(warehouse.id.as_uuid())
        .bind(&warehouse.name)
        .bind(&warehouse.address)
        .bind(&warehouse.city)
        .bind(&warehouse.country)
        .bind(&warehouse.manager_name)
        .bind(warehouse.capacity)
        .bind(warehouse.is_active)
        .bind(warehouse.created_at)
        .bind(warehouse.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("put_warehouse", e))?;

        let revision = next_revision(&mut tx).await?;
        bump_topics(&mut tx, &[Topic::Warehouses], revision).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(revision)
    }

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, address, city, country, manager_name, capacity, is_active, created_at, updated_at
            FROM warehouses
            ORDER BY name, id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_warehouses", e))?;
        rows.iter().map(warehouse_from_row).collect()
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, sku, barcode, price, stock, low_stock_threshold, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id, sku = %product.sku), err)]
    async fn put_product(&self, product: Product) -> Result<u64, StoreError> {
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO products (
                id, title, description, sku, barcode, price, stock, low_stock_threshold, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                sku = EXCLUDED.sku,
                barcode = EXCLUDED.barcode,
                price = EXCLUDED.price,
                stock = EXCLUDED.stock,
                low_stock_threshold = EXCLUDED.low_stock_threshold,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.title)
        .bind(&product.description)
        .bind(&product.sku)
        .bind(&product.barcode)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.low_stock_threshold)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("sku {} already in use", product.sku))
            } else {
                map_sqlx_error("put_product", e)
            }
        })?;

        let revision = next_revision(&mut tx).await?;
        bump_topics(&mut tx, &[Topic::Products], revision).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(revision)
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, sku, barcode, price, stock, low_stock_threshold, created_at, updated_at
            FROM products
            ORDER BY title, id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter().map(product_from_row).collect()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, commit),
        fields(
            level_count = commit.levels.len(),
            movement_count = commit.movements.len(),
            dedup_key = ?commit.dedup_key
        ),
        err
    )]
    async fn commit(&self, commit: LedgerCommit) -> Result<u64, StoreError> {
        validate_commit(&commit)?;

        let mut tx = self.begin().await?;
        let revision = next_revision(&mut tx).await?;

        if let Some(key) = &commit.dedup_key {
            let claimed = sqlx::query(
                "INSERT INTO ledger_dedup_keys (dedup_key, revision) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(key)
            .bind(revision as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_dedup_key", e))?;
            if claimed.rows_affected() == 0 {
                return Err(StoreError::DuplicateDedupKey(key.clone()));
            }
        }

        let mut claims = commit.capacity_claims.clone();
        claims.sort_by_key(|c| c.warehouse_id);
        for claim in &claims {
            let row = sqlx::query("SELECT capacity FROM warehouses WHERE id = $1 FOR UPDATE")
                .bind(claim.warehouse_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_warehouse", e))?
                .ok_or_else(|| StoreError::NotFound(format!("warehouse {}", claim.warehouse_id)))?;
            let capacity: i64 = decode(&row, "capacity")?;

            let row = sqlx::query(
                "SELECT COALESCE(SUM(quantity), 0)::BIGINT AS total FROM stock_levels WHERE warehouse_id = $1",
            )
            .bind(claim.warehouse_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("warehouse_total", e))?;
            let current_total: i64 = decode(&row, "total")?;

            if capacity > 0 && current_total.saturating_add(claim.delta) > capacity {
                return Err(StoreError::CapacityExceeded {
                    warehouse_id: claim.warehouse_id,
                    capacity,
                    current_total,
                    requested: claim.delta,
                });
            }
        }

        for write in &commit.levels {
            let key = write.level.key();
            let row = sqlx::query(
                "SELECT version FROM stock_levels WHERE product_id = $1 AND warehouse_id = $2 FOR UPDATE",
            )
            .bind(key.product_id.as_uuid())
            .bind(key.warehouse_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_level", e))?;
            let actual = match row {
                Some(row) => decode::<i64>(&row, "version")? as u64,
                None => 0,
            };
            if !write.expected.matches(actual) {
                return Err(StoreError::VersionConflict {
                    key,
                    expected: write.expected,
                    actual,
                });
            }
            write_level(&mut tx, &write.level).await?;
        }

        for record in &commit.movements {
            insert_movement(&mut tx, record).await?;
        }

        let on_hand_changed = commit.movements.iter().any(|m| m.quantity_delta != 0);
        let topics: &[Topic] = if on_hand_changed {
            &[Topic::Movements, Topic::StockLevels, Topic::Warehouses]
        } else {
            &[Topic::Movements, Topic::StockLevels]
        };
        bump_topics(&mut tx, topics, revision).await?;

        // An early return above drops `tx`, which rolls back.
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("revision", revision);
        Ok(revision)
    }

    async fn revision(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT revision FROM ledger_revision WHERE id = 1")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revision", e))?;
        Ok(decode::<i64>(&row, "revision")? as u64)
    }

    async fn changes_since(&self, revision: u64) -> Result<ChangeSet, StoreError> {
        let latest = self.revision().await?;
        let rows = sqlx::query("SELECT topic, revision FROM topic_revisions WHERE revision > $1")
            .bind(revision as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("changes_since", e))?;

        let mut topics = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = decode(row, "topic")?;
            let topic: Topic = name
                .parse()
                .map_err(|_| StoreError::backend("changes_since", format!("unknown topic {name}")))?;
            topics.push((topic, decode::<i64>(row, "revision")? as u64));
        }
        topics.sort();
        Ok(ChangeSet { latest, topics })
    }
}

async fn next_revision(tx: &mut Transaction<'_, Postgres>) -> Result<u64, StoreError> {
    let row = sqlx::query("UPDATE ledger_revision SET revision = revision + 1 WHERE id = 1 RETURNING revision")
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("next_revision", e))?;
    Ok(decode::<i64>(&row, "revision")? as u64)
}

async fn bump_topics(tx: &mut Transaction<'_, Postgres>, topics: &[Topic], revision: u64) -> Result<(), StoreError> {
    for topic in topics {
        sqlx::query(
            r#"
            INSERT INTO topic_revisions (topic, revision) VALUES ($1, $2)
            ON CONFLICT (topic) DO UPDATE SET revision = EXCLUDED.revision
            "#,
        )
        .bind(topic.as_str())
        .bind(revision as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("bump_topic", e))?;
    }
    Ok(())
}

async fn write_level(tx: &mut Transaction<'_, Postgres>, level: &StockLevel) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_levels (product_id, warehouse_id, quantity, reserved, version)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (product_id, warehouse_id) DO UPDATE SET
            quantity = EXCLUDED.quantity,
            reserved = EXCLUDED.reserved,
            version = EXCLUDED.version
        "#,
    )
    .bind(level.product_id.as_uuid())
    .bind(level.warehouse_id.as_uuid())
    .bind(level.quantity)
    .bind(level.reserved)
    .bind(level.version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_level", e))?;
    Ok(())
}

async fn insert_movement(tx: &mut Transaction<'_, Postgres>, record: &MovementRecord) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO stock_movements ({MOVEMENT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
    );
    sqlx::query(&sql)
        .bind(record.id.as_uuid())
        .bind(record.product_id.as_uuid())
        .bind(record.warehouse_id.as_uuid())
        .bind(record.movement_type.as_str())
        .bind(record.quantity_delta)
        .bind(record.reserved_delta)
        .bind(record.requested_delta)
        .bind(record.previous_qty)
        .bind(record.new_qty)
        .bind(record.counterparty_warehouse_id.map(Uuid::from))
        .bind(record.transfer_id.map(Uuid::from))
        .bind(record.reason_code.map(|r| r.as_str()))
        .bind(&record.reference_number)
        .bind(&record.actor)
        .bind(&record.notes)
        .bind(&record.dedup_key)
        .bind(record.occurred_at)
        .bind(record.recorded_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::InvalidWrite(format!("movement {} already recorded", record.id))
            } else {
                map_sqlx_error("insert_movement", e)
            }
        })?;
    Ok(())
}

fn decode<'r, T>(row: &'r PgRow, column: &'static str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::backend("decode_row", format!("column {column}: {e}")))
}

fn level_from_row(row: &PgRow) -> Result<StockLevel, StoreError> {
    Ok(StockLevel {
        product_id: ProductId::from(decode::<Uuid>(row, "product_id")?),
        warehouse_id: WarehouseId::from(decode::<Uuid>(row, "warehouse_id")?),
        quantity: decode(row, "quantity")?,
        reserved: decode(row, "reserved")?,
        version: decode::<i64>(row, "version")? as u64,
    })
}

fn movement_from_row(row: &PgRow) -> Result<MovementRecord, StoreError> {
    let movement_type: String = decode(row, "movement_type")?;
    let reason_code: Option<String> = decode(row, "reason_code")?;
    Ok(MovementRecord {
        id: decode::<Uuid>(row, "id")?.into(),
        product_id: decode::<Uuid>(row, "product_id")?.into(),
        warehouse_id: decode::<Uuid>(row, "warehouse_id")?.into(),
        movement_type: movement_type
            .parse()
            .map_err(|e| StoreError::backend("decode_row", format!("movement_type: {e}")))?,
        quantity_delta: decode(row, "quantity_delta")?,
        reserved_delta: decode(row, "reserved_delta")?,
        requested_delta: decode(row, "requested_delta")?,
        previous_qty: decode(row, "previous_qty")?,
        new_qty: decode(row, "new_qty")?,
        counterparty_warehouse_id: decode::<Option<Uuid>>(row, "counterparty_warehouse_id")?.map(Into::into),
        transfer_id: decode::<Option<Uuid>>(row, "transfer_id")?.map(Into::into),
        reason_code: reason_code
            .map(|r| r.parse())
            .transpose()
            .map_err(|e| StoreError::backend("decode_row", format!("reason_code: {e}")))?,
        reference_number: decode(row, "reference_number")?,
        actor: decode(row, "actor")?,
        notes: decode(row, "notes")?,
        dedup_key: decode(row, "dedup_key")?,
        occurred_at: decode(row, "occurred_at")?,
        recorded_at: decode(row, "recorded_at")?,
    })
}

fn warehouse_from_row(row: &PgRow) -> Result<Warehouse, StoreError> {
    Ok(Warehouse {
        id: decode::<Uuid>(row, "id")?.into(),
        name: decode(row, "name")?,
        address: decode(row, "address")?,
        city: decode(row, "city")?,
        country: decode(row, "country")?,
        manager_name: decode(row, "manager_name")?,
        capacity: decode(row, "capacity")?,
        is_active: decode(row, "is_active")?,
        created_at: decode(row, "created_at")?,
        updated_at: decode(row, "updated_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: decode::<Uuid>(row, "id")?.into(),
        title: decode(row, "title")?,
        description: decode(row, "description")?,
        sku: decode(row, "sku")?,
        barcode: decode(row, "barcode")?,
        price: decode(row, "price")?,
        stock: decode(row, "stock")?,
        low_stock_threshold: decode(row, "low_stock_threshold")?,
        created_at: decode(row, "created_at")?,
        updated_at: decode(row, "updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Map SQLx errors to `StoreError`. Backend details stay in the message for logs.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(format!("unique constraint violated in {operation}")),
                Some("23503") | Some("23514") => StoreError::InvalidWrite(msg),
                // numeric_value_out_of_range, e.g. SUM(quantity)::BIGINT
                Some("22003") => StoreError::Overflow(operation.to_string()),
                _ => StoreError::backend(operation, msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::backend(operation, "connection pool closed"),
        other => StoreError::backend(operation, other.to_string()),
    }
}
