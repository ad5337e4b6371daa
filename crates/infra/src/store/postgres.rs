//! PostgreSQL-backed inventory store.
//!
//! ## Locking
//!
//! Row locks are `SELECT ... FOR UPDATE`. A stock row that may not exist yet is
//! claimed with `INSERT ... ON CONFLICT DO NOTHING` followed by a locking read,
//! so two transactions racing to open the same (item, location) both end up
//! waiting on one row instead of one of them failing on the unique constraint.
//! Every transaction sets `lock_timeout` locally; an expired wait surfaces as
//! `StoreError::LockTimeout`.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation on `stock_item_location_key`) | `23505` | `DuplicateStockPair` |
//! | Database (unique violation on `*_code_key`) | `23505` | `DuplicateCode` |
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | anything else | any | `Backend` |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockkeep_core::{
    AdjustmentId, DocumentId, ItemId, LineId, LocationId, StockId, StockKey, UserId,
};
use stockkeep_documents::{
    AnyDocument, Document, DocumentHeader, DocumentKind, DocumentStatus, PurchaseLine, PurchaseRecord,
    PurchaseRecordParts, UsageLine, UsageRecord, UsageRecordParts, UsageType,
};
use stockkeep_stock::{AdjustmentType, Stock, StockAdjustment, StockFilter, StockRecord};

use super::r#trait::{InventoryStore, StoreError, StoreTx};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory_ledger.sql");

macro_rules! select_stock {
    ($tail:literal) => {
        concat!(
            "SELECT id, item_id, location_id, quantity, min_quantity, latest_purchase_price, \
             latest_purchase_date, expiry_date, memo, created_at, updated_at FROM stock ",
            $tail
        )
    };
}

macro_rules! select_purchase {
    ($tail:literal) => {
        concat!(
            "SELECT id, code, status, purchase_date, store_name, store_type, remarks, \
             total_amount, created_by, confirmed_by, confirmed_at, created_at, updated_at \
             FROM purchase_records ",
            $tail
        )
    };
}

macro_rules! select_usage {
    ($tail:literal) => {
        concat!(
            "SELECT id, code, status, usage_date, usage_type, remarks, created_by, \
             confirmed_by, confirmed_at, created_at, updated_at FROM usage_records ",
            $tail
        )
    };
}

/// PostgreSQL inventory store.
///
/// `Send + Sync`; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(PostgresTx { tx })
    }
}

/// Open PostgreSQL transaction. Dropping it rolls back.
#[derive(Debug)]
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    async fn fetch_stock(
        &mut self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Option<Stock>, StoreError> {
        let row = query
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.as_ref().map(stock_from_row).transpose()
    }

    async fn load_purchase(&mut self, id: DocumentId, lock: bool) -> Result<Option<AnyDocument>, StoreError> {
        let sql = if lock {
            select_purchase!("WHERE id = $1 FOR UPDATE")
        } else {
            select_purchase!("WHERE id = $1")
        };
        let Some(row) = sqlx::query(sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_purchase", e))?
        else {
            return Ok(None);
        };
        let mut lines = self.purchase_lines(&[*id.as_uuid()]).await?;
        let doc = purchase_from_row(&row, lines.remove(id.as_uuid()).unwrap_or_default())?;
        Ok(Some(AnyDocument::Purchase(doc)))
    }

    async fn load_usage(&mut self, id: DocumentId, lock: bool) -> Result<Option<AnyDocument>, StoreError> {
        let sql = if lock {
            select_usage!("WHERE id = $1 FOR UPDATE")
        } else {
            select_usage!("WHERE id = $1")
        };
        let Some(row) = sqlx::query(sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_usage", e))?
        else {
            return Ok(None);
        };
        let mut lines = self.usage_lines(&[*id.as_uuid()]).await?;
        let doc = usage_from_row(&row, lines.remove(id.as_uuid()).unwrap_or_default())?;
        Ok(Some(AnyDocument::Usage(doc)))
    }

    async fn load_document(&mut self, id: DocumentId, lock: bool) -> Result<Option<AnyDocument>, StoreError> {
        if let Some(doc) = self.load_purchase(id, lock).await? {
            return Ok(Some(doc));
        }
        self.load_usage(id, lock).await
    }

    async fn purchase_lines(
        &mut self,
        record_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<PurchaseLine>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, record_id, item_id, location_id, quantity, unit_price, total_price,
                   expiry_date, remarks
            FROM purchase_record_lines
            WHERE record_id = ANY($1)
            ORDER BY record_id, position
            "#,
        )
        .bind(record_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_purchase_lines", e))?;

        let mut out: HashMap<Uuid, Vec<PurchaseLine>> = HashMap::new();
        for row in rows {
            let record_id: Uuid = row.try_get("record_id").map_err(decode_error)?;
            let line = PurchaseLine {
                id: LineId::from_uuid(row.try_get("id").map_err(decode_error)?),
                item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode_error)?),
                location_id: LocationId::from_uuid(row.try_get("location_id").map_err(decode_error)?),
                quantity: row.try_get("quantity").map_err(decode_error)?,
                unit_price: row.try_get("unit_price").map_err(decode_error)?,
                total_price: row.try_get("total_price").map_err(decode_error)?,
                expiry_date: row.try_get("expiry_date").map_err(decode_error)?,
                remarks: row.try_get("remarks").map_err(decode_error)?,
            };
            out.entry(record_id).or_default().push(line);
        }
        Ok(out)
    }

    async fn usage_lines(
        &mut self,
        record_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<UsageLine>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, record_id, item_id, location_id, quantity, remarks
            FROM usage_record_lines
            WHERE record_id = ANY($1)
            ORDER BY record_id, position
            "#,
        )
        .bind(record_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_usage_lines", e))?;

        let mut out: HashMap<Uuid, Vec<UsageLine>> = HashMap::new();
        for row in rows {
            let record_id: Uuid = row.try_get("record_id").map_err(decode_error)?;
            let line = UsageLine {
                id: LineId::from_uuid(row.try_get("id").map_err(decode_error)?),
                item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode_error)?),
                location_id: LocationId::from_uuid(row.try_get("location_id").map_err(decode_error)?),
                quantity: row.try_get("quantity").map_err(decode_error)?,
                remarks: row.try_get("remarks").map_err(decode_error)?,
            };
            out.entry(record_id).or_default().push(line);
        }
        Ok(out)
    }

    async fn insert_purchase_lines(&mut self, doc: &PurchaseRecord) -> Result<(), StoreError> {
        for (position, line) in doc.lines().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO purchase_record_lines (
                    id, record_id, position, item_id, location_id, quantity,
                    unit_price, total_price, expiry_date, remarks
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(doc.header().id.as_uuid())
            .bind(position as i32)
            .bind(line.item_id.as_uuid())
            .bind(line.location_id.as_uuid())
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total_price)
            .bind(line.expiry_date)
            .bind(&line.remarks)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_purchase_line", e))?;
        }
        Ok(())
    }

    async fn insert_usage_lines(&mut self, doc: &UsageRecord) -> Result<(), StoreError> {
        for (position, line) in doc.lines().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO usage_record_lines (
                    id, record_id, position, item_id, location_id, quantity, remarks
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(doc.header().id.as_uuid())
            .bind(position as i32)
            .bind(line.item_id.as_uuid())
            .bind(line.location_id.as_uuid())
            .bind(line.quantity)
            .bind(&line.remarks)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_usage_line", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn get_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError> {
        let query = sqlx::query(select_stock!("WHERE id = $1")).bind(*id.as_uuid());
        self.fetch_stock("get_stock", query).await
    }

    #[instrument(level = "debug", skip(self), fields(stock_id = %id, operation = tracing::field::Empty), err)]
    async fn lock_stock(&mut self, id: StockId) -> Result<Option<Stock>, StoreError> {
        Span::current().record("operation", "lock_stock");
        let query = sqlx::query(select_stock!("WHERE id = $1 FOR UPDATE")).bind(*id.as_uuid());
        self.fetch_stock("lock_stock", query).await
    }

    #[instrument(level = "debug", skip(self), fields(key = %key, operation = tracing::field::Empty), err)]
    async fn lock_stock_by_key(&mut self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        Span::current().record("operation", "lock_stock_by_key");
        let query = sqlx::query(select_stock!(
            "WHERE item_id = $1 AND location_id = $2 FOR UPDATE"
        ))
        .bind(*key.item_id.as_uuid())
        .bind(*key.location_id.as_uuid());
        self.fetch_stock("lock_stock_by_key", query).await
    }

    #[instrument(level = "debug", skip(self, seed), fields(key = %seed.key(), operation = tracing::field::Empty), err)]
    async fn lock_or_insert_stock(&mut self, seed: Stock) -> Result<(Stock, bool), StoreError> {
        Span::current().record("operation", "lock_or_insert_stock");
        let key = seed.key();
        let record = seed.record();
        let inserted = sqlx::query(
            r#"
            INSERT INTO stock (
                id, item_id, location_id, quantity, min_quantity, latest_purchase_price,
                latest_purchase_date, expiry_date, memo, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (item_id, location_id) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.item_id.as_uuid())
        .bind(record.location_id.as_uuid())
        .bind(record.quantity)
        .bind(record.min_quantity)
        .bind(record.latest_purchase_price)
        .bind(record.latest_purchase_date)
        .bind(record.expiry_date)
        .bind(&record.memo)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_or_insert_stock", e))?
        .rows_affected()
            == 1;

        let stock = self.lock_stock_by_key(key).await?.ok_or_else(|| {
            StoreError::Backend(format!("stock row for {key} vanished after insert"))
        })?;
        Ok((stock, inserted))
    }

    async fn insert_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        let record = stock.record();
        sqlx::query(
            r#"
            INSERT INTO stock (
                id, item_id, location_id, quantity, min_quantity, latest_purchase_price,
                latest_purchase_date, expiry_date, memo, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.item_id.as_uuid())
        .bind(record.location_id.as_uuid())
        .bind(record.quantity)
        .bind(record.min_quantity)
        .bind(record.latest_purchase_price)
        .bind(record.latest_purchase_date)
        .bind(record.expiry_date)
        .bind(&record.memo)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateStockPair {
                    item_id: record.item_id,
                    location_id: record.location_id,
                }
            } else {
                map_sqlx_error("insert_stock", e)
            }
        })?;
        Ok(())
    }

    async fn update_stock(&mut self, stock: &Stock) -> Result<(), StoreError> {
        let record = stock.record();
        let result = sqlx::query(
            r#"
            UPDATE stock
            SET quantity = $2,
                min_quantity = $3,
                latest_purchase_price = $4,
                latest_purchase_date = $5,
                expiry_date = $6,
                memo = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.quantity)
        .bind(record.min_quantity)
        .bind(record.latest_purchase_price)
        .bind(record.latest_purchase_date)
        .bind(record.expiry_date)
        .bind(&record.memo)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_stock", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("stock {} does not exist", record.id)));
        }
        Ok(())
    }

    async fn delete_stock(&mut self, id: StockId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM stock WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_stock", e))?;
        Ok(())
    }

    async fn list_stock(&mut self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError> {
        let rows = sqlx::query(select_stock!(
            "WHERE ($1::uuid IS NULL OR item_id = $1) \
             AND ($2::uuid IS NULL OR location_id = $2) \
             AND (NOT $3 OR quantity <= min_quantity) \
             ORDER BY item_id, location_id"
        ))
        .bind(filter.item_id.map(Uuid::from))
        .bind(filter.location_id.map(Uuid::from))
        .bind(filter.low_stock_only)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_stock", e))?;

        rows.iter().map(stock_from_row).collect()
    }

    async fn append_adjustment(&mut self, adjustment: &StockAdjustment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustments (
                id, stock_id, adjustment_type, quantity_before, quantity_after, delta,
                reason, remarks, actor_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(adjustment.id.as_uuid())
        .bind(adjustment.stock_id.as_uuid())
        .bind(adjustment.adjustment_type.as_str())
        .bind(adjustment.quantity_before)
        .bind(adjustment.quantity_after)
        .bind(adjustment.delta)
        .bind(&adjustment.reason)
        .bind(&adjustment.remarks)
        .bind(adjustment.actor.map(Uuid::from))
        .bind(adjustment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_adjustment", e))?;
        Ok(())
    }

    async fn list_adjustments(
        &mut self,
        stock_id: StockId,
    ) -> Result<Vec<StockAdjustment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, stock_id, adjustment_type, quantity_before, quantity_after, delta,
                   reason, remarks, actor_id, created_at
            FROM stock_adjustments
            WHERE stock_id = $1
            ORDER BY created_at DESC, seq DESC
            "#,
        )
        .bind(stock_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_adjustments", e))?;

        rows.iter().map(adjustment_from_row).collect()
    }

    async fn get_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError> {
        self.load_document(id, false).await
    }

    #[instrument(level = "debug", skip(self), fields(document_id = %id, operation = tracing::field::Empty), err)]
    async fn lock_document(&mut self, id: DocumentId) -> Result<Option<AnyDocument>, StoreError> {
        Span::current().record("operation", "lock_document");
        self.load_document(id, true).await
    }

    async fn document_code_exists(
        &mut self,
        kind: DocumentKind,
        code: &str,
    ) -> Result<bool, StoreError> {
        let sql = match kind {
            DocumentKind::Purchase => "SELECT EXISTS (SELECT 1 FROM purchase_records WHERE code = $1)",
            DocumentKind::Usage => "SELECT EXISTS (SELECT 1 FROM usage_records WHERE code = $1)",
        };
        let row = sqlx::query(sql)
            .bind(code)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("document_code_exists", e))?;
        row.try_get::<bool, _>(0).map_err(decode_error)
    }

    async fn insert_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError> {
        let code = doc.header().code.clone();
        let map_insert = |e: sqlx::Error| {
            if is_unique_violation(&e) {
                StoreError::DuplicateCode(code.clone())
            } else {
                map_sqlx_error("insert_document", e)
            }
        };
        match doc {
            AnyDocument::Purchase(record) => {
                let parts = record.parts();
                let h = &parts.header;
                sqlx::query(
                    r#"
                    INSERT INTO purchase_records (
                        id, code, status, purchase_date, store_name, store_type, remarks,
                        total_amount, created_by, confirmed_by, confirmed_at, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(h.id.as_uuid())
                .bind(&h.code)
                .bind(h.status.as_str())
                .bind(parts.purchase_date)
                .bind(&parts.store_name)
                .bind(&parts.store_type)
                .bind(&h.remarks)
                .bind(parts.total_amount)
                .bind(h.created_by.as_uuid())
                .bind(h.confirmed_by.map(Uuid::from))
                .bind(h.confirmed_at)
                .bind(h.created_at)
                .bind(h.updated_at)
                .execute(&mut *self.tx)
                .await
                .map_err(map_insert)?;
                self.insert_purchase_lines(record).await
            }
            AnyDocument::Usage(record) => {
                let parts = record.parts();
                let h = &parts.header;
                sqlx::query(
                    r#"
                    INSERT INTO usage_records (
                        id, code, status, usage_date, usage_type, remarks,
                        created_by, confirmed_by, confirmed_at, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(h.id.as_uuid())
                .bind(&h.code)
                .bind(h.status.as_str())
                .bind(parts.usage_date)
                .bind(parts.usage_type.as_str())
                .bind(&h.remarks)
                .bind(h.created_by.as_uuid())
                .bind(h.confirmed_by.map(Uuid::from))
                .bind(h.confirmed_at)
                .bind(h.created_at)
                .bind(h.updated_at)
                .execute(&mut *self.tx)
                .await
                .map_err(map_insert)?;
                self.insert_usage_lines(record).await
            }
        }
    }

    async fn update_document(&mut self, doc: &AnyDocument) -> Result<(), StoreError> {
        match doc {
            AnyDocument::Purchase(record) => {
                let parts = record.parts();
                let h = &parts.header;
                let result = sqlx::query(
                    r#"
                    UPDATE purchase_records
                    SET status = $2, purchase_date = $3, store_name = $4, store_type = $5,
                        remarks = $6, total_amount = $7, created_by = $8, confirmed_by = $9,
                        confirmed_at = $10, updated_at = $11
                    WHERE id = $1
                    "#,
                )
                .bind(h.id.as_uuid())
                .bind(h.status.as_str())
                .bind(parts.purchase_date)
                .bind(&parts.store_name)
                .bind(&parts.store_type)
                .bind(&h.remarks)
                .bind(parts.total_amount)
                .bind(h.created_by.as_uuid())
                .bind(h.confirmed_by.map(Uuid::from))
                .bind(h.confirmed_at)
                .bind(h.updated_at)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("update_purchase", e))?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::Backend(format!("document {} does not exist", h.id)));
                }

                sqlx::query("DELETE FROM purchase_record_lines WHERE record_id = $1")
                    .bind(h.id.as_uuid())
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx_error("replace_purchase_lines", e))?;
                self.insert_purchase_lines(record).await
            }
            AnyDocument::Usage(record) => {
                let parts = record.parts();
                let h = &parts.header;
                let result = sqlx::query(
                    r#"
                    UPDATE usage_records
                    SET status = $2, usage_date = $3, usage_type = $4, remarks = $5,
                        created_by = $6, confirmed_by = $7, confirmed_at = $8, updated_at = $9
                    WHERE id = $1
                    "#,
                )
                .bind(h.id.as_uuid())
                .bind(h.status.as_str())
                .bind(parts.usage_date)
                .bind(parts.usage_type.as_str())
                .bind(&h.remarks)
                .bind(h.created_by.as_uuid())
                .bind(h.confirmed_by.map(Uuid::from))
                .bind(h.confirmed_at)
                .bind(h.updated_at)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("update_usage", e))?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::Backend(format!("document {} does not exist", h.id)));
                }

                sqlx::query("DELETE FROM usage_record_lines WHERE record_id = $1")
                    .bind(h.id.as_uuid())
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx_error("replace_usage_lines", e))?;
                self.insert_usage_lines(record).await
            }
        }
    }

    async fn delete_document(&mut self, id: DocumentId) -> Result<(), StoreError> {
        for sql in [
            "DELETE FROM purchase_records WHERE id = $1",
            "DELETE FROM usage_records WHERE id = $1",
        ] {
            sqlx::query(sql)
                .bind(id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("delete_document", e))?;
        }
        Ok(())
    }

    async fn list_documents(&mut self, kind: DocumentKind) -> Result<Vec<AnyDocument>, StoreError> {
        match kind {
            DocumentKind::Purchase => {
                let rows = sqlx::query(select_purchase!(
                    "ORDER BY purchase_date DESC, created_at DESC"
                ))
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("list_purchases", e))?;
                let ids = row_ids(&rows)?;
                let mut lines = self.purchase_lines(&ids).await?;
                rows.iter()
                    .zip(ids)
                    .map(|(row, id)| {
                        purchase_from_row(row, lines.remove(&id).unwrap_or_default())
                            .map(AnyDocument::Purchase)
                    })
                    .collect()
            }
            DocumentKind::Usage => {
                let rows = sqlx::query(select_usage!("ORDER BY usage_date DESC, created_at DESC"))
                    .fetch_all(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx_error("list_usages", e))?;
                let ids = row_ids(&rows)?;
                let mut lines = self.usage_lines(&ids).await?;
                rows.iter()
                    .zip(ids)
                    .map(|(row, id)| {
                        usage_from_row(row, lines.remove(&id).unwrap_or_default())
                            .map(AnyDocument::Usage)
                    })
                    .collect()
            }
        }
    }

    async fn stock_has_draft_references(&mut self, key: StockKey) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM purchase_record_lines l
                JOIN purchase_records r ON r.id = l.record_id
                WHERE r.status = 'draft' AND l.item_id = $1 AND l.location_id = $2
                UNION ALL
                SELECT 1
                FROM usage_record_lines l
                JOIN usage_records r ON r.id = l.record_id
                WHERE r.status = 'draft' AND l.item_id = $1 AND l.location_id = $2
            )
            "#,
        )
        .bind(key.item_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("stock_has_draft_references", e))?;
        row.try_get::<bool, _>(0).map_err(decode_error)
    }

    #[instrument(level = "debug", skip(self), fields(operation = tracing::field::Empty), err)]
    async fn commit(self) -> Result<(), StoreError> {
        Span::current().record("operation", "commit_transaction");
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn row_ids(rows: &[PgRow]) -> Result<Vec<Uuid>, StoreError> {
    rows.iter()
        .map(|row| row.try_get::<Uuid, _>("id").map_err(decode_error))
        .collect()
}

fn stock_from_row(row: &PgRow) -> Result<Stock, StoreError> {
    let record = StockRecord {
        id: StockId::from_uuid(row.try_get("id").map_err(decode_error)?),
        item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode_error)?),
        location_id: LocationId::from_uuid(row.try_get("location_id").map_err(decode_error)?),
        quantity: row.try_get("quantity").map_err(decode_error)?,
        min_quantity: row.try_get("min_quantity").map_err(decode_error)?,
        latest_purchase_price: row.try_get("latest_purchase_price").map_err(decode_error)?,
        latest_purchase_date: row.try_get("latest_purchase_date").map_err(decode_error)?,
        expiry_date: row.try_get("expiry_date").map_err(decode_error)?,
        memo: row.try_get("memo").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    };
    Ok(Stock::from_record(record))
}

fn adjustment_from_row(row: &PgRow) -> Result<StockAdjustment, StoreError> {
    let adjustment_type: String = row.try_get("adjustment_type").map_err(decode_error)?;
    let actor: Option<Uuid> = row.try_get("actor_id").map_err(decode_error)?;
    Ok(StockAdjustment {
        id: AdjustmentId::from_uuid(row.try_get("id").map_err(decode_error)?),
        stock_id: StockId::from_uuid(row.try_get("stock_id").map_err(decode_error)?),
        adjustment_type: AdjustmentType::parse(&adjustment_type)
            .map_err(|e| StoreError::Backend(format!("corrupt adjustment row: {e}")))?,
        quantity_before: row.try_get("quantity_before").map_err(decode_error)?,
        quantity_after: row.try_get("quantity_after").map_err(decode_error)?,
        delta: row.try_get("delta").map_err(decode_error)?,
        reason: row.try_get("reason").map_err(decode_error)?,
        remarks: row.try_get("remarks").map_err(decode_error)?,
        actor: actor.map(UserId::from_uuid),
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn header_from_row(row: &PgRow) -> Result<DocumentHeader, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let confirmed_by: Option<Uuid> = row.try_get("confirmed_by").map_err(decode_error)?;
    Ok(DocumentHeader {
        id: DocumentId::from_uuid(row.try_get("id").map_err(decode_error)?),
        code: row.try_get("code").map_err(decode_error)?,
        status: DocumentStatus::parse(&status)
            .map_err(|e| StoreError::Backend(format!("corrupt document row: {e}")))?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(decode_error)?),
        remarks: row.try_get("remarks").map_err(decode_error)?,
        confirmed_by: confirmed_by.map(UserId::from_uuid),
        confirmed_at: row.try_get("confirmed_at").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn purchase_from_row(row: &PgRow, lines: Vec<PurchaseLine>) -> Result<PurchaseRecord, StoreError> {
    Ok(PurchaseRecord::from_parts(PurchaseRecordParts {
        header: header_from_row(row)?,
        purchase_date: row.try_get("purchase_date").map_err(decode_error)?,
        store_name: row.try_get("store_name").map_err(decode_error)?,
        store_type: row.try_get("store_type").map_err(decode_error)?,
        total_amount: row.try_get("total_amount").map_err(decode_error)?,
        lines,
    }))
}

fn usage_from_row(row: &PgRow, lines: Vec<UsageLine>) -> Result<UsageRecord, StoreError> {
    let usage_type: String = row.try_get("usage_type").map_err(decode_error)?;
    Ok(UsageRecord::from_parts(UsageRecordParts {
        header: header_from_row(row)?,
        usage_date: row.try_get("usage_date").map_err(decode_error)?,
        usage_type: UsageType::parse(&usage_type)
            .map_err(|e| StoreError::Backend(format!("corrupt usage row: {e}")))?,
        lines,
    }))
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

/// Check if a SQLx error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_are_backend_errors() {
        assert!(matches!(
            map_sqlx_error("begin_transaction", sqlx::Error::PoolTimedOut),
            StoreError::Backend(msg) if msg.contains("begin_transaction")
        ));
        assert!(matches!(
            map_sqlx_error("lock_stock", sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
    }
}
