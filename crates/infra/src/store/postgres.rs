//! Postgres-backed inventory, ledger and catalog.
//!
//! A [`PostgresScope`] wraps one database transaction. Stock is only ever
//! reduced through a guarded `UPDATE`, and the schema's `CHECK` constraints
//! reject negative stock independently of the engine.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | Where | StoreError |
//! |-----------------------|-------|------------|
//! | `23505` | product insert | `DuplicateSku` |
//! | `23505` | sale insert (`sales_idempotency_key_unique`) | `DuplicateIdempotencyKey` |
//! | `23503` | product delete | `Referenced` |
//! | `23514` | any | `Invariant` |
//! | `40001` / `40P01` | guarded decrement | reported as `DecrementOutcome::Conflict` |
//! | Any other | any | `Backend` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use tillpoint_core::{Entity, Money, ProductId, SaleId, StockGuard};
use tillpoint_inventory::{NewProduct, Product, ProductPatch};
use tillpoint_sales::{IdempotencyKey, Sale, SaleLineItem};

use super::r#trait::{
    DecrementOutcome, InventoryStore, ProductCatalog, SaleLedger, SaleStore, StoreError,
    TransactionScope,
};

const IDEMPOTENCY_KEY_CONSTRAINT: &str = "sales_idempotency_key_unique";

/// Postgres-backed sale store and product catalog.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresSaleStore {
    pool: Arc<PgPool>,
}

impl PostgresSaleStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One open database transaction.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PostgresScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryStore for PostgresScope {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        fetch_product(&mut *self.tx, id).await
    }

    #[instrument(skip(self, ids), fields(product_count = ids.len()), err)]
    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        // Ascending id order keeps concurrent lockers from deadlocking.
        sqlx::query("SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&uuids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_products", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn conditional_decrement(
        &mut self,
        id: ProductId,
        amount: i64,
        guard: StockGuard,
    ) -> Result<DecrementOutcome, StoreError> {
        let expected = match guard {
            StockGuard::AtLeast => None,
            StockGuard::Unchanged(stock) => Some(stock),
        };

        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2,
                updated_at = NOW()
            WHERE id = $1
                AND stock_quantity >= $2
                AND ($3::bigint IS NULL OR stock_quantity = $3)
            RETURNING stock_quantity
            "#,
        )
        .bind(id.as_uuid())
        .bind(amount)
        .bind(expected)
        .fetch_optional(&mut *self.tx)
        .await;

        match result {
            Ok(Some(row)) => {
                let remaining: i64 = row
                    .try_get("stock_quantity")
                    .map_err(|e| map_sqlx_error("conditional_decrement", e))?;
                Ok(DecrementOutcome::Applied { remaining })
            }
            Ok(None) => Ok(DecrementOutcome::Conflict),
            Err(e) if is_serialization_failure(&e) => {
                debug!(product_id = %id, "decrement lost a serialization race");
                Ok(DecrementOutcome::Conflict)
            }
            Err(e) => Err(map_sqlx_error("conditional_decrement", e)),
        }
    }
}

#[async_trait]
impl SaleLedger for PostgresScope {
    #[instrument(skip(self, sale), fields(sale_id = %sale.id(), line_count = sale.line_items().len()), err)]
    async fn append_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sales (id, created_at, total_amount, idempotency_key)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(sale.id().as_uuid())
        .bind(sale.created_at())
        .bind(sale.total_amount().amount())
        .bind(sale.idempotency_key().map(IdempotencyKey::as_str))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match (sale.idempotency_key(), constraint_of(&e)) {
            (Some(key), Some(IDEMPOTENCY_KEY_CONSTRAINT)) => {
                StoreError::DuplicateIdempotencyKey(key.clone())
            }
            _ => map_sqlx_error("insert_sale", e),
        })?;

        for (ordinal, line) in sale.line_items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_line_items (sale_id, ordinal, product_id, quantity, unit_price_at_sale)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(sale.id().as_uuid())
            .bind(ordinal as i32)
            .bind(line.product_id().as_uuid())
            .bind(line.quantity())
            .bind(line.unit_price_at_sale().amount())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_sale_line_item", e))?;
        }

        Ok(())
    }

    #[instrument(skip(self, key), err)]
    async fn find_by_idempotency_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<Sale>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, total_amount, idempotency_key
            FROM sales
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let sale = SaleRow::from_row(&row).map_err(|e| map_sqlx_error("read_sale_row", e))?;
        let mut sales = hydrate_sales(&mut *self.tx, vec![sale]).await?;
        Ok(sales.pop())
    }
}

#[async_trait]
impl TransactionScope for PostgresScope {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl SaleStore for PostgresSaleStore {
    type Scope = PostgresScope;

    async fn begin(&self) -> Result<Self::Scope, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresScope { tx })
    }

    #[instrument(skip(self), fields(sale_id = %id), err)]
    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, total_amount, idempotency_key
            FROM sales
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_sale", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let sale = SaleRow::from_row(&row).map_err(|e| map_sqlx_error("read_sale_row", e))?;
        let mut sales = hydrate_sales(&*self.pool, vec![sale]).await?;
        Ok(sales.pop())
    }

    #[instrument(skip(self), err)]
    async fn list_sales(&self) -> Result<Vec<Sale>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, total_amount, idempotency_key
            FROM sales
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sales", e))?;

        let sales = rows
            .iter()
            .map(SaleRow::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("read_sale_row", e))?;
        hydrate_sales(&*self.pool, sales).await
    }
}

#[async_trait]
impl ProductCatalog for PostgresSaleStore {
    #[instrument(skip(self, new), fields(sku = %new.sku), err)]
    async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        let product = new.into_product(ProductId::new())?;

        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, unit_price, stock_quantity)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(product.id().as_uuid())
        .bind(product.sku())
        .bind(product.name())
        .bind(product.unit_price().amount())
        .bind(product.stock_quantity())
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateSku(product.sku().to_string())
            } else {
                map_sqlx_error("create_product", e)
            }
        })?;

        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        fetch_product(&*self.pool, id).await
    }

    #[instrument(skip(self, patch), fields(product_id = %id), err)]
    async fn update_product(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            SELECT id, sku, name, unit_price, stock_quantity
            FROM products
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_product_for_update", e))?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(format!("product {id}")));
        };
        let current = ProductRow::from_row(&row)
            .map_err(|e| map_sqlx_error("read_product_row", e))?
            .into_product()?;
        let next = current.patched(patch)?;

        sqlx::query(
            r#"
            UPDATE products
            SET name = $2, unit_price = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(next.name())
        .bind(next.unit_price().amount())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(next)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn remove_product(&self, id: ProductId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    StoreError::Referenced(id)
                } else {
                    map_sqlx_error("remove_product", e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }
}

async fn fetch_product<'e, E>(executor: E, id: ProductId) -> Result<Option<Product>, StoreError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, sku, name, unit_price, stock_quantity
        FROM products
        WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("get_product", e))?;

    match row {
        Some(row) => {
            let product = ProductRow::from_row(&row)
                .map_err(|e| map_sqlx_error("read_product_row", e))?
                .into_product()?;
            Ok(Some(product))
        }
        None => Ok(None),
    }
}

/// Attach line items (in ordinal order) to sale rows, preserving row order.
async fn hydrate_sales<'e, E>(executor: E, rows: Vec<SaleRow>) -> Result<Vec<Sale>, StoreError>
where
    E: PgExecutor<'e>,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let line_rows = sqlx::query(
        r#"
        SELECT sale_id, product_id, quantity, unit_price_at_sale
        FROM sale_line_items
        WHERE sale_id = ANY($1)
        ORDER BY sale_id, ordinal ASC
        "#,
    )
    .bind(&ids)
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("load_sale_line_items", e))?;

    let mut lines: HashMap<Uuid, Vec<SaleLineItem>> = HashMap::with_capacity(rows.len());
    for row in &line_rows {
        let line = LineItemRow::from_row(row).map_err(|e| map_sqlx_error("read_line_item_row", e))?;
        let sale_id = line.sale_id;
        lines.entry(sale_id).or_default().push(line.into_line_item()?);
    }

    rows.into_iter()
        .map(|row| {
            let items = lines.remove(&row.id).unwrap_or_default();
            row.into_sale(items)
        })
        .collect()
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Check constraint violation (e.g. stock_quantity >= 0)
                Some("23514") => StoreError::Invariant(msg),
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

fn constraint_of(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.is_unique_violation();
    }
    false
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.is_foreign_key_violation();
    }
    false
}

/// Serialization failure or deadlock: the other transaction won.
fn is_serialization_failure(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return matches!(code.as_ref(), "40001" | "40P01");
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    unit_price: Decimal,
    stock_quantity: i64,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            unit_price: row.try_get("unit_price")?,
            stock_quantity: row.try_get("stock_quantity")?,
        })
    }
}

impl ProductRow {
    fn into_product(self) -> Result<Product, StoreError> {
        let price = Money::new(self.unit_price)?;
        Ok(Product::from_parts(
            ProductId::from_uuid(self.id),
            self.sku,
            self.name,
            price,
            self.stock_quantity,
        )?)
    }
}

#[derive(Debug)]
struct SaleRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    total_amount: Decimal,
    idempotency_key: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for SaleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SaleRow {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            total_amount: row.try_get("total_amount")?,
            idempotency_key: row.try_get("idempotency_key")?,
        })
    }
}

impl SaleRow {
    fn into_sale(self, line_items: Vec<SaleLineItem>) -> Result<Sale, StoreError> {
        let key = self
            .idempotency_key
            .map(IdempotencyKey::new)
            .transpose()
            .map_err(|e| StoreError::Invariant(format!("stored sale {}: {e}", self.id)))?;
        Ok(Sale::from_parts(
            SaleId::from_uuid(self.id),
            self.created_at,
            Money::new(self.total_amount)?,
            line_items,
            key,
        )?)
    }
}

#[derive(Debug)]
struct LineItemRow {
    sale_id: Uuid,
    product_id: Uuid,
    quantity: i64,
    unit_price_at_sale: Decimal,
}

impl<'r> FromRow<'r, PgRow> for LineItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineItemRow {
            sale_id: row.try_get("sale_id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            unit_price_at_sale: row.try_get("unit_price_at_sale")?,
        })
    }
}

impl LineItemRow {
    fn into_line_item(self) -> Result<SaleLineItem, StoreError> {
        Ok(SaleLineItem::new(
            ProductId::from_uuid(self.product_id),
            self.quantity,
            Money::new(self.unit_price_at_sale)?,
        )?)
    }
}
