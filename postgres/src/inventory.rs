//! `PostgreSQL` implementation of [`InventoryStore`].
//!
//! # Schema
//!
//! - `items`: one row per sale, holding the authoritative `remaining_stock`
//! - `purchase_records`: primary key `(item_id, buyer_id)`
//!
//! Both tables are created by the migrations embedded in this crate; call
//! [`PostgresInventoryStore::migrate`] once at startup.
//!
//! # Locking
//!
//! A purchase transaction inserts the record first and decrements stock
//! second, so the `items` row lock (taken by the `UPDATE`) is held only for
//! the tail of the transaction. Duplicate buyers are turned away by the
//! primary key before they ever touch the contended row.

use chrono::{DateTime, Utc};
use flashsale_core::error::{StoreError, StoreResult};
use flashsale_core::store::{BoxFuture, InventoryStore, InventoryTransaction};
use flashsale_core::types::{BuyerId, Item, ItemId, PurchaseRecord};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

fn database_error(e: &sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_to_item(row: &PgRow) -> StoreResult<Item> {
    let get_err = |e: sqlx::Error| database_error(&e);
    let stock: i32 = row.try_get("remaining_stock").map_err(get_err)?;
    Ok(Item {
        id: ItemId::new(row.try_get("id").map_err(get_err)?),
        name: row.try_get("name").map_err(get_err)?,
        remaining_stock: u32::try_from(stock)
            .map_err(|_| StoreError::Database(format!("Negative stock: {stock}")))?,
        start_time: row.try_get("start_time").map_err(get_err)?,
        end_time: row.try_get("end_time").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
    })
}

fn row_to_purchase(row: &PgRow) -> StoreResult<PurchaseRecord> {
    let get_err = |e: sqlx::Error| database_error(&e);
    Ok(PurchaseRecord {
        item_id: ItemId::new(row.try_get("item_id").map_err(get_err)?),
        buyer_id: BuyerId::new(row.try_get("buyer_id").map_err(get_err)?),
        purchased_at: row.try_get("created_at").map_err(get_err)?,
    })
}

const SELECT_PURCHASE: &str = r"
    SELECT item_id, buyer_id, created_at
    FROM purchase_records
    WHERE item_id = $1 AND buyer_id = $2
";

/// Durable inventory backed by a `PostgreSQL` connection pool.
///
/// # Example
///
/// ```no_run
/// use flashsale_postgres::PostgresInventoryStore;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let url = "postgres://localhost/flashsale";
/// let store = PostgresInventoryStore::connect(url, 10, Duration::from_secs(5)).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be established.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to PostgreSQL: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    /// Create an item, or reset an existing one to `item`.
    ///
    /// Used to seed sales; admission never writes items except through the
    /// conditional stock decrement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the statement fails.
    pub async fn upsert_item(&self, item: &Item) -> StoreResult<()> {
        let stock = i32::try_from(item.remaining_stock)
            .map_err(|_| {
                StoreError::Database(format!("Stock too large: {}", item.remaining_stock))
            })?;

        sqlx::query(
            r"
            INSERT INTO items (id, name, remaining_stock, start_time, end_time, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                remaining_stock = EXCLUDED.remaining_stock,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time
            ",
        )
        .bind(item.id.value())
        .bind(&item.name)
        .bind(stock)
        .bind(item.start_time)
        .bind(item.end_time)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        tracing::debug!(item_id = %item.id, stock, "Item seeded");
        Ok(())
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn find_item(&self, item_id: ItemId) -> BoxFuture<'_, StoreResult<Option<Item>>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, name, remaining_stock, start_time, end_time, created_at
                FROM items
                WHERE id = $1
                ",
            )
            .bind(item_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error(&e))?;

            row.as_ref().map(row_to_item).transpose()
        })
    }

    fn list_items(&self, offset: u32, limit: u32) -> BoxFuture<'_, StoreResult<Vec<Item>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, name, remaining_stock, start_time, end_time, created_at
                FROM items
                ORDER BY created_at DESC, id ASC
                OFFSET $1
                LIMIT $2
                ",
            )
            .bind(i64::from(offset))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database_error(&e))?;

            rows.iter().map(row_to_item).collect()
        })
    }

    fn find_purchase(
        &self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> BoxFuture<'_, StoreResult<Option<PurchaseRecord>>> {
        Box::pin(async move {
            let row = sqlx::query(SELECT_PURCHASE)
                .bind(item_id.value())
                .bind(buyer_id.value())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| database_error(&e))?;

            row.as_ref().map(row_to_purchase).transpose()
        })
    }

    fn begin(&self) -> BoxFuture<'_, StoreResult<Box<dyn InventoryTransaction>>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(|e| database_error(&e))?;
            Ok(Box::new(PostgresTransaction { tx }) as Box<dyn InventoryTransaction>)
        })
    }
}

/// An open purchase transaction.
///
/// Dropping it without [`InventoryTransaction::commit`] rolls back, as sqlx
/// does for any unfinished [`Transaction`].
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl InventoryTransaction for PostgresTransaction {
    fn insert_purchase(
        &mut self,
        item_id: ItemId,
        buyer_id: BuyerId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO purchase_records (item_id, buyer_id, created_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (item_id, buyer_id) DO NOTHING
                ",
            )
            .bind(item_id.value())
            .bind(buyer_id.value())
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| database_error(&e))?;

            Ok(result.rows_affected())
        })
    }

    fn decrement_stock(
        &mut self,
        item_id: ItemId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE items
                SET remaining_stock = remaining_stock - 1
                WHERE id = $1
                  AND remaining_stock > 0
                  AND start_time <= $2
                  AND end_time >= $2
                ",
            )
            .bind(item_id.value())
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| database_error(&e))?;

            Ok(result.rows_affected())
        })
    }

    fn find_purchase(
        &mut self,
        item_id: ItemId,
        buyer_id: BuyerId,
    ) -> BoxFuture<'_, StoreResult<Option<PurchaseRecord>>> {
        Box::pin(async move {
            let row = sqlx::query(SELECT_PURCHASE)
                .bind(item_id.value())
                .bind(buyer_id.value())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| database_error(&e))?;

            row.as_ref().map(row_to_purchase).transpose()
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        let Self { tx } = *self;
        Box::pin(async move { tx.commit().await.map_err(|e| database_error(&e)) })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        let Self { tx } = *self;
        Box::pin(async move { tx.rollback().await.map_err(|e| database_error(&e)) })
    }
}
