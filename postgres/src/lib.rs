//! `PostgreSQL` state store for the delivery coordinator.
//!
//! Implements [`StateStore`] over a single `delivery` table:
//!
//! - Batch insert in one transaction, skipping orders that already exist
//! - Conditional update by `uid` and `version`, bumping `version` in SQL
//! - Connection pooling via sqlx
//!
//! # Example
//!
//! ```no_run
//! use delivery_postgres::PostgresStateStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStateStore::connect("postgres://localhost/delivery", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod row;

pub use row::DeliveryRow;

use delivery_core::delivery::{DeliveryRecord, NewDelivery, RiderIdentity};
use delivery_core::ids::MerchantOrderId;
use delivery_core::state_store::{StateStore, StoreError, StoreFuture};
use delivery_core::status::OrderStatus;
use row::{COLUMNS, Columns};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// `SQLSTATE` for `check_violation`.
const CHECK_VIOLATION: &str = "23514";

/// `PostgreSQL`-backed [`StateStore`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE delivery (
///     uid BIGSERIAL PRIMARY KEY,
///     merchant_uid TEXT NOT NULL UNIQUE,
///     rider_user_uid BIGINT NULL,
///     rider_social_uid BIGINT NULL,
///     status TEXT NOT NULL,
///     ...
///     version BIGINT NOT NULL DEFAULT 0
/// );
/// ```
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_batch(&self, records: Vec<NewDelivery>) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_error("begin", e))?;

        let mut accounted = 0;
        let mut skipped = 0_u64;
        for record in &records {
            let columns = Columns::from(record);
            let result = sqlx::query(
                "INSERT INTO delivery
                     (merchant_uid, rider_user_uid, rider_social_uid, status,
                      address_start, address_destination, delivery_accept_time, delivered_time)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (merchant_uid) DO NOTHING",
            )
            .bind(columns.merchant_uid)
            .bind(columns.rider_user_uid)
            .bind(columns.rider_social_uid)
            .bind(columns.status)
            .bind(columns.address_start)
            .bind(columns.address_destination)
            .bind(columns.delivery_accept_time)
            .bind(columns.delivered_time)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_error("insert", e))?;

            if result.rows_affected() == 0 {
                tracing::debug!(merchant_order_id = %record.merchant_order_id, "Order already stored, skipping");
                skipped += 1;
            }
            accounted += 1;
        }

        tx.commit().await.map_err(|e| map_error("commit", e))?;

        if skipped > 0 {
            metrics::counter!("delivery.store.duplicates_skipped").increment(skipped);
        }
        Ok(accounted)
    }

    /// Load one order, optionally only when it is in `status`.
    async fn select_order(
        &self,
        merchant_order_id: &MerchantOrderId,
        status: Option<OrderStatus>,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM delivery WHERE merchant_uid = $1 AND ($2::TEXT IS NULL OR status = $2)"
        );
        let row: Option<DeliveryRow> = sqlx::query_as(&sql)
            .bind(merchant_order_id.as_str())
            .bind(status.map(OrderStatus::as_str))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_error("select", e))?;

        row.map(DeliveryRecord::try_from).transpose()
    }
}

fn into_records(rows: Vec<DeliveryRow>) -> Result<Vec<DeliveryRecord>, StoreError> {
    rows.into_iter().map(DeliveryRecord::try_from).collect()
}

/// Map a sqlx error, keeping constraint violations distinct.
fn map_error(operation: &str, error: sqlx::Error) -> StoreError {
    if let Some(db) = error.as_database_error() {
        if db.code().as_deref() == Some(CHECK_VIOLATION) {
            return StoreError::Constraint(db.message().to_string());
        }
    }
    tracing::warn!(operation, error = %error, "Delivery store query failed");
    StoreError::Database(format!("{operation} failed: {error}"))
}

impl StateStore for PostgresStateStore {
    fn insert_all(&self, records: Vec<NewDelivery>) -> StoreFuture<'_, usize> {
        Box::pin(self.insert_batch(records))
    }

    fn find(&self, merchant_order_id: &MerchantOrderId) -> StoreFuture<'_, Option<DeliveryRecord>> {
        let merchant_order_id = merchant_order_id.clone();
        Box::pin(async move { self.select_order(&merchant_order_id, None).await })
    }

    fn find_in_status(
        &self,
        merchant_order_id: &MerchantOrderId,
        status: OrderStatus,
    ) -> StoreFuture<'_, Option<DeliveryRecord>> {
        let merchant_order_id = merchant_order_id.clone();
        Box::pin(async move { self.select_order(&merchant_order_id, Some(status)).await })
    }

    fn update_conditional(&self, record: &DeliveryRecord) -> StoreFuture<'_, u64> {
        let record = record.clone();
        Box::pin(async move {
            let columns = Columns::from(&record);
            let result = sqlx::query(
                "UPDATE delivery
                 SET rider_user_uid = $3,
                     rider_social_uid = $4,
                     status = $5,
                     address_start = $6,
                     address_destination = $7,
                     delivery_accept_time = $8,
                     delivered_time = $9,
                     version = version + 1
                 WHERE uid = $1 AND version = $2",
            )
            .bind(record.id.value())
            .bind(record.version.value())
            .bind(columns.rider_user_uid)
            .bind(columns.rider_social_uid)
            .bind(columns.status)
            .bind(columns.address_start)
            .bind(columns.address_destination)
            .bind(columns.delivery_accept_time)
            .bind(columns.delivered_time)
            .execute(&self.pool)
            .await
            .map_err(|e| map_error("update", e))?;

            Ok(result.rows_affected())
        })
    }

    fn list_by_status(&self, status: OrderStatus) -> StoreFuture<'_, Vec<DeliveryRecord>> {
        Box::pin(async move {
            let sql = format!("SELECT {COLUMNS} FROM delivery WHERE status = $1 ORDER BY uid");
            let rows: Vec<DeliveryRow> = sqlx::query_as(&sql)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_error("select", e))?;
            into_records(rows)
        })
    }

    fn list_delivering_by_rider(&self, rider: RiderIdentity) -> StoreFuture<'_, Vec<DeliveryRecord>> {
        Box::pin(async move {
            let (user, social) = RiderIdentity::split(Some(rider));
            let sql = format!(
                "SELECT {COLUMNS} FROM delivery
                 WHERE status = $1
                   AND rider_user_uid IS NOT DISTINCT FROM $2
                   AND rider_social_uid IS NOT DISTINCT FROM $3
                 ORDER BY uid"
            );
            let rows: Vec<DeliveryRow> = sqlx::query_as(&sql)
                .bind(OrderStatus::OrderDelivering.as_str())
                .bind(user)
                .bind(social)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_error("select", e))?;
            into_records(rows)
        })
    }
}
