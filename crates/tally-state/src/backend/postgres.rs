//! Postgres snapshot backend.
//!
//! One table, `(id text, mtype text, delta bigint, mvalue double precision)`,
//! fully truncated and repopulated inside a single transaction on every
//! save. A failed save rolls back and leaves the previous snapshot intact.
//!
//! The table is created lazily on first use, at most once per backend
//! instance. Existence is assumed for the rest of the pool's lifetime.
//!
//! Tables created elsewhere with `delta integer` are accepted as they are:
//! loads read `delta::bigint`, so both column widths decode.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection, Row};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::Backend;
use crate::error::{StateError, StateResult};
use crate::types::{Metric, MetricDto};

/// Default schema-qualified table name.
pub const DEFAULT_TABLE: &str = "public.metrics";

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid table pattern")
});

fn db_err(e: sqlx::Error) -> StateError {
    StateError::Database(e.to_string())
}

/// Persists snapshots to a Postgres table.
pub struct PgBackend {
    pool: PgPool,
    table: String,
    table_ready: OnceCell<()>,
}

impl PgBackend {
    /// Build a backend whose pool connects on first use, so an unreachable
    /// database does not prevent startup.
    pub fn connect_lazy(dsn: &str) -> StateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(dsn)
            .map_err(db_err)?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
            table_ready: OnceCell::new(),
        }
    }

    /// Use a different (optionally schema-qualified) table name.
    pub fn with_table(mut self, table: &str) -> StateResult<Self> {
        if !TABLE_NAME.is_match(table) {
            return Err(StateError::Database(format!("invalid table name {table:?}")));
        }
        self.table = table.to_string();
        self.table_ready = OnceCell::new();
        Ok(self)
    }

    /// `CREATE TABLE IF NOT EXISTS`, executed once per backend instance.
    /// A failed attempt is retried on the next call.
    pub async fn create_table(&self) -> StateResult<()> {
        self.table_ready
            .get_or_try_init(|| async {
                let sql = format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id text NOT NULL,
                        mtype text NOT NULL,
                        delta bigint,
                        mvalue double precision
                    )",
                    self.table
                );
                sqlx::query(&sql).execute(&self.pool).await.map_err(db_err)?;
                info!(table = %self.table, "metrics table ready");
                Ok::<(), StateError>(())
            })
            .await?;
        Ok(())
    }

    async fn write_snapshot(&self, conn: &mut PgConnection, snapshot: &[Metric]) -> StateResult<()> {
        let truncate = format!("TRUNCATE TABLE {}", self.table);
        sqlx::query(&truncate).execute(&mut *conn).await.map_err(db_err)?;

        let insert = format!(
            "INSERT INTO {} (id, mtype, delta, mvalue) VALUES ($1, $2, $3, $4)",
            self.table
        );
        for metric in snapshot {
            sqlx::query(&insert)
                .bind(metric.id())
                .bind(metric.kind().as_str())
                .bind(metric.delta())
                .bind(metric.gauge_value())
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn save(&self, snapshot: &[Metric]) -> StateResult<()> {
        self.create_table().await?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if let Err(e) = self.write_snapshot(&mut tx, snapshot).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "snapshot rollback failed");
            }
            return Err(e);
        }
        tx.commit().await.map_err(db_err)?;

        debug!(table = %self.table, metrics = snapshot.len(), "snapshot written");
        Ok(())
    }

    async fn load(&self) -> StateResult<Vec<Metric>> {
        self.create_table().await?;

        let sql = format!("SELECT id, mtype, delta::bigint AS delta, mvalue FROM {}", self.table);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_err)?;

        let metrics = rows
            .iter()
            .map(|row| {
                let dto = MetricDto {
                    id: row.try_get("id").map_err(db_err)?,
                    kind: row.try_get("mtype").map_err(db_err)?,
                    delta: row.try_get("delta").map_err(db_err)?,
                    value: row.try_get("mvalue").map_err(db_err)?,
                };
                dto.into_metric()
            })
            .collect::<StateResult<Vec<_>>>()?;

        debug!(table = %self.table, metrics = metrics.len(), "snapshot read");
        Ok(metrics)
    }

    async fn close(&self) -> StateResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn ping(&self) -> StateResult<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        conn.ping().await.map_err(db_err)
    }
}
