//! `PostgreSQL` sink.
//!
//! One row per (alert, violation) pair in the alert table and one row per
//! error event in the error table. Both tables carry a unique constraint,
//! and redelivered payloads are dropped by `ON CONFLICT DO NOTHING` rather
//! than failing the insert.
//!
//! Uses runtime query construction (not compile-time checked) so builds do
//! not need a live database. Table names come from validated configuration;
//! every value is bound as a parameter.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};
use watchtower_annotate::{EntityLookup, annotate_alert};
use watchtower_types::{Alert, ErrorEvent};

use crate::config::DatabaseConfig;
use crate::error::SinkError;

/// One alert table row, flattened from an alert and one of its violations.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    /// Alert identity.
    pub fqid: String,
    /// Alert name.
    pub name: String,
    /// Alert time.
    pub query_time: i64,
    /// Alert level.
    pub level: &'static str,
    /// Detection method.
    pub method: String,
    /// Alert query.
    pub query_expression: String,
    /// Alert baseline query.
    pub history_query_expression: String,
    /// Violation time.
    pub time: i64,
    /// Violation series.
    pub expression: String,
    /// Rule that fired.
    pub condition: String,
    /// Observed value.
    pub value: Option<f64>,
    /// Baseline value.
    pub history_value: Option<f64>,
    /// Resolved entity type, if annotated.
    pub meta_type: Option<String>,
    /// Resolved entity code, if annotated.
    pub meta_code: Option<String>,
}

/// Flatten an alert into one row per violation.
pub fn alert_rows(alert: &Alert) -> Vec<AlertRow> {
    alert
        .violations()
        .iter()
        .map(|v| AlertRow {
            fqid: alert.fqid().to_owned(),
            name: alert.name().to_owned(),
            query_time: alert.time(),
            level: alert.level().as_str(),
            method: alert.method().to_owned(),
            query_expression: alert.expression().to_owned(),
            history_query_expression: alert.history_expression().to_owned(),
            time: v.time(),
            expression: v.expression().to_owned(),
            condition: v.condition().to_owned(),
            value: v.value(),
            history_value: v.history_value(),
            meta_type: v.meta().map(|m| m.meta_type.clone()),
            meta_code: v.meta().map(|m| m.meta_code.clone()),
        })
        .collect()
}

/// Statements creating the alert table and its indexes.
pub fn alert_table_ddl(table: &str) -> [String; 3] {
    [
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                fqid TEXT NOT NULL,
                name TEXT NOT NULL,
                query_time BIGINT NOT NULL,
                level TEXT NOT NULL,
                method TEXT NOT NULL,
                query_expression TEXT NOT NULL,
                history_query_expression TEXT NOT NULL,
                time BIGINT,
                expression TEXT,
                condition TEXT,
                value DOUBLE PRECISION,
                history_value DOUBLE PRECISION,
                meta_type TEXT,
                meta_code TEXT,
                UNIQUE (fqid, time, level, expression)
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_type_idx ON {table} (meta_type)"),
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_type_code_idx ON {table} (meta_type, meta_code)"
        ),
    ]
}

/// Statement creating the error table.
pub fn error_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            fqid TEXT NOT NULL,
            name TEXT NOT NULL,
            query_time BIGINT NOT NULL,
            query_expression TEXT NOT NULL,
            history_query_expression TEXT NOT NULL,
            type TEXT NOT NULL,
            message TEXT NOT NULL,
            UNIQUE (fqid, query_time, query_expression, type, message)
        )"
    )
}

/// Persists alerts and error events to `PostgreSQL`.
pub struct DatabaseSink {
    config: DatabaseConfig,
    lookup: Arc<EntityLookup>,
    pool: Option<PgPool>,
    alert_insert: String,
    error_insert: String,
}

impl DatabaseSink {
    /// Create an unconnected sink; [`DatabaseSink::start`] opens the pool.
    pub fn new(config: DatabaseConfig, lookup: Arc<EntityLookup>) -> Self {
        let alert_insert = format!(
            "INSERT INTO {} (fqid, name, query_time, level, method, query_expression,
                history_query_expression, time, expression, condition, value,
                history_value, meta_type, meta_code)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT DO NOTHING",
            config.alert_table()
        );
        let error_insert = format!(
            "INSERT INTO {} (fqid, name, query_time, query_expression,
                history_query_expression, type, message)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT DO NOTHING",
            config.error_table()
        );
        Self {
            config,
            lookup,
            pool: None,
            alert_insert,
            error_insert,
        }
    }

    /// Connect and create both tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Database`] if the connection or DDL fails.
    pub async fn start(&mut self) -> Result<(), SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect(&self.config.url)
            .await?;

        let alert_table = self.config.alert_table();
        let error_table = self.config.error_table();
        for statement in alert_table_ddl(&alert_table) {
            sqlx::query(&statement).execute(&pool).await?;
        }
        sqlx::query(&error_table_ddl(&error_table))
            .execute(&pool)
            .await?;

        info!(
            alert_table = alert_table.as_str(),
            error_table = error_table.as_str(),
            max_connections = self.config.max_connections,
            "database sink connected"
        );
        self.pool = Some(pool);
        Ok(())
    }

    /// Annotate the alert and insert one row per violation in a single
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::NotStarted`] before [`DatabaseSink::start`], or
    /// [`SinkError::Database`] if the insert fails.
    pub async fn handle_alert(&self, alert: &mut Alert) -> Result<(), SinkError> {
        let pool = self.pool.as_ref().ok_or(SinkError::NotStarted("database"))?;
        let annotation = annotate_alert(alert, &self.lookup).await;
        if annotation.failed > 0 {
            warn!(
                alert = alert.name(),
                unresolved = annotation.failed,
                "storing violations without entity metadata"
            );
        }

        let rows = alert_rows(alert);
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        let mut inserted: u64 = 0;
        for row in &rows {
            let result = sqlx::query(&self.alert_insert)
                .bind(&row.fqid)
                .bind(&row.name)
                .bind(row.query_time)
                .bind(row.level)
                .bind(&row.method)
                .bind(&row.query_expression)
                .bind(&row.history_query_expression)
                .bind(row.time)
                .bind(&row.expression)
                .bind(&row.condition)
                .bind(row.value)
                .bind(row.history_value)
                .bind(&row.meta_type)
                .bind(&row.meta_code)
                .execute(&mut *tx)
                .await?;
            inserted = inserted.saturating_add(result.rows_affected());
        }
        tx.commit().await?;

        let total = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        if inserted < total {
            warn!(
                fqid = alert.fqid(),
                time = alert.time(),
                skipped = total.saturating_sub(inserted),
                "alert rows already stored"
            );
        }
        debug!(fqid = alert.fqid(), inserted, "alert rows stored");
        Ok(())
    }

    /// Insert one error row.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::NotStarted`] before [`DatabaseSink::start`], or
    /// [`SinkError::Database`] if the insert fails.
    pub async fn handle_error(&self, event: &ErrorEvent) -> Result<(), SinkError> {
        let pool = self.pool.as_ref().ok_or(SinkError::NotStarted("database"))?;
        let result = sqlx::query(&self.error_insert)
            .bind(&event.fqid)
            .bind(&event.name)
            .bind(event.time)
            .bind(&event.expression)
            .bind(&event.history_expression)
            .bind(&event.error_type)
            .bind(&event.message)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            warn!(fqid = event.fqid.as_str(), time = event.time, "error row already stored");
        }
        Ok(())
    }
}

impl std::fmt::Debug for DatabaseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSink")
            .field("alert_table", &self.config.alert_table())
            .field("error_table", &self.config.error_table())
            .field("connected", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}
