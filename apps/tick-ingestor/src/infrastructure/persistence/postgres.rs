//! PostgreSQL Tick Store
//!
//! Upserts canonical rows into the shared daily table. One call is one
//! transaction; large batches are split into several multi-row statements
//! that commit together.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::application::ports::{TickStore, WriteError};
use crate::domain::row::{COLUMNS, CanonicalRow, KEY_COLUMNS, dedupe_last_wins, update_columns};

/// PostgreSQL bind parameter limit per statement.
const MAX_BIND_PARAMETERS: usize = 65_535;

/// Rows per `INSERT` statement.
pub const MAX_ROWS_PER_STATEMENT: usize = MAX_BIND_PARAMETERS / COLUMNS.len();

/// Daily table adapter.
#[derive(Debug, Clone)]
pub struct PostgresTickStore {
    pool: PgPool,
    schema: String,
    table: String,
    insert_prefix: String,
    conflict_clause: String,
}

impl PostgresTickStore {
    /// Create a store writing to `schema.table`.
    ///
    /// Identifiers are interpolated into SQL and must already be validated.
    #[must_use]
    pub fn new(pool: PgPool, schema: impl Into<String>, table: impl Into<String>) -> Self {
        let schema = schema.into();
        let table = table.into();
        let insert_prefix = insert_prefix(&schema, &table);
        Self {
            pool,
            schema,
            table,
            insert_prefix,
            conflict_clause: conflict_clause(),
        }
    }

    /// Create the schema, the daily table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), WriteError> {
        for statement in schema_statements(&self.schema, &self.table) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }
        info!(schema = %self.schema, table = %self.table, "Daily table ready");
        Ok(())
    }
}

#[async_trait]
impl TickStore for PostgresTickStore {
    async fn write_batch(&self, rows: &[CanonicalRow]) -> Result<usize, WriteError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // A statement may not update the same row twice.
        let rows = dedupe_last_wins(rows);
        let mut tx = self.pool.begin().await.map_err(classify)?;
        let mut written = 0_u64;

        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(&self.insert_prefix);
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.instrument_token)
                    .push_bind(&row.tradingsymbol)
                    .push_bind(&row.tablename)
                    .push_bind(&row.dbname)
                    .push_bind(row.timestamp)
                    .push_bind(row.price)
                    .push_bind(row.qty)
                    .push_bind(row.avg_price)
                    .push_bind(row.volume)
                    .push_bind(row.b_qty)
                    .push_bind(row.s_qty)
                    .push_bind(row.open)
                    .push_bind(row.high)
                    .push_bind(row.low)
                    .push_bind(row.close)
                    .push_bind(row.changeper)
                    .push_bind(row.last_trade_time)
                    .push_bind(row.oi)
                    .push_bind(row.oi_high)
                    .push_bind(row.oi_low);
                for level in row.buy_depth.iter().chain(row.sell_depth.iter()) {
                    b.push_bind(level.quantity)
                        .push_bind(level.price)
                        .push_bind(level.orders);
                }
            });
            builder.push(&self.conflict_clause);

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            written += result.rows_affected();
        }

        tx.commit().await.map_err(classify)?;
        debug!(rows = rows.len(), written, "Batch committed");
        Ok(usize::try_from(written).unwrap_or(usize::MAX))
    }
}

// =============================================================================
// SQL
// =============================================================================

/// Identifiers are emitted unquoted and lowercase, the form PostgreSQL
/// folds them to. Other jobs on the daily table name its columns unquoted
/// (`avgPrice` is `avgprice`), so `"avgPrice"` would be a different column.
fn folded(identifier: &str) -> String {
    identifier.to_ascii_lowercase()
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", folded(schema), folded(table))
}

fn folded_list<'a>(identifiers: impl IntoIterator<Item = &'a str>) -> String {
    identifiers
        .into_iter()
        .map(folded)
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_prefix(schema: &str, table: &str) -> String {
    format!(
        "INSERT INTO {} ({}) ",
        qualified(schema, table),
        folded_list(COLUMNS)
    )
}

fn conflict_clause() -> String {
    let assignments: Vec<String> = update_columns()
        .map(|c| format!("{0} = EXCLUDED.{0}", folded(c)))
        .collect();
    format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        folded_list(KEY_COLUMNS),
        assignments.join(", ")
    )
}

/// SQL type of a persisted column.
fn column_type(column: &str) -> &'static str {
    match column {
        "instrument_token" => "BIGINT NOT NULL",
        "timestamp" => "TIMESTAMP NOT NULL",
        "tradingsymbol" | "tablename" | "dbname" => "TEXT NOT NULL",
        "lastTradeTime" => "TIMESTAMP",
        "changeper" => "NUMERIC(60, 10)",
        "price" | "avgPrice" | "open" | "high" | "low" | "close" => "NUMERIC",
        c if c.len() == 3 && c.as_bytes()[1] == b'p' => "NUMERIC",
        _ => "BIGINT",
    }
}

/// Lookup indexes, named as the table's other writers create them so
/// `IF NOT EXISTS` matches an existing table's indexes.
const INDEXES: [(&str, &str); 4] = [
    ("tablenameindex", "tablename"),
    ("symbolindex", "tradingsymbol"),
    ("instrument_token_index", "instrument_token"),
    ("timestamp_index", "timestamp"),
];

fn schema_statements(schema: &str, table: &str) -> Vec<String> {
    let target = qualified(schema, table);
    let columns: Vec<String> = COLUMNS
        .iter()
        .map(|c| format!("{} {}", folded(c), column_type(c)))
        .collect();

    let mut statements = vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", folded(schema)),
        format!(
            "CREATE TABLE IF NOT EXISTS {target} ({}, UNIQUE ({}))",
            columns.join(", "),
            folded_list(KEY_COLUMNS)
        ),
    ];
    statements.extend(INDEXES.iter().map(|(name, column)| {
        format!("CREATE INDEX IF NOT EXISTS {name} ON {target} ({column})")
    }));
    statements
}

/// Map a driver error onto the store taxonomy.
fn classify(error: sqlx::Error) -> WriteError {
    let message = error.to_string();
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => WriteError::Connection { message },
        // Class 22 (data exception) and 23 (integrity violation).
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| code.starts_with("22") || code.starts_with("23")) =>
        {
            WriteError::Rejected { message }
        }
        _ => WriteError::Query { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_stays_under_bind_limit() {
        assert_eq!(MAX_ROWS_PER_STATEMENT, 1310);
        assert!(MAX_ROWS_PER_STATEMENT * COLUMNS.len() <= MAX_BIND_PARAMETERS);
    }

    #[test]
    fn insert_lists_every_column_folded() {
        let sql = insert_prefix("equity_db", "daily_table");
        assert!(sql.starts_with("INSERT INTO equity_db.daily_table (instrument_token, "));
        assert!(sql.contains(", avgprice, volume, bqty, sqty, "));
        assert!(sql.contains(", lasttradetime, oi, oihigh, oilow, "));
        assert!(sql.ends_with("so4) "));
        assert!(!sql.contains('"'));
        assert!(!sql.contains("avgPrice"));
    }

    #[test]
    fn conflict_overwrites_all_non_key_columns() {
        let sql = conflict_clause();
        assert!(sql.starts_with(" ON CONFLICT (instrument_token, timestamp) DO UPDATE SET "));
        assert_eq!(sql.matches("EXCLUDED.").count(), COLUMNS.len() - 2);
        assert!(sql.contains("avgprice = EXCLUDED.avgprice"));
        assert!(sql.contains("oilow = EXCLUDED.oilow"));
        assert!(!sql.contains("timestamp = EXCLUDED"));
        assert!(!sql.contains('"'));
    }

    #[test]
    fn column_types() {
        assert_eq!(column_type("bp0"), "NUMERIC");
        assert_eq!(column_type("sp4"), "NUMERIC");
        assert_eq!(column_type("bq2"), "BIGINT");
        assert_eq!(column_type("so1"), "BIGINT");
        assert_eq!(column_type("changeper"), "NUMERIC(60, 10)");
        assert_eq!(column_type("oiHigh"), "BIGINT");
    }

    #[test]
    fn schema_uses_folded_names_shared_with_other_jobs() {
        let statements = schema_statements("equity_db", "daily_table");
        assert_eq!(statements.len(), 6);
        assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS equity_db");

        let table = &statements[1];
        assert!(table.starts_with("CREATE TABLE IF NOT EXISTS equity_db.daily_table ("));
        for column in ["avgprice", "bqty", "sqty", "lasttradetime", "oihigh", "oilow"] {
            assert!(table.contains(&format!(" {column} ")), "{column} missing");
        }
        assert!(table.contains("UNIQUE (instrument_token, timestamp)"));
        assert!(statements.iter().all(|s| !s.contains('"')));

        assert_eq!(
            statements[2],
            "CREATE INDEX IF NOT EXISTS tablenameindex ON equity_db.daily_table (tablename)"
        );
        assert!(statements[3].ends_with("(tradingsymbol)"));
    }

    #[test]
    fn driver_errors_classified() {
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), WriteError::Connection { .. }));
        assert!(matches!(
            classify(sqlx::Error::RowNotFound),
            WriteError::Query { .. }
        ));
    }
}
