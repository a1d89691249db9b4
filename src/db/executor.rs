use crate::db::pool::DuckDbConnectionManager;
use crate::frame::ResultFrame;
use async_trait::async_trait;
use duckdb::types::{TimeUnit, ValueRef};
use r2d2::Pool;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The database rejected the query. Eligible for generator retry.
    Query(String),
    /// The query ran past the configured deadline. Also eligible for retry.
    Timeout(u64),
    Pool(String),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Query(msg) => write!(f, "query execution failed: {}", msg),
            ExecutionError::Timeout(secs) => {
                write!(f, "query timed out after {} seconds", secs)
            }
            ExecutionError::Pool(msg) => write!(f, "database connection error: {}", msg),
        }
    }
}

impl Error for ExecutionError {}

/// The execution seam between the generator loop and the warehouse: take SQL
/// text, return a ResultFrame or a descriptive error. The generator never
/// manages connections, transactions or pooling through this interface.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<ResultFrame, ExecutionError>;
}

/// DuckDB-backed executor. Queries run on the blocking pool with an explicit
/// deadline; rows come back as JSON-typed cells.
pub struct DuckDbExecutor {
    pool: Pool<DuckDbConnectionManager>,
    timeout: Duration,
}

impl DuckDbExecutor {
    pub fn new(pool: Pool<DuckDbConnectionManager>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl QueryExecutor for DuckDbExecutor {
    async fn execute(&self, sql: &str) -> Result<ResultFrame, ExecutionError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let timeout_secs = self.timeout.as_secs();

        let task = tokio::task::spawn_blocking(move || -> Result<ResultFrame, ExecutionError> {
            let conn = pool.get().map_err(|e| ExecutionError::Pool(e.to_string()))?;

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ExecutionError::Query(e.to_string()))?;

            // Column names are known at prepare time; a zero-row result
            // still reports its column list.
            let column_count = stmt.column_count();
            let mut columns = Vec::with_capacity(column_count);
            for i in 0..column_count {
                match stmt.column_name(i) {
                    Ok(name) => columns.push(name.to_string()),
                    Err(_) => columns.push(format!("column_{}", i)),
                }
            }

            let mut frame = ResultFrame::new(columns);
            let mut rows = stmt
                .query([])
                .map_err(|e| ExecutionError::Query(e.to_string()))?;

            while let Some(row) = rows
                .next()
                .map_err(|e| ExecutionError::Query(e.to_string()))?
            {
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    cells.push(cell_value(row, i));
                }
                frame.rows.push(cells);
            }

            debug!("Query returned {} rows", frame.row_count());
            Ok(frame)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(ExecutionError::Timeout(timeout_secs)),
            Ok(Err(join_err)) => Err(ExecutionError::Query(join_err.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

/// Convert one DuckDB cell to a JSON value, preserving numeric typing where
/// the driver exposes it. Exotic types fall back to their text rendition.
fn cell_value(row: &duckdb::Row<'_>, index: usize) -> Value {
    let value_ref = match row.get_ref(index) {
        Ok(value_ref) => value_ref,
        Err(_) => return Value::Null,
    };

    match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(v) => Value::from(v as i64),
        ValueRef::SmallInt(v) => Value::from(v as i64),
        ValueRef::Int(v) => Value::from(v as i64),
        ValueRef::BigInt(v) => Value::from(v),
        ValueRef::HugeInt(v) => Value::String(v.to_string()),
        ValueRef::UTinyInt(v) => Value::from(v as u64),
        ValueRef::USmallInt(v) => Value::from(v as u64),
        ValueRef::UInt(v) => Value::from(v as u64),
        ValueRef::UBigInt(v) => Value::from(v),
        ValueRef::Float(v) => float_value(v as f64),
        ValueRef::Double(v) => float_value(v),
        ValueRef::Decimal(v) => Value::String(v.to_string()),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Date32(days) => date_value(days),
        ValueRef::Timestamp(unit, v) => timestamp_value(unit, v),
        _ => row
            .get::<_, String>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn date_value(days_since_epoch: i32) -> Value {
    chrono::DateTime::from_timestamp(days_since_epoch as i64 * 86_400, 0)
        .map(|dt| Value::String(dt.date_naive().to_string()))
        .unwrap_or(Value::Null)
}

fn timestamp_value(unit: TimeUnit, v: i64) -> Value {
    let micros = match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    };
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| Value::String(dt.naive_utc().to_string()))
        .unwrap_or(Value::Null)
}
