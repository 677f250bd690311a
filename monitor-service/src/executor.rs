//! SQL execution against monitored servers.
//!
//! The collectors only see the [`SqlExecutor`] trait: run parameterized SQL
//! against a target with a timeout, get rows back or a classified error.
//! [`TdsExecutor`] is the production implementation over `tiberius`; every
//! call opens its own connection so concurrent collectors never share one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tiberius::{error::Error as TdsError, Client, ColumnData, Config, Query, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use common::errors::AppError;
use common::models::Target;

/// Classified query failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    /// The server cannot be reached or refused the login.
    #[error("cannot reach server: {0}")]
    Connectivity(String),

    /// The feature the query relies on is disabled or not permitted.
    #[error("feature unavailable: {0}")]
    FeatureUnavailable(String),

    /// Timeout, lock timeout or deadlock victim; worth retrying next tick.
    #[error("transient query failure: {0}")]
    Transient(String),

    /// The connection string could not be turned into a driver config.
    #[error("invalid connection configuration: {0}")]
    Configuration(String),

    /// Any other query failure.
    #[error("query failed: {0}")]
    Query(String),
}

/// Result alias for executor calls.
pub type ExecResult<T> = Result<T, ExecError>;

impl From<ExecError> for AppError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Connectivity(msg) => AppError::DatabaseConnection(msg),
            ExecError::Configuration(msg) => AppError::InvalidConnectionString(msg),
            other => AppError::DatabaseQuery(other.to_string()),
        }
    }
}

/// Positional query parameter, bound as `@P1`, `@P2`, ...
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
}

/// One result row with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl SqlRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Builds a row from `(column, value)` pairs.
    #[cfg(test)]
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self::new(columns.into(), values)
    }

    /// Raw value of a column, matched case-insensitively.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    /// Column as `f64`; NULL, missing or non-numeric read as `0.0`.
    pub fn f64(&self, column: &str) -> f64 {
        match self.get(column) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            Some(Value::Bool(b)) => f64::from(u8::from(*b)),
            _ => 0.0,
        }
    }

    /// Column as `i64`; NULL, missing or non-numeric read as `0`.
    pub fn i64(&self, column: &str) -> i64 {
        match self.get(column) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            Some(Value::Bool(b)) => i64::from(*b),
            _ => 0,
        }
    }

    /// Column as text; NULL or missing read as `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Column as a flag; non-zero numbers are `true`.
    pub fn flag(&self, column: &str) -> bool {
        match self.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(_)) => self.i64(column) != 0,
            _ => false,
        }
    }

    /// Whether the column is missing or NULL.
    pub fn is_null(&self, column: &str) -> bool {
        matches!(self.get(column), None | Some(Value::Null))
    }
}

/// Capability to run diagnostic SQL against a monitored server.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs `sql` with positional `params`, failing with
    /// `ExecError::Transient` if execution does not finish within `timeout`.
    async fn query(
        &self,
        target: &Target,
        sql: &str,
        params: &[SqlParam],
        timeout: Duration,
    ) -> ExecResult<Vec<SqlRow>>;
}

type TdsClient = Client<Compat<TcpStream>>;

/// `SqlExecutor` speaking TDS to SQL Server through `tiberius`.
pub struct TdsExecutor {
    connect_timeout: Duration,
}

impl TdsExecutor {
    /// Application name reported to the server (visible in `sys.dm_exec_sessions`).
    const APPLICATION_NAME: &'static str = "sql-monitor";

    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, target: &Target) -> ExecResult<TdsClient> {
        let mut config = Config::from_ado_string(target.connection_string())
            .map_err(|e| ExecError::Configuration(e.to_string()))?;
        config.application_name(Self::APPLICATION_NAME);

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect_named(&config))
            .await
            .map_err(|_| {
                ExecError::Connectivity(format!(
                    "connect timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(classify)?;
        tcp.set_nodelay(true)
            .map_err(|e| ExecError::Connectivity(e.to_string()))?;

        tokio::time::timeout(self.connect_timeout, Client::connect(config, tcp.compat_write()))
            .await
            .map_err(|_| ExecError::Connectivity("login timed out".into()))?
            .map_err(classify)
    }

    async fn run(client: &mut TdsClient, sql: &str, params: &[SqlParam]) -> ExecResult<Vec<SqlRow>> {
        let mut query = Query::new(sql);
        for param in params {
            match param {
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Float(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
            }
        }

        let rows = query
            .query(client)
            .await
            .map_err(classify)?
            .into_first_result()
            .await
            .map_err(classify)?;

        Ok(rows.into_iter().map(convert_row).collect())
    }
}

#[async_trait]
impl SqlExecutor for TdsExecutor {
    async fn query(
        &self,
        target: &Target,
        sql: &str,
        params: &[SqlParam],
        timeout: Duration,
    ) -> ExecResult<Vec<SqlRow>> {
        // Connecting is bounded by the connect timeout and fails as
        // Connectivity; `timeout` covers execution only.
        let mut client = self.connect(target).await?;
        within(timeout, Self::run(&mut client, sql, params)).await
    }
}

/// Bounds query execution, reporting an overrun as `Transient`.
async fn within<T>(
    timeout: Duration,
    execution: impl std::future::Future<Output = ExecResult<T>>,
) -> ExecResult<T> {
    tokio::time::timeout(timeout, execution)
        .await
        .unwrap_or_else(|_| {
            Err(ExecError::Transient(format!(
                "query timed out after {}ms",
                timeout.as_millis()
            )))
        })
}

fn convert_row(row: tiberius::Row) -> SqlRow {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = row.into_iter().map(column_value).collect();
    SqlRow::new(columns.into(), values)
}

fn column_value(data: ColumnData<'static>) -> Value {
    fn opt<T: Into<Value>>(v: Option<T>) -> Value {
        v.map(Into::into).unwrap_or(Value::Null)
    }

    match data {
        ColumnData::U8(v) => opt(v),
        ColumnData::I16(v) => opt(v),
        ColumnData::I32(v) => opt(v),
        ColumnData::I64(v) => opt(v),
        ColumnData::F32(v) => opt(v),
        ColumnData::F64(v) => opt(v),
        ColumnData::Bit(v) => opt(v),
        ColumnData::String(v) => opt(v.map(|s| s.into_owned())),
        ColumnData::Numeric(v) => opt(v.map(|n| {
            n.value() as f64 / 10f64.powi(i32::from(n.scale()))
        })),
        // Date and binary columns are never selected raw; diagnostics
        // compute ages with DATEDIFF on the server.
        _ => Value::Null,
    }
}

/// Maps a driver error onto the executor taxonomy.
fn classify(e: TdsError) -> ExecError {
    match &e {
        TdsError::Io { .. } | TdsError::Tls(_) | TdsError::Routing { .. } => {
            ExecError::Connectivity(e.to_string())
        }
        TdsError::Server(token) => classify_server_error(token.code(), e.to_string()),
        _ => ExecError::Query(e.to_string()),
    }
}

/// Classifies a SQL Server error number.
pub(crate) fn classify_server_error(code: u32, message: String) -> ExecError {
    match code {
        // Login failed, database unavailable, server paused / not currently available
        18456 | 18452 | 4060 | 40613 | 17142 => ExecError::Connectivity(message),
        // Deadlock victim, lock request timeout, query cancelled on timeout
        1205 | 1222 | 3617 => ExecError::Transient(message),
        // Permission denied (VIEW SERVER STATE), invalid object name
        229 | 297 | 300 | 208 => ExecError::FeatureUnavailable(message),
        _ => ExecError::Query(message),
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_row_getters_are_lenient() {
        let row = SqlRow::from_pairs([
            ("Count", json!(42)),
            ("ratio", json!(0.5)),
            ("name", json!("tempdb")),
            ("missing_value", Value::Null),
            ("as_text", json!("17")),
        ]);
        assert_eq!(row.i64("count"), 42);
        assert_eq!(row.f64("RATIO"), 0.5);
        assert_eq!(row.i64("ratio"), 0);
        assert_eq!(row.text("name").as_deref(), Some("tempdb"));
        assert_eq!(row.text("missing_value"), None);
        assert_eq!(row.f64("missing_value"), 0.0);
        assert_eq!(row.i64("as_text"), 17);
        assert_eq!(row.f64("no_such_column"), 0.0);
        assert!(row.is_null("no_such_column"));
        assert!(row.flag("count"));
    }

    #[test]
    fn test_server_error_classification() {
        assert!(matches!(
            classify_server_error(18456, "login failed".into()),
            ExecError::Connectivity(_)
        ));
        assert!(matches!(
            classify_server_error(1205, "deadlock victim".into()),
            ExecError::Transient(_)
        ));
        assert!(matches!(
            classify_server_error(300, "VIEW SERVER STATE denied".into()),
            ExecError::FeatureUnavailable(_)
        ));
        assert!(matches!(
            classify_server_error(102, "syntax".into()),
            ExecError::Query(_)
        ));
    }

    #[test]
    fn test_exec_error_maps_to_app_error() {
        assert!(matches!(
            AppError::from(ExecError::Connectivity("x".into())),
            AppError::DatabaseConnection(_)
        ));
        assert!(matches!(
            AppError::from(ExecError::Configuration("x".into())),
            AppError::InvalidConnectionString(_)
        ));
        assert!(matches!(
            AppError::from(ExecError::Transient("x".into())),
            AppError::DatabaseQuery(_)
        ));
    }

    #[tokio::test]
    async fn test_slow_login_is_a_connectivity_failure() {
        // A listener that accepts but never answers the login handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let exec = TdsExecutor::new(Duration::from_millis(300));
        let target = Target::parse(&format!(
            "Server=tcp:127.0.0.1,{};User Id=sa;Password=x;TrustServerCertificate=true",
            port
        ))
        .unwrap();
        // The query budget is far shorter than the login wait.
        let result = exec
            .query(&target, "SELECT 1", &[], Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ExecError::Connectivity(_))), "{:?}", result);
        hold.abort();
    }

    #[tokio::test]
    async fn test_execution_overrun_is_transient() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ExecError>(1)
        };
        let result = within(Duration::from_millis(20), slow).await;
        assert!(matches!(result, Err(ExecError::Transient(_))));
        assert_eq!(within(Duration::from_secs(1), async { Ok(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_scripted_executor_times_out_slow_queries() {
        let exec = testing::ScriptedExecutor::new()
            .on("SELECT 1", testing::row(vec![("v", json!(1))]))
            .with_delay(Duration::from_millis(200));
        let target = Target::parse("Server=h").unwrap();
        let result = exec
            .query(&target, "SELECT 1", &[], Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ExecError::Transient(_))));
    }
}
