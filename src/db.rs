//! Database access layer for InfluxDB 1.x over its HTTP query API

use crate::config::ConnectionConfig;
use crate::error::{AppError, Result};
use crate::query::{self, Query, QueryKind, SEPARATOR};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for the connection handshake
const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Records returned by a read; two-tag records are joined by [`SEPARATOR`]
pub type RowSet = Vec<String>;

/// Raw access to a time-series store.
///
/// Implementations run statements as given. Dry-run handling lives in
/// [`Database`], so an executor never has to know about it.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a read statement and return its records
    async fn read(&self, query: &Query) -> Result<RowSet>;

    /// Run a statement that modifies the store
    async fn write(&self, query: &Query) -> Result<()>;

    /// Release the connection
    async fn close(&self) {}
}

/// Opens [`Database`] handles for configured connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectionConfig, dry_run: bool) -> Result<Database>;
}

/// Connects over HTTP with [`InfluxHttp`]
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, target: &ConnectionConfig, dry_run: bool) -> Result<Database> {
        Database::connect(target, dry_run).await
    }
}

/// An open connection plus the run mode it was opened in
#[derive(Clone)]
pub struct Database {
    executor: Arc<dyn QueryExecutor>,
    address: String,
    dry_run: bool,
}

impl Database {
    /// Connect to the store described by `target` and check it answers a ping
    pub async fn connect(target: &ConnectionConfig, dry_run: bool) -> Result<Self> {
        let client = InfluxHttp::new(target)?;
        let version = client.ping().await?;
        debug!(url = %target.url, version = %version, "Connected");

        Ok(Self::with_executor(
            Arc::new(client),
            target.url.as_str(),
            dry_run,
        ))
    }

    /// Wrap an already open executor
    pub fn with_executor(
        executor: Arc<dyn QueryExecutor>,
        address: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            executor,
            address: address.into(),
            dry_run,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Names of every database on the server
    pub async fn show_databases(&self) -> Result<Vec<String>> {
        self.fetch_series(&query::list_databases()).await
    }

    /// Run a read statement
    pub async fn fetch_series(&self, query: &Query) -> Result<RowSet> {
        debug!(query = %query, "querying");
        let rows = self.executor.read(query).await.inspect_err(|e| {
            debug!(query = %query, error = %e, "Query failed");
        })?;
        debug!(rows = rows.len(), "Query returned");
        Ok(rows)
    }

    /// Run a drop statement, or only log it in dry-run mode
    pub async fn drop_series(&self, query: &Query) -> Result<()> {
        if !query.is_write() {
            return Err(AppError::InternalError(format!(
                "Refusing to run read statement as a drop: {}",
                query
            )));
        }
        debug!(query = %query, "dropping");
        if self.dry_run {
            info!(query = %query, "Dry run mode on, drop skipped");
            return Ok(());
        }
        self.executor.write(query).await.inspect_err(|e| {
            debug!(query = %query, error = %e, "Drop failed");
        })
    }

    /// Close the connection
    pub async fn close(self) {
        self.executor.close().await;
        debug!(url = %self.address, "Connection closed");
    }
}

/// InfluxDB 1.x client speaking the `/query` and `/ping` HTTP endpoints
pub struct InfluxHttp {
    client: reqwest::Client,
    base: Url,
    user: Option<String>,
    password: Option<String>,
}

impl InfluxHttp {
    pub fn new(target: &ConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(target.insecure_skip_verify)
            .connect_timeout(PING_TIMEOUT)
            .timeout(target.timeout)
            .build()
            .map_err(|e| AppError::ConnectionError(format!("Failed to build HTTP client: {}", e)))?;

        let mut base = target.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            base,
            user: target.user.clone(),
            password: target.password.clone(),
        })
    }

    /// Ping the server and return the version it reports
    pub async fn ping(&self) -> Result<String> {
        let response = self
            .request(Method::GET, "ping")?
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::ConnectionError(format!("Ping to {} failed: {}", self.base, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::ConnectionError(format!(
                "Credentials rejected by {}",
                self.base
            )));
        }
        if !status.is_success() {
            return Err(AppError::ConnectionError(format!(
                "Ping to {} returned {}",
                self.base, status
            )));
        }

        Ok(response
            .headers()
            .get("X-Influxdb-Version")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string())
    }

    fn request(&self, method: Method, endpoint: &str) -> Result<reqwest::RequestBuilder> {
        let url = self
            .base
            .join(endpoint)
            .map_err(|e| AppError::ConnectionError(format!("Invalid endpoint URL: {}", e)))?;

        let builder = self.client.request(method, url);
        Ok(match &self.user {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        })
    }

    async fn send(&self, method: Method, query: &Query) -> Result<String> {
        let mut params = vec![("q", query.text())];
        if let Some(db) = query.database() {
            params.push(("db", db));
        }
        if let Some(rp) = query.retention_policy() {
            params.push(("rp", rp));
        }

        let response = self
            .request(method, "query")?
            .query(&params)
            .send()
            .await
            .map_err(|e| AppError::QueryError(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::QueryError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<QueryResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| body.trim().to_string());
            return Err(AppError::QueryError(format!("{} ({})", detail, status)));
        }
        Ok(body)
    }
}

#[async_trait]
impl QueryExecutor for InfluxHttp {
    async fn read(&self, query: &Query) -> Result<RowSet> {
        let body = self.send(Method::GET, query).await?;
        parse_rows(query.kind(), &body)
    }

    async fn write(&self, query: &Query) -> Result<()> {
        let body = self.send(Method::POST, query).await?;
        parse_rows(query.kind(), &body).map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
    /// Set when the server's row limit cut the result short
    #[serde(default)]
    partial: bool,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
    #[serde(default)]
    partial: bool,
}

/// Turn a `/query` response body into records for a statement of `kind`
fn parse_rows(kind: QueryKind, body: &str) -> Result<RowSet> {
    let response: QueryResponse = serde_json::from_str(body)?;
    if let Some(err) = response.error {
        return Err(AppError::QueryError(err));
    }
    if let Some(err) = response.results.iter().find_map(|r| r.error.clone()) {
        return Err(AppError::QueryError(err));
    }
    // A truncated read would make live series look stale
    let truncated = response
        .results
        .iter()
        .any(|r| r.partial || r.series.iter().any(|s| s.partial));
    if truncated {
        return Err(AppError::QueryError(
            "Result truncated by the server row limit (partial response)".into(),
        ));
    }

    let series = response.results.into_iter().flat_map(|r| r.series);
    let rows = match kind {
        QueryKind::ShowDatabases | QueryKind::ShowTagValues => {
            series.flat_map(|s| show_values(&s)).collect()
        }
        QueryKind::SelectOneTag => series.flat_map(|s| select_records(&s, 1)).collect(),
        QueryKind::SelectTwoTags => series.flat_map(|s| select_records(&s, 2)).collect(),
        QueryKind::DropSeries => Vec::new(),
    };
    Ok(rows)
}

/// The `name` (databases) or `value` (tag values) column of a SHOW result
fn show_values(series: &Series) -> Vec<String> {
    let Some(index) = series
        .columns
        .iter()
        .position(|c| c == "value" || c == "name")
    else {
        return Vec::new();
    };

    series
        .values
        .iter()
        .filter_map(|row| row.get(index).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Non-time string columns of each row, joined into one record.
///
/// Rows without exactly `arity` tag values, or with a value containing the
/// separator, cannot be matched back to a series and are skipped.
fn select_records(series: &Series, arity: usize) -> Vec<String> {
    let mut records = Vec::with_capacity(series.values.len());

    for row in &series.values {
        let values: Vec<&str> = series
            .columns
            .iter()
            .zip(row)
            .filter(|(column, _)| column.as_str() != "time")
            .filter_map(|(_, value)| value.as_str())
            .collect();

        if values.len() != arity || values.iter().any(|v| v.is_empty()) {
            debug!(row = ?row, "Skipping row without a complete tag set");
            continue;
        }
        if arity > 1 && values.iter().any(|v| v.contains(SEPARATOR)) {
            warn!(row = ?row, separator = %SEPARATOR, "Skipping tag values containing the separator");
            continue;
        }

        let mut record = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                record.push(SEPARATOR);
            }
            record.push_str(value);
        }
        records.push(record);
    }

    records
}
