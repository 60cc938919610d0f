use crate::Warehouse;
use crate::sql::{LoadStatement, count_sql, truncate_sql};
use crate::table::{TableLocation, WeatherTable};
use async_trait::async_trait;
use common::config::SnowflakeConfig;
use common::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const STATEMENTS_PATH: &str = "api/v2/statements";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    statement_handle: Option<String>,
    message: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

/// Rows returned by a finished statement, all values as strings.
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl StatementResult {
    fn from_response(response: StatementResponse) -> Self {
        Self {
            columns: response
                .result_set_meta_data
                .map(|meta| meta.row_type.into_iter().map(|c| c.name).collect())
                .unwrap_or_default(),
            rows: response.data,
        }
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Sum of the `rows_loaded` column of a `COPY INTO` result. A copy that
    /// skipped every file reports a single status column and loads nothing.
    pub fn rows_loaded(&self) -> Result<u64> {
        let Some(index) = self.column_index("rows_loaded") else {
            return Ok(0);
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(index).cloned().flatten())
            .map(|value| parse_count(&value))
            .sum()
    }

    /// First cell of the first row, as returned by `COUNT(*)`.
    pub fn scalar_count(&self) -> Result<u64> {
        let value = self
            .rows
            .first()
            .and_then(|row| row.first().cloned().flatten())
            .ok_or_else(|| Error::Warehouse("Count query returned no rows".into()))?;
        parse_count(&value)
    }
}

fn parse_count(value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| Error::Warehouse(format!("Invalid row count '{}': {}", value, e)))
}

/// Snowflake over the SQL REST API.
pub struct SnowflakeWarehouse {
    client: Client,
    base_url: Url,
    config: SnowflakeConfig,
    location: TableLocation,
}

impl SnowflakeWarehouse {
    pub fn new(config: &SnowflakeConfig, location: TableLocation) -> Result<Self> {
        let base_url = Url::parse(&format!(
            "https://{}.snowflakecomputing.com/",
            config.account
        ))?;
        Self::with_base_url(config, location, base_url)
    }

    /// Points the client at a different API root.
    pub fn with_base_url(
        config: &SnowflakeConfig,
        location: TableLocation,
        base_url: Url,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            config: config.clone(),
            location,
        })
    }

    fn statements_url(&self) -> Result<Url> {
        Ok(self.base_url.join(STATEMENTS_PATH)?)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header("X-Snowflake-Authorization-Token-Type", &self.config.token_type)
            .header("Accept", "application/json")
    }

    /// Submits a statement and waits for it to finish.
    pub async fn execute(&self, sql: &str) -> Result<StatementResult> {
        let body = json!({
            "statement": sql,
            "timeout": self.config.timeout_secs,
            "database": self.location.database,
            "schema": self.location.schema,
            "warehouse": self.config.warehouse,
            "role": self.config.role,
        });
        debug!(%sql, "Submitting statement");

        let response = self
            .authorized(self.client.post(self.statements_url()?))
            .json(&body)
            .send()
            .await?;

        let wait = Duration::from_secs(self.config.timeout_secs);
        tokio::time::timeout(wait, self.finish(response))
            .await
            .map_err(|_| Error::Warehouse(format!("Statement did not finish within {:?}", wait)))?
    }

    async fn finish(&self, mut response: reqwest::Response) -> Result<StatementResult> {
        loop {
            let status = response.status();
            match status {
                StatusCode::OK => {
                    let body: StatementResponse = response.json().await?;
                    if let Some(message) = &body.message {
                        debug!(%message, "Statement finished");
                    }
                    return Ok(StatementResult::from_response(body));
                }
                StatusCode::ACCEPTED => {
                    let body: StatementResponse = response.json().await?;
                    let handle = body.statement_handle.ok_or_else(|| {
                        Error::Warehouse("Running statement returned no handle".into())
                    })?;
                    debug!(%handle, "Statement still running");
                    tokio::time::sleep(POLL_INTERVAL).await;

                    let url = self.statements_url()?.join(&format!("statements/{}", handle))?;
                    response = self.authorized(self.client.get(url)).send().await?;
                }
                _ => {
                    let text = response.text().await.unwrap_or_default();
                    warn!(%status, body = %text, "Statement failed");
                    return Err(Error::Warehouse(format!(
                        "Statement failed with status {}: {}",
                        status, text
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn truncate(&self, table: WeatherTable) -> Result<()> {
        self.execute(&truncate_sql(&self.location, table)).await?;
        info!(%table, "Truncated table");
        Ok(())
    }

    async fn load(&self, statement: &LoadStatement) -> Result<u64> {
        let result = self.execute(&statement.sql).await?;
        let rows = result.rows_loaded()?;
        info!(table = %statement.table, file = %statement.staged_file, rows, "Loaded staged file");
        Ok(rows)
    }

    async fn count_rows(&self, table: WeatherTable) -> Result<u64> {
        let result = self
            .execute(&count_sql(&self.location.qualified(table)))
            .await?;
        result.scalar_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        statements: Arc<Mutex<Vec<String>>>,
        auth: Arc<Mutex<Vec<String>>>,
    }

    async fn submit(
        State(recorded): State<Recorded>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let sql = body["statement"].as_str().unwrap_or_default().to_string();
        recorded.statements.lock().unwrap().push(sql.clone());
        if let Some(auth) = headers.get("authorization") {
            recorded
                .auth
                .lock()
                .unwrap()
                .push(auth.to_str().unwrap().to_string());
        }

        if sql.starts_with("COPY INTO") {
            (
                axum::http::StatusCode::ACCEPTED,
                Json(json!({"statementHandle": "copy-1", "message": "Asynchronous execution in progress."})),
            )
        } else if sql.starts_with("SELECT COUNT") {
            (
                axum::http::StatusCode::OK,
                Json(json!({
                    "resultSetMetaData": {"rowType": [{"name": "RECORD_COUNT"}]},
                    "data": [["366"]]
                })),
            )
        } else if sql.contains("broken") {
            (
                axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"message": "SQL compilation error"})),
            )
        } else {
            (
                axum::http::StatusCode::OK,
                Json(json!({
                    "resultSetMetaData": {"rowType": [{"name": "status"}]},
                    "data": [["Statement executed successfully."]]
                })),
            )
        }
    }

    async fn status(Path(handle): Path<String>) -> Json<Value> {
        assert_eq!(handle, "copy-1");
        Json(json!({
            "resultSetMetaData": {"rowType": [
                {"name": "file"}, {"name": "status"}, {"name": "rows_parsed"}, {"name": "rows_loaded"}
            ]},
            "data": [["s3://weather-batch-data/processed_data/weather_data_A.parquet", "LOADED", "366", "366"]]
        }))
    }

    async fn spawn(recorded: Recorded) -> Url {
        let app = Router::new()
            .route("/api/v2/statements", post(submit))
            .route("/api/v2/statements/{handle}", get(status))
            .with_state(recorded);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    fn config() -> SnowflakeConfig {
        SnowflakeConfig {
            account: "xy12345".into(),
            token: "secret-jwt".into(),
            token_type: "KEYPAIR_JWT".into(),
            warehouse: Some("compute_wh".into()),
            role: None,
            timeout_secs: 10,
        }
    }

    async fn warehouse(recorded: Recorded) -> SnowflakeWarehouse {
        let base = spawn(recorded).await;
        SnowflakeWarehouse::with_base_url(
            &config(),
            TableLocation::new("weather_db", "weather_schema"),
            base,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn truncate_and_count_use_qualified_names() {
        let recorded = Recorded::default();
        let warehouse = warehouse(recorded.clone()).await;

        warehouse.truncate(WeatherTable::Facts).await.unwrap();
        let count = warehouse.count_rows(WeatherTable::Facts).await.unwrap();

        assert_eq!(count, 366);
        assert_eq!(
            *recorded.statements.lock().unwrap(),
            vec![
                "TRUNCATE TABLE weather_db.weather_schema.weather_table;",
                "SELECT COUNT(*) AS record_count FROM weather_db.weather_schema.weather_table;",
            ]
        );
        assert!(
            recorded
                .auth
                .lock()
                .unwrap()
                .iter()
                .all(|a| a == "Bearer secret-jwt")
        );
    }

    #[tokio::test]
    async fn load_polls_until_copy_finishes() {
        let warehouse = warehouse(Recorded::default()).await;
        let statement = crate::sql::load_statement(
            &TableLocation::new("weather_db", "weather_schema"),
            "aws_s3_stage",
            WeatherTable::Facts,
            "weather_data_A.parquet",
        );

        assert_eq!(warehouse.load(&statement).await.unwrap(), 366);
    }

    #[tokio::test]
    async fn rejected_statement_is_a_warehouse_error() {
        let warehouse = warehouse(Recorded::default()).await;
        let err = warehouse.execute("SELECT broken").await.unwrap_err();
        assert!(matches!(err, Error::Warehouse(_)));
        assert!(err.to_string().contains("SQL compilation error"));
    }

    #[test]
    fn copy_without_files_loads_nothing() {
        let result = StatementResult {
            columns: vec!["status".into()],
            rows: vec![vec![Some("Copy executed with 0 files processed.".into())]],
        };
        assert_eq!(result.rows_loaded().unwrap(), 0);
    }
}
