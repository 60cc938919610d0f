use chrono::{NaiveDate, Utc};
use common::config::WeatherApiConfig;
use common::{Error, Result};
use etl::extract::{ArchiveQuery, WeatherApiClient};
use std::collections::HashMap;
use tokio::sync::Mutex;
use url::Url;
use warehouse::{LoadStatements, StagedFiles, WeatherTable};

/// Values derived once at the start of a run and read by later tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct RunVariables {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Fully-formed archive request used by the availability check.
    pub endpoint: Url,
}

impl RunVariables {
    pub fn derive(config: &WeatherApiConfig, logical_date: NaiveDate) -> Result<Self> {
        let query = ArchiveQuery::trailing_year(config.latitude, config.longitude, logical_date)?;
        let endpoint = WeatherApiClient::new(config)?.archive_url(&query);

        Ok(Self {
            latitude: query.latitude,
            longitude: query.longitude,
            start_date: query.start_date,
            end_date: query.end_date,
            endpoint,
        })
    }
}

/// A value one task publishes for its downstream tasks.
pub struct Handoff<T> {
    name: &'static str,
    value: Mutex<Option<T>>,
}

impl<T: Clone> Handoff<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            value: Mutex::new(None),
        }
    }

    pub async fn set(&self, value: T) {
        *self.value.lock().await = Some(value);
    }

    pub async fn get(&self) -> Result<T> {
        self.value
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Workflow(format!("'{}' was not set by an upstream task", self.name)))
    }
}

/// State shared by the tasks of a single DAG run.
pub struct RunContext {
    pub run_id: String,
    pub logical_date: NaiveDate,
    pub variables: Handoff<RunVariables>,
    pub processed_files: Handoff<Vec<String>>,
    pub staged: Handoff<StagedFiles>,
    pub statements: Handoff<LoadStatements>,
    rows_loaded: Mutex<HashMap<WeatherTable, u64>>,
    record_counts: Mutex<HashMap<WeatherTable, u64>>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, logical_date: NaiveDate) -> Self {
        Self {
            run_id: run_id.into(),
            logical_date,
            variables: Handoff::new("run variables"),
            processed_files: Handoff::new("processed files"),
            staged: Handoff::new("staged files"),
            statements: Handoff::new("load statements"),
            rows_loaded: Mutex::new(HashMap::new()),
            record_counts: Mutex::new(HashMap::new()),
        }
    }

    /// A run triggered now rather than by the schedule.
    pub fn manual() -> Self {
        let now = Utc::now();
        Self::new(
            format!("manual__{}", now.format("%Y-%m-%dT%H:%M:%S")),
            now.date_naive(),
        )
    }

    pub fn scheduled(logical_date: NaiveDate) -> Self {
        Self::new(format!("scheduled__{}", logical_date), logical_date)
    }

    pub async fn record_rows_loaded(&self, table: WeatherTable, rows: u64) {
        self.rows_loaded.lock().await.insert(table, rows);
    }

    pub async fn rows_loaded(&self, table: WeatherTable) -> Option<u64> {
        self.rows_loaded.lock().await.get(&table).copied()
    }

    pub async fn record_count(&self, table: WeatherTable, count: u64) {
        self.record_counts.lock().await.insert(table, count);
    }

    pub async fn record_counts(&self) -> HashMap<WeatherTable, u64> {
        self.record_counts.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_trailing_year_endpoint() {
        let config = WeatherApiConfig {
            base_url: "https://archive-api.open-meteo.com/v1/archive".into(),
            latitude: 22.57,
            longitude: 88.36,
            timeout_secs: 30,
        };
        let variables =
            RunVariables::derive(&config, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()).unwrap();

        assert_eq!(variables.start_date, NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());
        assert_eq!(variables.end_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let query = variables.endpoint.query().unwrap();
        assert!(query.contains("start_date=2023-02-28"));
        assert!(query.contains("end_date=2024-02-29"));
    }

    #[tokio::test]
    async fn handoff_reports_missing_upstream_value() {
        let context = RunContext::scheduled(NaiveDate::from_ymd_opt(2025, 1, 24).unwrap());
        assert_eq!(context.run_id, "scheduled__2025-01-24");

        let err = context.staged.get().await.unwrap_err();
        assert!(err.to_string().contains("staged files"));

        context
            .processed_files
            .set(vec!["processed_data/weather_data_A.parquet".into()])
            .await;
        assert_eq!(context.processed_files.get().await.unwrap().len(), 1);
    }
}
