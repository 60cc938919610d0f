mod client;

pub use client::{ArchiveQuery, WeatherApiClient};

use crate::functions::{FunctionResponse, WeatherFunction};
use crate::storage::ObjectStorage;
use crate::utils::paths::{StagedNameBuilder, WEATHER_DATA_STEM, object_key};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::Result;
use common::config::Settings;
use std::sync::Arc;
use tracing::{error, info};

pub const EXTRACT_FUNCTION_NAME: &str = "weather_data_extract";

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractReport {
    pub existing_files: Vec<String>,
    pub new_key: String,
    pub new_file: String,
}

impl ExtractReport {
    pub fn total_files_deleted(&self) -> usize {
        self.existing_files.len()
    }
}

/// Fetches the trailing year of daily weather and replaces the contents of
/// the raw prefix with it.
pub struct Extractor {
    client: WeatherApiClient,
    storage: Arc<dyn ObjectStorage>,
    raw_prefix: String,
    latitude: f64,
    longitude: f64,
}

impl Extractor {
    pub fn new(
        client: WeatherApiClient,
        storage: Arc<dyn ObjectStorage>,
        raw_prefix: &str,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            client,
            storage,
            raw_prefix: raw_prefix.to_string(),
            latitude,
            longitude,
        }
    }

    pub fn from_settings(settings: &Settings, storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        Ok(Self::new(
            WeatherApiClient::new(&settings.weather)?,
            storage,
            &settings.storage.raw_prefix,
            settings.weather.latitude,
            settings.weather.longitude,
        ))
    }

    /// The new object is written before the old ones are deleted, so the
    /// prefix always holds at least one document.
    pub async fn extract_for(&self, today: NaiveDate) -> Result<ExtractReport> {
        let query = ArchiveQuery::trailing_year(self.latitude, self.longitude, today)?;
        info!(
            start_date = %query.start_date_str(),
            end_date = %query.end_date_str(),
            "Fetching weather archive"
        );
        let document = self.client.fetch_archive(&query).await?;

        let existing_files = self.storage.list_objects(&self.raw_prefix).await?;
        if existing_files.is_empty() {
            info!(prefix = %self.raw_prefix, "No files found in prefix");
        } else {
            info!(
                prefix = %self.raw_prefix,
                count = existing_files.len(),
                files = ?existing_files,
                "Existing files in prefix"
            );
        }

        let new_file = StagedNameBuilder::new().file_name(WEATHER_DATA_STEM, "json");
        let new_key = object_key(&self.raw_prefix, &new_file);
        let body = serde_json::to_vec_pretty(&document)?;
        self.storage.put_object(&new_key, &body).await?;
        info!(key = %new_key, bytes = body.len(), "Uploaded new file");

        let stale: Vec<String> = existing_files
            .iter()
            .filter(|key| **key != new_key)
            .cloned()
            .collect();
        self.storage.delete_objects(&stale).await?;
        info!(prefix = %self.raw_prefix, count = stale.len(), "Deleted files");

        Ok(ExtractReport {
            existing_files: stale,
            new_key,
            new_file,
        })
    }

    fn respond(&self, result: Result<ExtractReport>) -> FunctionResponse {
        match result {
            Ok(report) => FunctionResponse {
                total_files_deleted: Some(report.total_files_deleted()),
                new_file_uploaded: Some(report.new_file.clone()),
                existing_files: Some(report.existing_files.clone()),
                ..FunctionResponse::ok(format!(
                    "Deleted {} files and uploaded new file '{}'.",
                    report.total_files_deleted(),
                    report.new_key
                ))
            },
            Err(e) => {
                error!(error = %e, "Weather extraction failed");
                FunctionResponse::error(format!("An error occurred: {}", e))
            }
        }
    }
}

#[async_trait]
impl WeatherFunction for Extractor {
    fn name(&self) -> &str {
        EXTRACT_FUNCTION_NAME
    }

    async fn invoke(&self, run_date: NaiveDate) -> FunctionResponse {
        let result = self.extract_for(run_date).await;
        self.respond(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStoreStorage;
    use crate::storage::testing::{FailingStorage, StorageOp};
    use axum::routing::get;
    use axum::{Json, Router};
    use common::config::WeatherApiConfig;
    use serde_json::{Value, json};

    async fn spawn_archive() -> String {
        let app = Router::new().route(
            "/v1/archive",
            get(|| async {
                Json(json!({"daily": {"time": ["2024-01-01"], "temperature_2m_max": [24.1]}}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/archive", addr)
    }

    async fn extract_with_failing(fail_on: StorageOp) -> (Arc<ObjectStoreStorage>, FunctionResponse) {
        let client = WeatherApiClient::new(&WeatherApiConfig {
            base_url: spawn_archive().await,
            latitude: 22.57,
            longitude: 88.36,
            timeout_secs: 5,
        })
        .unwrap();
        let inner = Arc::new(ObjectStoreStorage::in_memory("weather-batch-data"));
        inner
            .put_object("raw_data/weather_data_previous.json", b"{}")
            .await
            .unwrap();

        let storage = Arc::new(FailingStorage::new(inner.clone(), fail_on));
        let extractor = Extractor::new(client, storage, "raw_data/", 22.57, 88.36);
        let response = extractor
            .invoke(NaiveDate::from_ymd_opt(2025, 1, 24).unwrap())
            .await;
        (inner, response)
    }

    #[tokio::test]
    async fn storage_failure_after_fetch_is_reported() {
        for fail_on in [StorageOp::List, StorageOp::Put] {
            let (storage, response) = extract_with_failing(fail_on).await;
            assert_eq!(response.status_code, 500, "{:?}", fail_on);
            assert!(response.message.starts_with("An error occurred: Storage error:"));
            assert!(response.new_file_uploaded.is_none());
            assert_eq!(
                storage.list_objects("raw_data/").await.unwrap(),
                vec!["raw_data/weather_data_previous.json"]
            );
        }
    }

    #[tokio::test]
    async fn failed_delete_keeps_new_document() {
        let (storage, response) = extract_with_failing(StorageOp::Delete).await;
        assert_eq!(response.status_code, 500);

        let keys = storage.list_objects("raw_data/").await.unwrap();
        assert_eq!(keys.len(), 2);
        let fresh = keys
            .iter()
            .find(|key| !key.ends_with("previous.json"))
            .unwrap();
        let stored: Value = serde_json::from_slice(&storage.get_object(fresh).await.unwrap()).unwrap();
        assert_eq!(stored["daily"]["time"][0], "2024-01-01");
    }
}
