pub mod tables;

use crate::functions::{FunctionResponse, WeatherFunction};
use crate::models::RawWeatherDocument;
use crate::storage::ObjectStorage;
use crate::utils::paths::{StagedNameBuilder, WEATHER_DATA_STEM, WEATHER_UNITS_STEM, object_key};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::config::Settings;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub const TRANSFORM_FUNCTION_NAME: &str = "weather_data_transformation";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Error while accessing source bucket: {0}")]
    Source(#[source] common::Error),

    #[error("Error while processing data: {0}")]
    Processing(#[source] common::Error),

    #[error("Error while uploading or deleting files: {0}")]
    Publish(#[source] common::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformReport {
    pub source_key: String,
    pub existing_dest_files: Vec<String>,
    pub fact_file: String,
    pub unit_file: String,
    pub fact_rows: usize,
    pub unit_rows: usize,
}

/// Outcome of a transform run. The two refusal cases perform no writes.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    Transformed(TransformReport),
    NoSourceFiles { location: String },
    MultipleSourceFiles { location: String, files: Vec<String> },
}

struct EncodedTables {
    fact: Vec<u8>,
    unit: Vec<u8>,
    fact_rows: usize,
    unit_rows: usize,
}

/// Reshapes the single raw document into the fact and unit Parquet files and
/// replaces the contents of the processed prefix with them.
pub struct Transformer {
    storage: Arc<dyn ObjectStorage>,
    raw_prefix: String,
    processed_prefix: String,
}

impl Transformer {
    pub fn new(storage: Arc<dyn ObjectStorage>, raw_prefix: &str, processed_prefix: &str) -> Self {
        Self {
            storage,
            raw_prefix: raw_prefix.to_string(),
            processed_prefix: processed_prefix.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings, storage: Arc<dyn ObjectStorage>) -> Self {
        Self::new(
            storage,
            &settings.storage.raw_prefix,
            &settings.storage.processed_prefix,
        )
    }

    fn source_location(&self) -> String {
        format!("{}/{}", self.storage.bucket(), self.raw_prefix)
    }

    pub async fn transform(&self) -> Result<TransformOutcome, TransformError> {
        let source_files = self
            .storage
            .list_objects(&self.raw_prefix)
            .await
            .map_err(TransformError::Source)?;

        let source_key = match source_files.as_slice() {
            [] => {
                warn!(location = %self.source_location(), "No raw files to transform");
                return Ok(TransformOutcome::NoSourceFiles {
                    location: self.source_location(),
                });
            }
            [single] => single.clone(),
            _ => {
                warn!(
                    location = %self.source_location(),
                    files = ?source_files,
                    "Refusing to pick between multiple raw files"
                );
                return Ok(TransformOutcome::MultipleSourceFiles {
                    location: self.source_location(),
                    files: source_files,
                });
            }
        };

        let content = self
            .storage
            .get_object(&source_key)
            .await
            .map_err(TransformError::Source)?;
        info!(key = %source_key, bytes = content.len(), "Loaded raw weather document");

        let encoded = encode_tables(&content, &source_key).map_err(TransformError::Processing)?;

        let names = StagedNameBuilder::new();
        let fact_file = names.file_name(WEATHER_DATA_STEM, "parquet");
        let unit_file = names.file_name(WEATHER_UNITS_STEM, "parquet");

        let existing_dest_files = self
            .publish(&encoded, &fact_file, &unit_file)
            .await
            .map_err(TransformError::Publish)?;

        Ok(TransformOutcome::Transformed(TransformReport {
            source_key,
            existing_dest_files,
            fact_file,
            unit_file,
            fact_rows: encoded.fact_rows,
            unit_rows: encoded.unit_rows,
        }))
    }

    /// Uploads both files, then removes whatever the prefix held before.
    async fn publish(
        &self,
        encoded: &EncodedTables,
        fact_file: &str,
        unit_file: &str,
    ) -> common::Result<Vec<String>> {
        let existing = self.storage.list_objects(&self.processed_prefix).await?;

        let fact_key = object_key(&self.processed_prefix, fact_file);
        let unit_key = object_key(&self.processed_prefix, unit_file);
        self.storage.put_object(&fact_key, &encoded.fact).await?;
        self.storage.put_object(&unit_key, &encoded.unit).await?;
        info!(fact = %fact_key, unit = %unit_key, "Uploaded new files");

        let stale: Vec<String> = existing
            .into_iter()
            .filter(|key| *key != fact_key && *key != unit_key)
            .collect();
        self.storage.delete_objects(&stale).await?;
        info!(prefix = %self.processed_prefix, count = stale.len(), "Deleted files");

        Ok(stale)
    }

    fn respond(outcome: Result<TransformOutcome, TransformError>) -> FunctionResponse {
        match outcome {
            Ok(TransformOutcome::Transformed(report)) => FunctionResponse {
                total_files_deleted: Some(report.existing_dest_files.len()),
                new_files_uploaded: Some(vec![report.fact_file.clone(), report.unit_file.clone()]),
                existing_dest_files: Some(report.existing_dest_files.clone()),
                ..FunctionResponse::ok(format!(
                    "Deleted {} files and uploaded new files '{}', '{}'.",
                    report.existing_dest_files.len(),
                    report.fact_file,
                    report.unit_file
                ))
            },
            Ok(TransformOutcome::NoSourceFiles { location }) => {
                FunctionResponse::not_found(format!("No files found in location {}", location))
            }
            Ok(TransformOutcome::MultipleSourceFiles { location, files }) => {
                FunctionResponse::bad_request(
                    format!("Multiple files found in location {}", location),
                    files,
                )
            }
            Err(e) => {
                error!(error = %e, "Weather transformation failed");
                FunctionResponse::error(e.to_string())
            }
        }
    }
}

fn encode_tables(content: &[u8], source_key: &str) -> common::Result<EncodedTables> {
    let document = RawWeatherDocument::from_slice(content)?;
    let fact_batch = tables::build_fact_batch(&document.daily)?;
    let unit_batch = tables::build_unit_batch(&document)?;

    Ok(EncodedTables {
        fact: tables::write_parquet(&fact_batch, source_key)?,
        unit: tables::write_parquet(&unit_batch, source_key)?,
        fact_rows: fact_batch.num_rows(),
        unit_rows: unit_batch.num_rows(),
    })
}

#[async_trait]
impl WeatherFunction for Transformer {
    fn name(&self) -> &str {
        TRANSFORM_FUNCTION_NAME
    }

    async fn invoke(&self, _run_date: NaiveDate) -> FunctionResponse {
        Self::respond(self.transform().await)
    }
}
