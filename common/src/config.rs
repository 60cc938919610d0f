use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub weather: WeatherApiConfig,
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherApiConfig {
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Root directory for the `local` backend.
    pub root: Option<String>,
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    Snowflake,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    #[serde(default = "default_warehouse_backend")]
    pub backend: WarehouseBackend,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_stage")]
    pub stage: String,
    pub snowflake: Option<SnowflakeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnowflakeConfig {
    pub account: String,
    pub token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_poke_interval_secs")]
    pub poke_interval_secs: u64,
    #[serde(default = "default_sensor_timeout_secs")]
    pub sensor_timeout_secs: u64,
    #[serde(default)]
    pub schedule_hour_utc: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poke_interval_secs: default_poke_interval_secs(),
            sensor_timeout_secs: default_sensor_timeout_secs(),
            schedule_hour_utc: 0,
        }
    }
}

fn default_weather_base_url() -> String {
    "https://archive-api.open-meteo.com/v1/archive".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::S3
}

fn default_bucket() -> String {
    "weather-batch-data".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_raw_prefix() -> String {
    "raw_data/".to_string()
}

fn default_processed_prefix() -> String {
    "processed_data/".to_string()
}

fn default_warehouse_backend() -> WarehouseBackend {
    WarehouseBackend::Snowflake
}

fn default_database() -> String {
    "weather_db".to_string()
}

fn default_schema() -> String {
    "weather_schema".to_string()
}

fn default_stage() -> String {
    "aws_s3_stage".to_string()
}

fn default_token_type() -> String {
    "KEYPAIR_JWT".to_string()
}

fn default_poke_interval_secs() -> u64 {
    60
}

fn default_sensor_timeout_secs() -> u64 {
    300
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        debug!(
            storage = ?settings.storage.backend,
            warehouse = ?settings.warehouse.backend,
            bucket = %settings.storage.bucket,
            "Loaded settings"
        );

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(-90.0..=90.0).contains(&self.weather.latitude) {
            return Err(ConfigError::Message(format!(
                "weather.latitude out of range: {}",
                self.weather.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.weather.longitude) {
            return Err(ConfigError::Message(format!(
                "weather.longitude out of range: {}",
                self.weather.longitude
            )));
        }
        if self.storage.backend == StorageBackend::Local && self.storage.root.is_none() {
            return Err(ConfigError::Message(
                "storage.root is required for the local backend".to_string(),
            ));
        }
        if self.warehouse.backend == WarehouseBackend::Snowflake
            && self.warehouse.snowflake.is_none()
        {
            return Err(ConfigError::Message(
                "warehouse.snowflake is required for the snowflake backend".to_string(),
            ));
        }
        if self.workflow.schedule_hour_utc > 23 {
            return Err(ConfigError::Message(format!(
                "workflow.schedule_hour_utc must be 0-23, got {}",
                self.workflow.schedule_hour_utc
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn applies_defaults() {
        let file = write_config(
            r#"
            [weather]
            latitude = 22.57
            longitude = 88.36

            [storage]
            backend = "memory"

            [warehouse]
            backend = "local"
            "#,
        );

        let settings = Settings::new(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            settings.weather.base_url,
            "https://archive-api.open-meteo.com/v1/archive"
        );
        assert_eq!(settings.storage.bucket, "weather-batch-data");
        assert_eq!(settings.storage.raw_prefix, "raw_data/");
        assert_eq!(settings.storage.processed_prefix, "processed_data/");
        assert_eq!(settings.warehouse.database, "weather_db");
        assert_eq!(settings.warehouse.stage, "aws_s3_stage");
        assert_eq!(settings.workflow.poke_interval_secs, 60);
        assert_eq!(settings.workflow.sensor_timeout_secs, 300);
    }

    #[test]
    fn rejects_snowflake_without_credentials() {
        let file = write_config(
            r#"
            [weather]
            latitude = 22.57
            longitude = 88.36

            [storage]
            backend = "memory"

            [warehouse]
            backend = "snowflake"
            "#,
        );

        assert!(Settings::new(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        let file = write_config(
            r#"
            [weather]
            latitude = 122.0
            longitude = 88.36

            [storage]
            backend = "memory"

            [warehouse]
            backend = "local"
            "#,
        );

        assert!(Settings::new(file.path().to_str().unwrap()).is_err());
    }
}
