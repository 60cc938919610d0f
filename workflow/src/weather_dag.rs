use crate::dag::Dag;
use crate::sensor::{KeyPattern, PollSettings};
use crate::tasks::{
    CheckCount, GenerateStatements, HttpSensor, InvokeFunction, KeySensor, ListStagedFiles,
    LoadTable, PartitionStagedFiles, SetRunVariables, TruncateTable,
};
use common::Result;
use common::config::Settings;
use etl::storage::ObjectStorage;
use etl::{Extractor, Transformer};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use warehouse::{Warehouse, WeatherLoader, WeatherTable};

pub const DAG_ID: &str = "weather_etl_dag";

/// The daily weather pipeline: extract, transform, then a full-refresh load
/// of both tables followed by row counts.
pub fn weather_dag(
    settings: &Settings,
    storage: Arc<dyn ObjectStorage>,
    warehouse: Arc<dyn Warehouse>,
) -> Result<Dag> {
    let poll = PollSettings::from_config(&settings.workflow);
    let raw = &settings.storage.raw_prefix;
    let processed = &settings.storage.processed_prefix;

    let extractor = Arc::new(Extractor::from_settings(settings, storage.clone())?);
    let transformer = Arc::new(Transformer::from_settings(settings, storage.clone()));
    let loader = Arc::new(WeatherLoader::from_settings(settings, storage.clone(), warehouse));
    let http = Client::builder()
        .timeout(Duration::from_secs(settings.weather.timeout_secs))
        .build()?;

    let key_sensor = |task_id: &'static str, pattern: String| -> Result<KeySensor> {
        Ok(KeySensor {
            task_id,
            storage: storage.clone(),
            pattern: KeyPattern::new(&pattern)?,
            poll,
        })
    };

    Dag::builder(DAG_ID)
        .task(
            "global_var_set",
            &[],
            SetRunVariables {
                weather: settings.weather.clone(),
            },
        )
        .task(
            "api_availibility_check",
            &["global_var_set"],
            HttpSensor { client: http, poll },
        )
        .task(
            "weather_data_extract",
            &["api_availibility_check"],
            InvokeFunction {
                function: extractor,
            },
        )
        .task(
            "sense_raw_data_file",
            &["weather_data_extract"],
            key_sensor("sense_raw_data_file", format!("{}weather_data*.json", raw))?,
        )
        .task(
            "weather_data_transform",
            &["sense_raw_data_file"],
            InvokeFunction {
                function: transformer,
            },
        )
        .task(
            "sense_process_fact_data_file",
            &["weather_data_transform"],
            key_sensor(
                "sense_process_fact_data_file",
                format!("{}weather_data*.parquet", processed),
            )?,
        )
        .task(
            "sense_process_dim_data_file",
            &["weather_data_transform"],
            key_sensor(
                "sense_process_dim_data_file",
                format!("{}weather_units*.parquet", processed),
            )?,
        )
        .task(
            "list_s3_files",
            &["sense_process_fact_data_file", "sense_process_dim_data_file"],
            ListStagedFiles {
                loader: loader.clone(),
            },
        )
        .task(
            "truncate_weather_unit",
            &["list_s3_files"],
            TruncateTable {
                loader: loader.clone(),
                table: WeatherTable::Units,
            },
        )
        .task(
            "truncate_weather_table",
            &["list_s3_files"],
            TruncateTable {
                loader: loader.clone(),
                table: WeatherTable::Facts,
            },
        )
        .task(
            "get_list_values",
            &["truncate_weather_unit", "truncate_weather_table"],
            PartitionStagedFiles,
        )
        .task(
            "generate_sql_statements",
            &["get_list_values"],
            GenerateStatements {
                loader: loader.clone(),
            },
        )
        .task(
            "load_weather_data",
            &["generate_sql_statements"],
            LoadTable {
                loader: loader.clone(),
                table: WeatherTable::Facts,
            },
        )
        .task(
            "load_weather_unit",
            &["generate_sql_statements"],
            LoadTable {
                loader: loader.clone(),
                table: WeatherTable::Units,
            },
        )
        .task(
            "check_weather_data_count",
            &["load_weather_data"],
            CheckCount {
                loader: loader.clone(),
                table: WeatherTable::Facts,
            },
        )
        .task(
            "check_weather_unit_count",
            &["load_weather_unit"],
            CheckCount {
                loader,
                table: WeatherTable::Units,
            },
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{
        StorageBackend, StorageConfig, WarehouseBackend, WarehouseConfig, WeatherApiConfig,
        WorkflowConfig,
    };
    use etl::storage::ObjectStoreStorage;
    use warehouse::LocalWarehouse;

    fn settings() -> Settings {
        Settings {
            weather: WeatherApiConfig {
                base_url: "http://127.0.0.1:9/v1/archive".into(),
                latitude: 22.57,
                longitude: 88.36,
                timeout_secs: 5,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                bucket: "weather-batch-data".into(),
                endpoint: None,
                region: "us-east-1".into(),
                access_key: None,
                secret_key: None,
                root: None,
                raw_prefix: "raw_data/".into(),
                processed_prefix: "processed_data/".into(),
            },
            warehouse: WarehouseConfig {
                backend: WarehouseBackend::Local,
                database: "weather_db".into(),
                schema: "weather_schema".into(),
                stage: "aws_s3_stage".into(),
                snowflake: None,
            },
            workflow: WorkflowConfig::default(),
        }
    }

    #[test]
    fn task_graph_matches_pipeline() {
        let storage: Arc<dyn ObjectStorage> =
            Arc::new(ObjectStoreStorage::in_memory("weather-batch-data"));
        let warehouse = Arc::new(LocalWarehouse::new(storage.clone(), "processed_data/").unwrap());
        let dag = weather_dag(&settings(), storage, warehouse).unwrap();

        assert_eq!(dag.id(), "weather_etl_dag");
        let ids: Vec<&str> = dag.tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), 16);
        assert_eq!(ids[0], "global_var_set");

        let position = |id: &str| ids.iter().position(|t| *t == id).unwrap();
        assert!(position("weather_data_extract") < position("weather_data_transform"));
        assert!(position("sense_process_dim_data_file") < position("list_s3_files"));
        assert!(position("truncate_weather_table") < position("get_list_values"));
        assert!(position("load_weather_unit") < position("check_weather_unit_count"));

        let list = dag.tasks().find(|t| t.id == "list_s3_files").unwrap();
        assert_eq!(
            list.upstream,
            vec!["sense_process_fact_data_file", "sense_process_dim_data_file"]
        );
    }
}
