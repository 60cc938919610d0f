use crate::Warehouse;
use crate::sql::{LoadStatement, LoadStatements, generate_load_statements};
use crate::staging::{StagedFiles, list_staged_files};
use crate::table::{TableLocation, WeatherTable};
use common::Result;
use common::config::Settings;
use etl::storage::ObjectStorage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of loading one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub staged_file: String,
    pub rows_loaded: u64,
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub weather_table: TableLoad,
    pub weather_unit: TableLoad,
}

/// Full-refresh load of the processed files into the warehouse tables.
pub struct WeatherLoader {
    storage: Arc<dyn ObjectStorage>,
    warehouse: Arc<dyn Warehouse>,
    location: TableLocation,
    stage: String,
    processed_prefix: String,
}

impl WeatherLoader {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        warehouse: Arc<dyn Warehouse>,
        location: TableLocation,
        stage: &str,
        processed_prefix: &str,
    ) -> Self {
        Self {
            storage,
            warehouse,
            location,
            stage: stage.to_string(),
            processed_prefix: processed_prefix.to_string(),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        storage: Arc<dyn ObjectStorage>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self::new(
            storage,
            warehouse,
            TableLocation::new(&settings.warehouse.database, &settings.warehouse.schema),
            &settings.warehouse.stage,
            &settings.storage.processed_prefix,
        )
    }

    fn staged_location(&self) -> String {
        format!("{}/{}", self.storage.bucket(), self.processed_prefix)
    }

    pub async fn list_files(&self) -> Result<Vec<String>> {
        list_staged_files(self.storage.as_ref(), &self.processed_prefix).await
    }

    /// Picks the single staged file of each table.
    pub fn partition(&self, files: &[String]) -> Result<StagedFiles> {
        StagedFiles::partition(files, &self.staged_location())
    }

    pub async fn truncate(&self, table: WeatherTable) -> Result<()> {
        self.warehouse.truncate(table).await
    }

    pub fn statements(&self, staged: &StagedFiles) -> LoadStatements {
        generate_load_statements(&self.location, &self.stage, staged)
    }

    pub async fn load(&self, statement: &LoadStatement) -> Result<u64> {
        self.warehouse.load(statement).await
    }

    pub async fn count(&self, table: WeatherTable) -> Result<u64> {
        let count = self.warehouse.count_rows(table).await?;
        info!(%table, record_count = count, "Counted rows");
        Ok(count)
    }

    /// Lists, truncates, loads and counts both tables. A failed load leaves its
    /// table truncated.
    pub async fn run(&self) -> Result<LoadReport> {
        let files = self.list_files().await?;
        let staged = self.partition(&files)?;

        futures::try_join!(
            self.truncate(WeatherTable::Facts),
            self.truncate(WeatherTable::Units)
        )?;

        let statements = self.statements(&staged);
        let (fact_rows, unit_rows) = futures::try_join!(
            self.load(&statements.facts),
            self.load(&statements.units)
        )?;

        let (fact_count, unit_count) = futures::try_join!(
            self.count(WeatherTable::Facts),
            self.count(WeatherTable::Units)
        )?;

        Ok(LoadReport {
            weather_table: table_load(&statements.facts, fact_rows, fact_count),
            weather_unit: table_load(&statements.units, unit_rows, unit_count),
        })
    }
}

fn table_load(statement: &LoadStatement, rows_loaded: u64, record_count: u64) -> TableLoad {
    if rows_loaded != record_count {
        warn!(
            table = %statement.table,
            rows_loaded,
            record_count,
            "Row count differs from rows loaded"
        );
    }
    TableLoad {
        table: statement.table.name().to_string(),
        staged_file: statement.staged_file.clone(),
        rows_loaded,
        record_count,
    }
}
