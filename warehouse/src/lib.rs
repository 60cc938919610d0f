pub mod loader;
pub mod local;
pub mod snowflake;
pub mod sql;
pub mod staging;
pub mod table;

pub use loader::{LoadReport, WeatherLoader};
pub use local::LocalWarehouse;
pub use snowflake::SnowflakeWarehouse;
pub use sql::{LoadStatement, LoadStatements};
pub use staging::StagedFiles;
pub use table::{TableLocation, WeatherTable};

use async_trait::async_trait;
use common::Result;
use common::config::{WarehouseBackend, WarehouseConfig};
use etl::storage::ObjectStorage;
use std::sync::Arc;
use tracing::info;

/// Executes table maintenance and bulk loads against a warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn truncate(&self, table: WeatherTable) -> Result<()>;

    /// Runs a load statement and returns the number of rows it loaded.
    async fn load(&self, statement: &LoadStatement) -> Result<u64>;

    async fn count_rows(&self, table: WeatherTable) -> Result<u64>;
}

/// Opens the configured warehouse. The local backend reads staged files from
/// `stage` under `stage_prefix`.
pub fn open_warehouse(
    config: &WarehouseConfig,
    stage: Arc<dyn ObjectStorage>,
    stage_prefix: &str,
) -> Result<Arc<dyn Warehouse>> {
    let warehouse: Arc<dyn Warehouse> = match config.backend {
        WarehouseBackend::Snowflake => {
            let snowflake = config.snowflake.as_ref().ok_or_else(|| {
                common::Error::InvalidInput(
                    "warehouse.snowflake is required for the snowflake backend".into(),
                )
            })?;
            Arc::new(SnowflakeWarehouse::new(
                snowflake,
                TableLocation::new(&config.database, &config.schema),
            )?)
        }
        WarehouseBackend::Local => Arc::new(LocalWarehouse::new(stage, stage_prefix)?),
    };

    info!(backend = ?config.backend, database = %config.database, "Opened warehouse");
    Ok(warehouse)
}
