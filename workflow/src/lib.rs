pub mod context;
pub mod dag;
pub mod schedule;
pub mod sensor;
pub mod tasks;
pub mod weather_dag;

pub use context::{RunContext, RunVariables};
pub use dag::{Dag, DagRunReport, Task, TaskState};
pub use weather_dag::{DAG_ID, weather_dag};

use common::Result;
use common::config::Settings;
use etl::storage::{ObjectStorage, open_storage};
use etl::{Extractor, Transformer};
use std::sync::Arc;
use warehouse::{Warehouse, WeatherLoader, open_warehouse};

/// The configured backends, shared by every run of a process so the local
/// warehouse keeps its tables between scheduled runs.
pub struct Pipeline {
    settings: Settings,
    storage: Arc<dyn ObjectStorage>,
    warehouse: Arc<dyn Warehouse>,
}

impl Pipeline {
    pub async fn open(settings: Settings) -> Result<Self> {
        let storage = open_storage(&settings.storage).await?;
        let warehouse = open_warehouse(
            &settings.warehouse,
            storage.clone(),
            &settings.storage.processed_prefix,
        )?;
        Ok(Self::with_backends(settings, storage, warehouse))
    }

    pub fn with_backends(
        settings: Settings,
        storage: Arc<dyn ObjectStorage>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            settings,
            storage,
            warehouse,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dag(&self) -> Result<Dag> {
        weather_dag(&self.settings, self.storage.clone(), self.warehouse.clone())
    }

    pub fn extractor(&self) -> Result<Extractor> {
        Extractor::from_settings(&self.settings, self.storage.clone())
    }

    pub fn transformer(&self) -> Transformer {
        Transformer::from_settings(&self.settings, self.storage.clone())
    }

    pub fn loader(&self) -> WeatherLoader {
        WeatherLoader::from_settings(&self.settings, self.storage.clone(), self.warehouse.clone())
    }

    /// Builds the DAG and runs it once with a fresh context.
    pub async fn run(&self, context: RunContext) -> Result<DagRunReport> {
        let dag = self.dag()?;
        Ok(dag.run(Arc::new(context)).await)
    }
}
