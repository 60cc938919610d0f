use crate::context::{RunContext, RunVariables};
use crate::dag::Task;
use crate::sensor::{KeyPattern, PollSettings, endpoint_ready, key_exists, poll_until};
use async_trait::async_trait;
use common::Result;
use common::config::WeatherApiConfig;
use etl::functions::WeatherFunction;
use etl::storage::ObjectStorage;
use reqwest::Client;
use std::sync::Arc;
use tracing::{info, warn};
use warehouse::{WeatherLoader, WeatherTable};

/// Derives the run variables from config and the logical date.
pub struct SetRunVariables {
    pub weather: WeatherApiConfig,
}

#[async_trait]
impl Task for SetRunVariables {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let variables = RunVariables::derive(&self.weather, context.logical_date)?;
        info!(
            latitude = variables.latitude,
            longitude = variables.longitude,
            start_date = %variables.start_date,
            end_date = %variables.end_date,
            "Set run variables"
        );
        context.variables.set(variables).await;
        Ok(())
    }
}

/// Waits for the archive endpoint to answer 2xx.
pub struct HttpSensor {
    pub client: Client,
    pub poll: PollSettings,
}

#[async_trait]
impl Task for HttpSensor {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let endpoint = context.variables.get().await?.endpoint;
        let (client, endpoint) = (&self.client, &endpoint);
        poll_until("api_availibility_check", self.poll, || async move {
            Ok(endpoint_ready(client, endpoint).await)
        })
        .await
    }
}

/// Invokes a function synchronously for the run's window; any status other
/// than 200 fails the task.
pub struct InvokeFunction {
    pub function: Arc<dyn WeatherFunction>,
}

#[async_trait]
impl Task for InvokeFunction {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let run_date = context.variables.get().await?.end_date;
        let response = self.function.invoke(run_date).await;
        info!(
            function = %self.function.name(),
            status_code = response.status_code,
            response = %serde_json::to_string(&response)?,
            "Function returned"
        );
        response.into_result(self.function.name())?;
        Ok(())
    }
}

/// Waits for an object matching a wildcard key to appear.
pub struct KeySensor {
    pub task_id: &'static str,
    pub storage: Arc<dyn ObjectStorage>,
    pub pattern: KeyPattern,
    pub poll: PollSettings,
}

#[async_trait]
impl Task for KeySensor {
    async fn run(&self, _context: &RunContext) -> Result<()> {
        info!(task_id = %self.task_id, pattern = %self.pattern.as_str(), "Sensing for key");
        let (storage, pattern) = (self.storage.as_ref(), &self.pattern);
        poll_until(self.task_id, self.poll, || key_exists(storage, pattern)).await
    }
}

/// Lists the staged files and checks there is exactly one per table. Runs
/// ahead of the truncates so a bad file set leaves both tables untouched.
pub struct ListStagedFiles {
    pub loader: Arc<WeatherLoader>,
}

#[async_trait]
impl Task for ListStagedFiles {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let files = self.loader.list_files().await?;
        let staged = self.loader.partition(&files)?;
        context.processed_files.set(files).await;
        context.staged.set(staged).await;
        Ok(())
    }
}

pub struct TruncateTable {
    pub loader: Arc<WeatherLoader>,
    pub table: WeatherTable,
}

#[async_trait]
impl Task for TruncateTable {
    async fn run(&self, _context: &RunContext) -> Result<()> {
        self.loader.truncate(self.table).await
    }
}

/// Reports the file picked for each table once both truncates are done.
pub struct PartitionStagedFiles;

#[async_trait]
impl Task for PartitionStagedFiles {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let staged = context.staged.get().await?;
        info!(
            fact_file = %staged.fact_file,
            unit_file = %staged.unit_file,
            "Selected staged files"
        );
        Ok(())
    }
}

pub struct GenerateStatements {
    pub loader: Arc<WeatherLoader>,
}

#[async_trait]
impl Task for GenerateStatements {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let staged = context.staged.get().await?;
        let statements = self.loader.statements(&staged);
        info!(
            weather_table = %statements.facts.sql,
            weather_unit = %statements.units.sql,
            "Generated load statements"
        );
        context.statements.set(statements).await;
        Ok(())
    }
}

pub struct LoadTable {
    pub loader: Arc<WeatherLoader>,
    pub table: WeatherTable,
}

#[async_trait]
impl Task for LoadTable {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let statements = context.statements.get().await?;
        let rows = self.loader.load(statements.for_table(self.table)).await?;
        context.record_rows_loaded(self.table, rows).await;
        Ok(())
    }
}

/// Counts the rows of a table. The count is reported, not checked.
pub struct CheckCount {
    pub loader: Arc<WeatherLoader>,
    pub table: WeatherTable,
}

#[async_trait]
impl Task for CheckCount {
    async fn run(&self, context: &RunContext) -> Result<()> {
        let count = self.loader.count(self.table).await?;
        if let Some(loaded) = context.rows_loaded(self.table).await {
            if loaded != count {
                warn!(table = %self.table, rows_loaded = loaded, record_count = count, "Row count differs from rows loaded");
            }
        }
        context.record_count(self.table, count).await;
        Ok(())
    }
}
