use crate::Warehouse;
use crate::sql::{LoadStatement, count_sql};
use crate::table::WeatherTable;
use arrow::array::{Array, Int64Array};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use common::{Error, Result};
use dashmap::DashMap;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use etl::storage::ObjectStorage;
use etl::utils::paths::object_key;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::sync::Arc;
use tracing::{debug, info};

/// In-process warehouse on DataFusion. Staged files are read straight from
/// object storage and cast into the warehouse layout; tables live in memory
/// for the lifetime of the process.
pub struct LocalWarehouse {
    ctx: SessionContext,
    stage: Arc<dyn ObjectStorage>,
    stage_prefix: String,
    tables: DashMap<WeatherTable, Vec<RecordBatch>>,
}

impl LocalWarehouse {
    pub fn new(stage: Arc<dyn ObjectStorage>, stage_prefix: &str) -> Result<Self> {
        let warehouse = Self {
            ctx: SessionContext::new(),
            stage,
            stage_prefix: stage_prefix.to_string(),
            tables: DashMap::new(),
        };
        for table in WeatherTable::ALL {
            warehouse.tables.insert(table, Vec::new());
            warehouse.register(table)?;
        }
        Ok(warehouse)
    }

    fn register(&self, table: WeatherTable) -> Result<()> {
        let batches = self
            .tables
            .get(&table)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let provider = MemTable::try_new(table.arrow_schema(), vec![batches])?;

        self.ctx.deregister_table(table.name())?;
        self.ctx.register_table(table.name(), Arc::new(provider))?;
        Ok(())
    }

    async fn read_staged(&self, staged_file: &str) -> Result<Vec<RecordBatch>> {
        let key = object_key(&self.stage_prefix, staged_file);
        let content = self.stage.get_object(&key).await?;
        debug!(%key, bytes = content.len(), "Reading staged file");

        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(content))?.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    /// Projects the staged columns onto the table layout.
    async fn conform(&self, table: WeatherTable, staged: Vec<RecordBatch>) -> Result<Vec<RecordBatch>> {
        let projections: Vec<Expr> = table
            .columns()
            .iter()
            .map(|c| cast(col(c.source), c.sql_type.arrow_type()).alias(c.target))
            .collect();

        let schema = table.arrow_schema();
        let projected = self.ctx.read_batches(staged)?.select(projections)?.collect().await?;

        projected
            .into_iter()
            .map(|batch| {
                RecordBatch::try_new(schema.clone(), batch.columns().to_vec()).map_err(Error::from)
            })
            .collect()
    }
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn truncate(&self, table: WeatherTable) -> Result<()> {
        self.tables.insert(table, Vec::new());
        self.register(table)?;
        info!(%table, "Truncated table");
        Ok(())
    }

    async fn load(&self, statement: &LoadStatement) -> Result<u64> {
        let staged = self.read_staged(&statement.staged_file).await?;
        let rows: usize = staged.iter().map(|b| b.num_rows()).sum();
        if rows == 0 {
            info!(table = %statement.table, file = %statement.staged_file, "Staged file is empty");
            return Ok(0);
        }

        let batches = self.conform(statement.table, staged).await?;
        self.tables
            .entry(statement.table)
            .or_default()
            .extend(batches);
        self.register(statement.table)?;

        info!(table = %statement.table, file = %statement.staged_file, rows, "Loaded staged file");
        Ok(rows as u64)
    }

    async fn count_rows(&self, table: WeatherTable) -> Result<u64> {
        let sql = count_sql(table.name());
        let batches = self
            .ctx
            .sql(sql.trim_end_matches(';'))
            .await?
            .collect()
            .await?;
        let count = batches
            .first()
            .and_then(|batch| batch.column(0).as_any().downcast_ref::<Int64Array>())
            .filter(|array| !array.is_empty())
            .map(|array| array.value(0))
            .ok_or_else(|| Error::Warehouse(format!("COUNT(*) on {} returned no rows", table)))?;
        Ok(count as u64)
    }
}
