use crate::table::WeatherTable;
use common::{Error, Result};
use etl::storage::ObjectStorage;
use etl::utils::paths::file_name;
use tracing::info;

/// The staged Parquet file for each destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFiles {
    pub fact_file: String,
    pub unit_file: String,
}

impl StagedFiles {
    /// Groups file names by table marker. Each group must hold exactly one
    /// file: an empty group means the transform never published, more than
    /// one means two runs overlapped and picking either would be a guess.
    pub fn partition<S: AsRef<str>>(files: &[S], location: &str) -> Result<Self> {
        let group = |table: WeatherTable| -> Vec<String> {
            files
                .iter()
                .map(|f| file_name(f.as_ref()).to_string())
                .filter(|name| name.contains(table.file_marker()))
                .collect()
        };

        let fact_files = group(WeatherTable::Facts);
        let unit_files = group(WeatherTable::Units);
        info!(?fact_files, ?unit_files, "Partitioned staged files");

        Ok(Self {
            fact_file: exactly_one(fact_files, WeatherTable::Facts, location)?,
            unit_file: exactly_one(unit_files, WeatherTable::Units, location)?,
        })
    }

    pub fn file_for(&self, table: WeatherTable) -> &str {
        match table {
            WeatherTable::Facts => &self.fact_file,
            WeatherTable::Units => &self.unit_file,
        }
    }
}

fn exactly_one(mut files: Vec<String>, table: WeatherTable, location: &str) -> Result<String> {
    match files.len() {
        0 => Err(Error::NotFound(format!(
            "no {} files in {}",
            table.file_marker(),
            location
        ))),
        1 => Ok(files.remove(0)),
        _ => Err(Error::MultipleFiles {
            location: location.to_string(),
            files,
        }),
    }
}

/// Lists the full object keys under the processed prefix.
pub async fn list_staged_files(storage: &dyn ObjectStorage, prefix: &str) -> Result<Vec<String>> {
    let files = storage.list_objects(prefix).await?;
    info!(bucket = %storage.bucket(), %prefix, count = files.len(), "Listed staged files");
    Ok(files)
}
