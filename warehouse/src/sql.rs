use crate::staging::StagedFiles;
use crate::table::{TableLocation, WeatherTable};

/// A generated bulk-load statement and the parts it was rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStatement {
    pub table: WeatherTable,
    pub staged_file: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStatements {
    pub facts: LoadStatement,
    pub units: LoadStatement,
}

impl LoadStatements {
    pub fn for_table(&self, table: WeatherTable) -> &LoadStatement {
        match table {
            WeatherTable::Facts => &self.facts,
            WeatherTable::Units => &self.units,
        }
    }
}

/// Renders `COPY INTO` for one table, reading `$1:<column>` out of the staged
/// Parquet file and casting to the warehouse type.
pub fn load_statement(
    location: &TableLocation,
    stage: &str,
    table: WeatherTable,
    staged_file: &str,
) -> LoadStatement {
    let columns = table.columns();
    let targets: Vec<&str> = columns.iter().map(|c| c.target).collect();
    let projections: Vec<String> = columns
        .iter()
        .map(|c| format!("$1:{}::{} AS {}", c.source, c.sql_type.as_sql(), c.target))
        .collect();

    let sql = format!(
        "COPY INTO {table} ({targets}) FROM (SELECT {projections} FROM {stage_path});",
        table = location.qualified(table),
        targets = targets.join(", "),
        projections = projections.join(", "),
        stage_path = location.stage_path(stage, staged_file),
    );

    LoadStatement {
        table,
        staged_file: staged_file.to_string(),
        sql,
    }
}

pub fn generate_load_statements(
    location: &TableLocation,
    stage: &str,
    staged: &StagedFiles,
) -> LoadStatements {
    LoadStatements {
        facts: load_statement(location, stage, WeatherTable::Facts, &staged.fact_file),
        units: load_statement(location, stage, WeatherTable::Units, &staged.unit_file),
    }
}

pub fn truncate_sql(location: &TableLocation, table: WeatherTable) -> String {
    format!("TRUNCATE TABLE {};", location.qualified(table))
}

pub fn count_sql(qualified_table: &str) -> String {
    format!("SELECT COUNT(*) AS record_count FROM {};", qualified_table)
}
