use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use etl::utils::paths::{WEATHER_DATA_STEM, WEATHER_UNITS_STEM};
use std::fmt;
use std::sync::Arc;

/// Warehouse column types used by the weather tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Date,
    Float,
    DateTime,
    String,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Date => "DATE",
            Self::Float => "FLOAT",
            Self::DateTime => "DATETIME",
            Self::String => "STRING",
        }
    }

    pub fn arrow_type(&self) -> DataType {
        match self {
            Self::Date => DataType::Date32,
            Self::Float => DataType::Float64,
            Self::DateTime => DataType::Timestamp(TimeUnit::Millisecond, None),
            Self::String => DataType::Utf8,
        }
    }
}

/// Maps a column of a staged Parquet file onto a warehouse column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    pub target: &'static str,
    pub source: &'static str,
    pub sql_type: SqlType,
}

const fn mapping(target: &'static str, source: &'static str, sql_type: SqlType) -> ColumnMapping {
    ColumnMapping {
        target,
        source,
        sql_type,
    }
}

const WEATHER_TABLE_COLUMNS: [ColumnMapping; 14] = [
    mapping("daily_date", "date", SqlType::Date),
    mapping("temperature_2m_max", "temperature_2m_max", SqlType::Float),
    mapping("temperature_2m_min", "temperature_2m_min", SqlType::Float),
    mapping("temperature_2m_mean", "temperature_2m_mean", SqlType::Float),
    mapping("apparent_temperature_max", "apparent_temperature_max", SqlType::Float),
    mapping("apparent_temperature_min", "apparent_temperature_min", SqlType::Float),
    mapping("apparent_temperature_mean", "apparent_temperature_mean", SqlType::Float),
    mapping("sunrise", "sunrise", SqlType::DateTime),
    mapping("sunset", "sunset", SqlType::DateTime),
    mapping("daylight_duration", "daylight_duration", SqlType::Float),
    mapping("sunshine_duration", "sunshine_duration", SqlType::Float),
    mapping("wind_speed_10m_max", "wind_speed_10m_max", SqlType::Float),
    mapping("wind_gusts_10m_max", "wind_gusts_10m_max", SqlType::Float),
    mapping("wind_direction_10m_dominant", "wind_direction_10m_dominant", SqlType::Float),
];

const WEATHER_UNIT_COLUMNS: [ColumnMapping; 2] = [
    mapping("measure", "measure", SqlType::String),
    mapping("unit", "unit", SqlType::String),
];

/// The two destination tables of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherTable {
    /// `weather_table`: one row per day.
    Facts,
    /// `weather_unit`: one row per measure.
    Units,
}

impl WeatherTable {
    pub const ALL: [WeatherTable; 2] = [WeatherTable::Facts, WeatherTable::Units];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Facts => "weather_table",
            Self::Units => "weather_unit",
        }
    }

    /// Substring identifying this table's staged files.
    pub fn file_marker(&self) -> &'static str {
        match self {
            Self::Facts => WEATHER_DATA_STEM,
            Self::Units => WEATHER_UNITS_STEM,
        }
    }

    pub fn columns(&self) -> &'static [ColumnMapping] {
        match self {
            Self::Facts => &WEATHER_TABLE_COLUMNS,
            Self::Units => &WEATHER_UNIT_COLUMNS,
        }
    }

    /// Arrow layout of the table; every warehouse column is nullable.
    pub fn arrow_schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns()
            .iter()
            .map(|c| Field::new(c.target, c.sql_type.arrow_type(), true))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

impl fmt::Display for WeatherTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Database and schema the tables and the external stage live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation {
    pub database: String,
    pub schema: String,
}

impl TableLocation {
    pub fn new(database: &str, schema: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
        }
    }

    pub fn qualified(&self, table: WeatherTable) -> String {
        format!("{}.{}.{}", self.database, self.schema, table.name())
    }

    pub fn stage_path(&self, stage: &str, file_name: &str) -> String {
        format!("@{}.{}.{}/{}", self.database, self.schema, stage, file_name)
    }
}
