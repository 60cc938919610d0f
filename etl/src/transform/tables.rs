use crate::models::{DailySeries, RawWeatherDocument};
use arrow::array::{ArrayRef, Date32Array, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime};
use common::{Error, Result};
use once_cell::sync::Lazy;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::sync::Arc;

/// Column order of the daily fact table.
pub const FACT_COLUMNS: [&str; 14] = [
    "date",
    "temperature_2m_max",
    "temperature_2m_min",
    "temperature_2m_mean",
    "apparent_temperature_max",
    "apparent_temperature_min",
    "apparent_temperature_mean",
    "sunrise",
    "sunset",
    "daylight_duration",
    "sunshine_duration",
    "wind_speed_10m_max",
    "wind_gusts_10m_max",
    "wind_direction_10m_dominant",
];

static FACT_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    let fields = FACT_COLUMNS
        .iter()
        .map(|name| match *name {
            "date" => Field::new(*name, DataType::Date32, false),
            "sunrise" | "sunset" => Field::new(
                *name,
                DataType::Timestamp(TimeUnit::Millisecond, None),
                true,
            ),
            _ => Field::new(*name, DataType::Float64, true),
        })
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
});

static UNIT_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("measure", DataType::Utf8, false),
        Field::new("unit", DataType::Utf8, false),
    ]))
});

pub fn fact_schema() -> SchemaRef {
    FACT_SCHEMA.clone()
}

pub fn unit_schema() -> SchemaRef {
    UNIT_SCHEMA.clone()
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn parse_date(value: &str) -> Result<i32> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::DataShape(format!("Invalid date '{}': {}", value, e)))?;
    Ok(date.signed_duration_since(epoch()).num_days() as i32)
}

/// Archive times are local ISO-8601 without seconds, e.g. `2024-01-01T07:45`.
fn parse_local_time(value: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| Error::DataShape(format!("Invalid timestamp '{}': {}", value, e)))
}

fn float_column(values: &[Option<f64>]) -> ArrayRef {
    Arc::new(Float64Array::from(values.to_vec()))
}

fn timestamp_column(values: &[Option<String>]) -> Result<ArrayRef> {
    let parsed = values
        .iter()
        .map(|value| value.as_deref().map(parse_local_time).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(TimestampMillisecondArray::from(parsed)))
}

/// Zips the per-metric sequences into one row per day.
pub fn build_fact_batch(daily: &DailySeries) -> Result<RecordBatch> {
    daily.validate()?;

    let dates = daily
        .time
        .iter()
        .map(|value| parse_date(value))
        .collect::<Result<Vec<_>>>()?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Date32Array::from(dates)),
        float_column(&daily.temperature_2m_max),
        float_column(&daily.temperature_2m_min),
        float_column(&daily.temperature_2m_mean),
        float_column(&daily.apparent_temperature_max),
        float_column(&daily.apparent_temperature_min),
        float_column(&daily.apparent_temperature_mean),
        timestamp_column(&daily.sunrise)?,
        timestamp_column(&daily.sunset)?,
        float_column(&daily.daylight_duration),
        float_column(&daily.sunshine_duration),
        float_column(&daily.wind_speed_10m_max),
        float_column(&daily.wind_gusts_10m_max),
        float_column(&daily.wind_direction_10m_dominant),
    ];

    Ok(RecordBatch::try_new(fact_schema(), columns)?)
}

pub fn build_unit_batch(document: &RawWeatherDocument) -> Result<RecordBatch> {
    let rows = document.unit_rows()?;
    let measures: Vec<&str> = rows.iter().map(|row| row.measure.as_str()).collect();
    let units: Vec<&str> = rows.iter().map(|row| row.unit.as_str()).collect();

    Ok(RecordBatch::try_new(
        unit_schema(),
        vec![
            Arc::new(StringArray::from(measures)),
            Arc::new(StringArray::from(units)),
        ],
    )?)
}

/// Encodes one batch as a Parquet file, tagging it with the raw object it
/// was derived from.
pub fn write_parquet(batch: &RecordBatch, source_key: &str) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue {
            key: "source_object".to_string(),
            value: Some(source_key.to_string()),
        }]))
        .build();

    let mut buffer: Vec<u8> = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use bytes::Bytes;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use serde_json::json;

    fn document(times: &[&str]) -> RawWeatherDocument {
        let n = times.len();
        let numbers: Vec<f64> = (0..n).map(|i| 20.0 + i as f64).collect();
        let sunrise: Vec<String> = times.iter().map(|d| format!("{}T06:12", d)).collect();
        let sunset: Vec<String> = times.iter().map(|d| format!("{}T17:20", d)).collect();
        serde_json::from_value(json!({
            "daily_units": {
                "time": "iso8601",
                "temperature_2m_max": "°C",
                "sunrise": "iso8601",
                "daylight_duration": "s",
                "wind_direction_10m_dominant": "°"
            },
            "daily": {
                "time": times,
                "temperature_2m_max": numbers,
                "temperature_2m_min": numbers,
                "temperature_2m_mean": numbers,
                "apparent_temperature_max": numbers,
                "apparent_temperature_min": numbers,
                "apparent_temperature_mean": numbers,
                "sunrise": sunrise,
                "sunset": sunset,
                "daylight_duration": numbers,
                "sunshine_duration": numbers,
                "wind_speed_10m_max": numbers,
                "wind_gusts_10m_max": numbers,
                "wind_direction_10m_dominant": numbers,
            }
        }))
        .unwrap()
    }

    fn read_back(bytes: Vec<u8>) -> Vec<RecordBatch> {
        ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
            .unwrap()
            .build()
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn one_row_per_day_in_fixed_column_order() {
        let doc = document(&["2024-01-01", "2024-01-02", "2024-01-03"]);
        let batch = build_fact_batch(&doc.daily).unwrap();

        assert_eq!(batch.num_rows(), 3);
        let names: Vec<&str> = batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, FACT_COLUMNS.to_vec());
    }

    #[test]
    fn first_row_date_survives_parquet() {
        let doc = document(&["2024-01-01", "2024-01-02"]);
        let batch = build_fact_batch(&doc.daily).unwrap();
        let bytes = write_parquet(&batch, "raw_data/weather_data_x.json").unwrap();

        let batches = read_back(bytes);
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 2);

        let dates = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert_eq!(
            dates.value_as_date(0).unwrap().format("%Y-%m-%d").to_string(),
            "2024-01-01"
        );

        let sunrise = batches[0]
            .column(7)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(
            sunrise.value_as_datetime(1).unwrap().to_string(),
            "2024-01-02 06:12:00"
        );
    }

    #[test]
    fn unit_table_round_trips_mapping() {
        let doc = document(&["2024-01-01"]);
        let batch = build_unit_batch(&doc).unwrap();
        let bytes = write_parquet(&batch, "raw_data/weather_data_x.json").unwrap();

        let batches = read_back(bytes);
        let measures = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let units = batches[0]
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();

        let read: Vec<(String, String)> = (0..measures.len())
            .map(|i| (measures.value(i).to_string(), units.value(i).to_string()))
            .collect();
        let expected: Vec<(String, String)> = doc
            .daily_units
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().unwrap().to_string()))
            .collect();
        assert_eq!(read, expected);
    }

    #[test]
    fn null_observations_stay_null() {
        let mut doc = document(&["2024-01-01", "2024-01-02"]);
        doc.daily.sunshine_duration = vec![None, Some(100.0)];
        doc.daily.sunset = vec![None, Some("2024-01-02T17:20".to_string())];

        let batch = build_fact_batch(&doc.daily).unwrap();
        assert!(batch.column(10).is_null(0));
        assert!(batch.column(8).is_null(0));
        assert!(!batch.column(8).is_null(1));
    }

    #[test]
    fn malformed_date_fails_whole_batch() {
        let doc = document(&["2024-01-01", "01/02/2024"]);
        let err = build_fact_batch(&doc.daily).unwrap_err();
        assert!(matches!(err, Error::DataShape(_)));
    }
}
