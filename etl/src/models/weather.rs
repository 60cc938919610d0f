use common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Daily metrics requested from the archive API. The API adds `time` on its
/// own, which becomes the `date` column.
pub const DAILY_METRICS: [&str; 13] = [
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

/// The archive response as staged under `raw_data/`. Keys other than `daily`
/// and `daily_units` (coordinates, elevation, timezone) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWeatherDocument {
    pub daily: DailySeries,
    pub daily_units: Map<String, Value>,
}

/// Per-metric sequences, aligned by index with `time`. Observations the
/// archive does not have come back as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySeries {
    pub time: Vec<String>,
    pub temperature_2m_max: Vec<Option<f64>>,
    pub temperature_2m_min: Vec<Option<f64>>,
    pub temperature_2m_mean: Vec<Option<f64>>,
    pub apparent_temperature_max: Vec<Option<f64>>,
    pub apparent_temperature_min: Vec<Option<f64>>,
    pub apparent_temperature_mean: Vec<Option<f64>>,
    pub sunrise: Vec<Option<String>>,
    pub sunset: Vec<Option<String>>,
    pub daylight_duration: Vec<Option<f64>>,
    pub sunshine_duration: Vec<Option<f64>>,
    pub wind_speed_10m_max: Vec<Option<f64>>,
    pub wind_gusts_10m_max: Vec<Option<f64>>,
    pub wind_direction_10m_dominant: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRow {
    pub measure: String,
    pub unit: String,
}

impl RawWeatherDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let document: RawWeatherDocument = serde_json::from_slice(bytes)
            .map_err(|e| Error::DataShape(format!("Invalid weather document: {}", e)))?;
        document.daily.validate()?;
        Ok(document)
    }

    /// One row per `daily_units` entry, in source order.
    pub fn unit_rows(&self) -> Result<Vec<UnitRow>> {
        self.daily_units
            .iter()
            .map(|(measure, unit)| match unit {
                Value::String(unit) => Ok(UnitRow {
                    measure: measure.clone(),
                    unit: unit.clone(),
                }),
                other => Err(Error::DataShape(format!(
                    "Unit for '{}' must be a string, found {}",
                    measure, other
                ))),
            })
            .collect()
    }
}

impl DailySeries {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    fn column_lengths(&self) -> [(&'static str, usize); 13] {
        [
            ("temperature_2m_max", self.temperature_2m_max.len()),
            ("temperature_2m_min", self.temperature_2m_min.len()),
            ("temperature_2m_mean", self.temperature_2m_mean.len()),
            ("apparent_temperature_max", self.apparent_temperature_max.len()),
            ("apparent_temperature_min", self.apparent_temperature_min.len()),
            ("apparent_temperature_mean", self.apparent_temperature_mean.len()),
            ("sunrise", self.sunrise.len()),
            ("sunset", self.sunset.len()),
            ("daylight_duration", self.daylight_duration.len()),
            ("sunshine_duration", self.sunshine_duration.len()),
            ("wind_speed_10m_max", self.wind_speed_10m_max.len()),
            ("wind_gusts_10m_max", self.wind_gusts_10m_max.len()),
            ("wind_direction_10m_dominant", self.wind_direction_10m_dominant.len()),
        ]
    }

    /// Every metric sequence must have one entry per day in `time`.
    pub fn validate(&self) -> Result<()> {
        let expected = self.time.len();
        let mismatched: Vec<String> = self
            .column_lengths()
            .iter()
            .filter(|(_, len)| *len != expected)
            .map(|(name, len)| format!("{} has {} values", name, len))
            .collect();

        if mismatched.is_empty() {
            Ok(())
        } else {
            Err(Error::DataShape(format!(
                "All daily arrays must have {} values (one per day): {}",
                expected,
                mismatched.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(days: usize) -> Value {
        let numbers: Vec<f64> = (0..days).map(|i| i as f64).collect();
        let times: Vec<String> = (0..days).map(|i| format!("2024-01-{:02}", i + 1)).collect();
        let sunrise: Vec<String> = times.iter().map(|d| format!("{}T07:45", d)).collect();
        json!({
            "latitude": 22.5,
            "daily_units": {"time": "iso8601", "temperature_2m_max": "°C"},
            "daily": {
                "time": times,
                "temperature_2m_max": numbers,
                "temperature_2m_min": numbers,
                "temperature_2m_mean": numbers,
                "apparent_temperature_max": numbers,
                "apparent_temperature_min": numbers,
                "apparent_temperature_mean": numbers,
                "sunrise": sunrise,
                "sunset": sunrise,
                "daylight_duration": numbers,
                "sunshine_duration": numbers,
                "wind_speed_10m_max": numbers,
                "wind_gusts_10m_max": numbers,
                "wind_direction_10m_dominant": numbers,
            }
        })
    }

    #[test]
    fn parses_document_and_ignores_extra_keys() {
        let bytes = serde_json::to_vec(&sample(3)).unwrap();
        let document = RawWeatherDocument::from_slice(&bytes).unwrap();
        assert_eq!(document.daily.len(), 3);
    }

    #[test]
    fn rejects_missing_metric() {
        let mut value = sample(2);
        value["daily"].as_object_mut().unwrap().remove("sunset");
        let bytes = serde_json::to_vec(&value).unwrap();

        let err = RawWeatherDocument::from_slice(&bytes).unwrap_err();
        assert!(matches!(err, Error::DataShape(_)));
        assert!(err.to_string().contains("sunset"));
    }

    #[test]
    fn rejects_unequal_lengths() {
        let mut value = sample(2);
        value["daily"]["wind_gusts_10m_max"] = json!([1.0]);
        let bytes = serde_json::to_vec(&value).unwrap();

        let err = RawWeatherDocument::from_slice(&bytes).unwrap_err();
        assert!(err.to_string().contains("wind_gusts_10m_max has 1 values"));
    }

    #[test]
    fn accepts_null_observations() {
        let mut value = sample(2);
        value["daily"]["sunshine_duration"] = json!([null, 3600.0]);
        let bytes = serde_json::to_vec(&value).unwrap();

        let document = RawWeatherDocument::from_slice(&bytes).unwrap();
        assert_eq!(document.daily.sunshine_duration, vec![None, Some(3600.0)]);
    }

    #[test]
    fn unit_rows_keep_source_order() {
        let bytes = serde_json::to_vec(&sample(1)).unwrap();
        let document = RawWeatherDocument::from_slice(&bytes).unwrap();

        assert_eq!(
            document.unit_rows().unwrap(),
            vec![
                UnitRow {
                    measure: "time".into(),
                    unit: "iso8601".into()
                },
                UnitRow {
                    measure: "temperature_2m_max".into(),
                    unit: "°C".into()
                },
            ]
        );
    }
}
