use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const WEATHER_DATA_STEM: &str = "weather_data";
pub const WEATHER_UNITS_STEM: &str = "weather_units";

/// Builds unique object names of the form
/// `<stem>_<YYYYMMDD_HHMMSS>_<uuid>.<extension>` under a prefix.
#[derive(Debug, Clone)]
pub struct StagedNameBuilder {
    timestamp: String,
    unique_id: String,
}

impl StagedNameBuilder {
    pub fn new() -> Self {
        Self::at(Utc::now(), Uuid::new_v4())
    }

    pub fn at(now: DateTime<Utc>, unique_id: Uuid) -> Self {
        Self {
            timestamp: now.format("%Y%m%d_%H%M%S").to_string(),
            unique_id: unique_id.to_string(),
        }
    }

    pub fn file_name(&self, stem: &str, extension: &str) -> String {
        format!(
            "{}_{}_{}.{}",
            stem, self.timestamp, self.unique_id, extension
        )
    }
}

impl Default for StagedNameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins a prefix such as `raw_data/` with an object name.
pub fn object_key(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        format!("{}{}", prefix, file_name)
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

/// Last path segment of an object key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
