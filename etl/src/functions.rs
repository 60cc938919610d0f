use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_ERROR: u16 = 500;

/// JSON result returned by every pipeline function, whether invoked in
/// process or behind a function-execution platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub existing_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub existing_dest_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_files_deleted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub new_file_uploaded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub new_files_uploaded: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub files: Option<Vec<String>>,
}

impl FunctionResponse {
    fn with_status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            existing_files: None,
            existing_dest_files: None,
            total_files_deleted: None,
            new_file_uploaded: None,
            new_files_uploaded: None,
            files: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::with_status(STATUS_OK, message)
    }

    pub fn bad_request(message: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            files: Some(files),
            ..Self::with_status(STATUS_BAD_REQUEST, message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(STATUS_NOT_FOUND, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(STATUS_ERROR, message)
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    pub fn into_result(self, function_name: &str) -> common::Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(common::Error::FunctionFailed {
                name: function_name.to_string(),
                status_code: self.status_code,
                message: self.message,
            })
        }
    }
}

/// A stateless pipeline step invoked synchronously. Implementations never
/// return errors: failures are reported through the response status.
#[async_trait]
pub trait WeatherFunction: Send + Sync {
    fn name(&self) -> &str;

    /// `run_date` is the last day of the run's window. Steps that do not
    /// fetch by date ignore it.
    async fn invoke(&self, run_date: NaiveDate) -> FunctionResponse;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_status_code_key() {
        let response = FunctionResponse {
            existing_files: Some(vec!["raw_data/old.json".into()]),
            total_files_deleted: Some(1),
            new_file_uploaded: Some("weather_data_new.json".into()),
            ..FunctionResponse::ok("Deleted 1 files")
        };

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "statusCode": 200,
                "message": "Deleted 1 files",
                "existing_files": ["raw_data/old.json"],
                "total_files_deleted": 1,
                "new_file_uploaded": "weather_data_new.json"
            })
        );
    }

    #[test]
    fn failed_response_becomes_error() {
        let err = FunctionResponse::not_found("No files found")
            .into_result("weather_data_transformation")
            .unwrap_err();

        assert!(matches!(
            err,
            common::Error::FunctionFailed { status_code: 404, .. }
        ));
    }

    #[test]
    fn parses_platform_payload() {
        let response: FunctionResponse = serde_json::from_value(json!({
            "statusCode": 400,
            "message": "Multiple files found",
            "files": ["raw_data/a.json", "raw_data/b.json"]
        }))
        .unwrap();

        assert!(!response.is_success());
        assert_eq!(response.files.unwrap().len(), 2);
    }
}
