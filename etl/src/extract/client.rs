use crate::models::DAILY_METRICS;
use chrono::{Months, NaiveDate};
use common::config::WeatherApiConfig;
use common::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Query parameters for one archive request.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ArchiveQuery {
    /// The year ending on `today`. Feb 29 maps to Feb 28 of the prior year.
    pub fn trailing_year(latitude: f64, longitude: f64, today: NaiveDate) -> Result<Self> {
        let start_date = today.checked_sub_months(Months::new(12)).ok_or_else(|| {
            Error::InvalidInput(format!("Cannot compute start date one year before {}", today))
        })?;

        Ok(Self {
            latitude,
            longitude,
            start_date,
            end_date: today,
        })
    }

    pub fn start_date_str(&self) -> String {
        self.start_date.format(DATE_FORMAT).to_string()
    }

    pub fn end_date_str(&self) -> String {
        self.end_date.format(DATE_FORMAT).to_string()
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("start_date", self.start_date_str()),
            ("end_date", self.end_date_str()),
            ("daily", DAILY_METRICS.join(",")),
        ]
    }
}

#[derive(Clone)]
pub struct WeatherApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl WeatherApiClient {
    pub fn new(config: &WeatherApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = Url::parse(&config.base_url)?;
        Ok(Self { client, base_url })
    }

    /// Full request URL for `query`, e.g.
    /// `https://archive-api.open-meteo.com/v1/archive?latitude=..&daily=..`.
    pub fn archive_url(&self, query: &ArchiveQuery) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .extend_pairs(query.query_pairs().iter().map(|(k, v)| (*k, v.as_str())));
        url
    }

    /// Fetches the archive document. Non-2xx responses and non-JSON bodies
    /// are errors.
    pub async fn fetch_archive(&self, query: &ArchiveQuery) -> Result<Value> {
        let url = self.archive_url(query);
        debug!(%url, "Requesting weather archive");

        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        let document: Value = serde_json::from_slice(&body)?;
        Ok(document)
    }
}
