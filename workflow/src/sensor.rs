use common::config::WorkflowConfig;
use common::{Error, Result};
use etl::storage::ObjectStorage;
use regex::Regex;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// How often a sensor checks its condition and how long it keeps trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poke_interval_secs),
            timeout: Duration::from_secs(config.sensor_timeout_secs),
        }
    }
}

/// Calls `check` every `interval` until it returns true. Errors from `check`
/// end the wait immediately.
pub async fn poll_until<F, Fut>(task_id: &str, poll: PollSettings, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let wait = async {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if check().await? {
                info!(%task_id, attempt, "Sensor condition met");
                return Ok::<(), Error>(());
            }
            debug!(%task_id, attempt, "Sensor condition not met, waiting {}s", poll.interval.as_secs());
            tokio::time::sleep(poll.interval).await;
        }
    };

    match tokio::time::timeout(poll.timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(Error::SensorTimeout {
            task_id: task_id.to_string(),
            timeout: poll.timeout,
        }),
    }
}

/// Object key pattern where `*` matches any run of characters.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    pattern: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = regex::escape(pattern).replace(r"\*", ".*");
        let regex = Regex::new(&format!("^{}$", translated))
            .map_err(|e| Error::InvalidInput(format!("Invalid key pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Longest directory prefix without wildcards, used to narrow the listing.
    pub fn list_prefix(&self) -> &str {
        let literal = self.pattern.split('*').next().unwrap_or_default();
        match literal.rfind('/') {
            Some(end) => &literal[..=end],
            None => "",
        }
    }

    pub fn has_wildcard(&self) -> bool {
        self.pattern.contains('*')
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// True once any object in the bucket matches `pattern`. Literal keys are
/// checked directly instead of listing.
pub async fn key_exists(storage: &dyn ObjectStorage, pattern: &KeyPattern) -> Result<bool> {
    if !pattern.has_wildcard() {
        return storage.check_file_exists(pattern.as_str()).await;
    }
    let keys = storage.list_objects(pattern.list_prefix()).await?;
    Ok(keys.iter().any(|key| pattern.matches(key)))
}

/// True when a GET on `url` answers 2xx. Every other status, not only 404,
/// and every transport error count as not ready: the sensor keeps polling and
/// only fails once its timeout runs out.
pub async fn endpoint_ready(client: &Client, url: &Url) -> bool {
    match client.get(url.clone()).send().await {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            warn!(status = %response.status(), "Endpoint not ready");
            false
        }
        Err(e) => {
            warn!(error = %e, "Endpoint unreachable");
            false
        }
    }
}
