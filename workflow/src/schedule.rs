use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::future::Future;
use tracing::info;

/// The first `hour:00` UTC strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);

    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Runs `job` once a day at `hour` UTC until `shutdown` resolves. Missed days
/// are not caught up. The job receives the logical date of the run.
pub async fn run_daily<F, Fut, S>(hour: u32, shutdown: S, mut job: F)
where
    F: FnMut(NaiveDate) -> Fut,
    Fut: Future<Output = ()>,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let now = Utc::now();
        let next = next_daily_run(now, hour);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "Waiting for next scheduled run");

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping scheduler");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        job(next.date_naive()).await;
    }
}
