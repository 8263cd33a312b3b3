use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

pub const MAX_RETRIES: u32 = 3;
const BACKOFF_SECONDS: &[u64] = &[5, 15, 45];

/// Delay before retry `attempt` (zero-based). A server-provided
/// `Retry-After` in seconds wins over the fixed schedule.
pub fn backoff_delay(attempt: u32, headers: &HeaderMap) -> Duration {
    if let Some(secs) = retry_after_secs(headers) {
        return Duration::from_secs(secs);
    }
    let wait = BACKOFF_SECONDS
        .get(attempt as usize)
        .copied()
        .unwrap_or(45);
    Duration::from_secs(wait)
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Sleep for the backoff duration, logging the retry.
pub async fn backoff_sleep(attempt: u32, headers: &HeaderMap) {
    let wait = backoff_delay(attempt, headers);
    log::warn!(
        "Rate limited (429). Waiting {}s before retry {}/{}",
        wait.as_secs(),
        attempt + 1,
        MAX_RETRIES
    );
    tokio::time::sleep(wait).await;
}
