use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

/// Below this many remaining requests, calls are spread out until the reset.
pub(crate) const LOW_WATER_MARK: i64 = 500;

const MAX_DELAY: Duration = Duration::from_secs(120);

/// The quota signal GitHub attaches to every API response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RateLimit {
    pub remaining: i64,
    /// Epoch seconds at which the quota is replenished.
    pub reset: i64,
}

impl RateLimit {
    /// A missing remaining count reads as 0 and a missing reset as the epoch.
    pub(crate) fn from_headers(headers: &HeaderMap) -> RateLimit {
        RateLimit {
            remaining: header_i64(headers, "x-ratelimit-remaining").unwrap_or(0),
            reset: header_i64(headers, "x-ratelimit-reset").unwrap_or(0),
        }
    }

    pub(crate) fn is_low(&self) -> bool {
        self.remaining < LOW_WATER_MARK
    }

    /// How long to pause before the next call, given that `elapsed` was
    /// already spent on the call that produced this signal.
    pub(crate) fn backoff(&self, now: DateTime<Utc>, elapsed: Duration) -> Duration {
        let until_reset = (self.reset as f64 - epoch_seconds(now)).max(0.0);
        let raw = 1.1 * until_reset / (self.remaining.max(1) as f64);
        let delay = (raw - elapsed.as_secs_f64()).clamp(0.0, MAX_DELAY.as_secs_f64());
        if delay.is_finite() {
            Duration::from_secs_f64(delay)
        } else {
            Duration::ZERO
        }
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
}

fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9
}
