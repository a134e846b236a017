//! Outbound rate limit monitor
//!
//! Tracks a trailing-hour window of request timestamps together with the last
//! quota snapshot reported by the upstream, and advises callers whether to
//! throttle before their next request.
//!
//! A single instance is shared by every upstream caller in the process.
//! Time-dependent methods have an `_at` variant taking an explicit `now`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Remaining quota below this fraction of the limit is critical
const CRITICAL_REMAINING_RATIO: f64 = 0.10;
/// Remaining quota below this fraction of the limit is a warning
const WARNING_REMAINING_RATIO: f64 = 0.25;
/// Extrapolated rate at or above this fraction of the ceiling is critical
const CRITICAL_RATE_RATIO: f64 = 0.90;
/// Extrapolated rate at or above this fraction of the ceiling is a warning
const WARNING_RATE_RATIO: f64 = 0.75;

/// Last quota reported by the upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl QuotaSnapshot {
    /// Parse `x-ratelimit-limit`, `x-ratelimit-remaining` and `x-ratelimit-reset`
    ///
    /// Returns `None` when neither limit nor remaining is present. The reset
    /// header is accepted as epoch seconds or as seconds from now.
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Self> {
        let read = |name: &str| -> Option<i64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        };

        let limit = read("x-ratelimit-limit").and_then(|v| u32::try_from(v).ok());
        let remaining = read("x-ratelimit-remaining").and_then(|v| u32::try_from(v).ok());
        if limit.is_none() && remaining.is_none() {
            return None;
        }

        let reset_at = read("x-ratelimit-reset").and_then(|v| {
            if v > 1_000_000_000 {
                DateTime::<Utc>::from_timestamp(v, 0)
            } else {
                Some(now + ChronoDuration::seconds(v))
            }
        });

        Some(Self {
            limit,
            remaining,
            reset_at,
        })
    }

    /// Remaining fraction of the quota, if both numbers are known
    fn remaining_ratio(&self) -> Option<f64> {
        match (self.limit, self.remaining) {
            (Some(limit), Some(remaining)) if limit > 0 => {
                Some(f64::from(remaining) / f64::from(limit))
            }
            _ => None,
        }
    }
}

/// Warning level derived from quota or request rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Safe,
    Warning,
    Critical,
}

/// Snapshot of the monitor's window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub requests_last_hour: u64,
    pub requests_last_minute: u64,
    /// max(last hour, last minute × 60)
    pub hourly_rate: u64,
    pub hourly_ceiling: u32,
    pub level: WarningLevel,
    pub quota: Option<QuotaSnapshot>,
    pub rate_limit_hit: bool,
    pub hit_reset_at: Option<DateTime<Utc>>,
}

/// Advice returned by [`RateLimitMonitor::should_throttle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub throttle: bool,
    pub wait: Duration,
    pub reason: Option<String>,
}

impl ThrottleDecision {
    fn none() -> Self {
        Self {
            throttle: false,
            wait: Duration::ZERO,
            reason: None,
        }
    }

    fn wait(wait: Duration, reason: impl Into<String>) -> Self {
        Self {
            throttle: true,
            wait,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Default)]
struct WindowState {
    timestamps: VecDeque<DateTime<Utc>>,
    quota: Option<QuotaSnapshot>,
    hit_reset_at: Option<DateTime<Utc>>,
}

impl WindowState {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::hours(1);
        while self.timestamps.front().is_some_and(|t| *t <= cutoff) {
            self.timestamps.pop_front();
        }
    }
}

/// Process-wide outbound rate limit monitor
#[derive(Debug)]
pub struct RateLimitMonitor {
    state: Mutex<WindowState>,
    hourly_ceiling: u32,
    critical_wait: Duration,
    warning_wait: Duration,
    max_wait: Duration,
}

impl RateLimitMonitor {
    /// Create a monitor for an upstream with the given hourly ceiling
    pub fn new(config: &RateLimitConfig, hourly_ceiling: u32) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            hourly_ceiling,
            critical_wait: Duration::from_millis(config.critical_wait_ms),
            warning_wait: Duration::from_millis(config.warning_wait_ms),
            max_wait: Duration::from_secs(config.max_throttle_wait_secs),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an outbound request and the quota it reported, if any
    pub fn record_request(&self, quota: Option<QuotaSnapshot>) {
        self.record_request_at(Utc::now(), quota);
    }

    pub fn record_request_at(&self, now: DateTime<Utc>, quota: Option<QuotaSnapshot>) {
        let mut state = self.lock();
        state.prune(now);
        state.timestamps.push_back(now);
        if quota.is_some() {
            state.quota = quota;
        }
    }

    /// Record a hard rejection (HTTP 429) with the upstream's retry hint
    pub fn record_rate_limit_hit(&self, retry_after: Duration) {
        self.record_rate_limit_hit_at(Utc::now(), retry_after);
    }

    pub fn record_rate_limit_hit_at(&self, now: DateTime<Utc>, retry_after: Duration) {
        let mut state = self.lock();
        let reset = state
            .quota
            .and_then(|q| q.reset_at)
            .filter(|reset| *reset > now)
            .unwrap_or_else(|| {
                now + ChronoDuration::from_std(retry_after)
                    .unwrap_or_else(|_| ChronoDuration::seconds(60))
            });
        warn!(reset_at = %reset, "Upstream rate limit hit");
        state.hit_reset_at = Some(reset);
    }

    /// Compute the current window statistics
    pub fn get_stats(&self) -> RateLimitStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> RateLimitStats {
        let mut state = self.lock();
        state.prune(now);

        let minute_cutoff = now - ChronoDuration::minutes(1);
        let last_hour = state.timestamps.len() as u64;
        let last_minute = state
            .timestamps
            .iter()
            .filter(|t| **t > minute_cutoff)
            .count() as u64;
        let hourly_rate = last_hour.max(last_minute * 60);

        let level = match state.quota.and_then(|q| q.remaining_ratio()) {
            Some(ratio) if ratio < CRITICAL_REMAINING_RATIO => WarningLevel::Critical,
            Some(ratio) if ratio < WARNING_REMAINING_RATIO => WarningLevel::Warning,
            Some(_) => WarningLevel::Safe,
            None => self.level_from_rate(hourly_rate),
        };

        let hit_active = state.hit_reset_at.is_some_and(|reset| reset > now);

        RateLimitStats {
            requests_last_hour: last_hour,
            requests_last_minute: last_minute,
            hourly_rate,
            hourly_ceiling: self.hourly_ceiling,
            level,
            quota: state.quota,
            rate_limit_hit: hit_active,
            hit_reset_at: state.hit_reset_at.filter(|_| hit_active),
        }
    }

    fn level_from_rate(&self, hourly_rate: u64) -> WarningLevel {
        if self.hourly_ceiling == 0 {
            return WarningLevel::Safe;
        }
        let ratio = hourly_rate as f64 / f64::from(self.hourly_ceiling);
        if ratio >= CRITICAL_RATE_RATIO {
            WarningLevel::Critical
        } else if ratio >= WARNING_RATE_RATIO {
            WarningLevel::Warning
        } else {
            WarningLevel::Safe
        }
    }

    /// Decide whether the next request should wait
    pub fn should_throttle(&self) -> ThrottleDecision {
        self.should_throttle_at(Utc::now())
    }

    pub fn should_throttle_at(&self, now: DateTime<Utc>) -> ThrottleDecision {
        {
            let mut state = self.lock();
            match state.hit_reset_at {
                Some(reset) if reset > now => {
                    let until_reset = (reset - now).to_std().unwrap_or(self.max_wait);
                    return ThrottleDecision::wait(
                        until_reset.min(self.max_wait),
                        "rate limit hit, waiting for reset",
                    );
                }
                Some(_) => state.hit_reset_at = None,
                None => {}
            }
        }

        match self.stats_at(now).level {
            WarningLevel::Critical => {
                ThrottleDecision::wait(self.critical_wait, "critical request rate")
            }
            WarningLevel::Warning => ThrottleDecision::wait(self.warning_wait, "high request rate"),
            WarningLevel::Safe => ThrottleDecision::none(),
        }
    }

    /// Sleep for as long as [`should_throttle`](Self::should_throttle) advises
    pub async fn wait_if_needed(&self) {
        let decision = self.should_throttle();
        if decision.throttle {
            debug!(
                wait_ms = decision.wait.as_millis() as u64,
                reason = decision.reason.as_deref().unwrap_or(""),
                "Throttling upstream request"
            );
            tokio::time::sleep(decision.wait).await;
        }
    }
}
