//! Structured logging with tracing
//!
//! Provides subscriber setup and slow store call tracking

use crate::config::{LogFormat, LoggingSettings};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Number of slow calls kept for reporting
const SLOW_CALL_HISTORY: usize = 1000;

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the configured level. Fails if a global subscriber is
/// already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_filter()));

    let subscriber = Registry::default().with(env_filter);

    match settings.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true);
            subscriber
                .with(json_layer)
                .try_init()
                .context("Failed to install JSON log subscriber")?;
        }
        LogFormat::Text => {
            let fmt_layer = fmt::layer().with_target(true).compact();
            subscriber
                .with(fmt_layer)
                .try_init()
                .context("Failed to install log subscriber")?;
        }
    }

    tracing::info!(
        "Logging initialized: level={}, format={:?}, slow_call_threshold_ms={}",
        settings.level.as_filter(),
        settings.format,
        settings.slow_call_threshold_ms
    );

    Ok(())
}

/// A store call that took longer than the threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowCall {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub op: String,
}

/// Aggregate figures over the recorded slow calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowCallStats {
    pub total_count: usize,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub threshold_ms: u64,
}

/// Timer for one store call
#[derive(Debug)]
pub struct CallTracker {
    start_time: Instant,
    op: &'static str,
}

impl CallTracker {
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Flags store calls slower than a threshold
#[derive(Debug)]
pub struct SlowCallLogger {
    threshold: Duration,
    enabled: bool,
    calls: RwLock<Vec<SlowCall>>,
}

impl SlowCallLogger {
    pub fn new(threshold: Duration, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Build from settings; a threshold of 0 disables tracking
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.slow_call_threshold_ms),
            settings.slow_call_threshold_ms > 0,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn start_call(&self, op: &'static str) -> CallTracker {
        CallTracker {
            start_time: Instant::now(),
            op,
        }
    }

    /// Finish timing a call; returns true if it was slow
    pub fn finish_call(&self, tracker: CallTracker) -> bool {
        if !self.enabled {
            return false;
        }
        self.observe(tracker.op, tracker.elapsed())
    }

    /// Record a call of known duration; returns true if it was slow
    pub fn observe(&self, op: &str, duration: Duration) -> bool {
        if !self.enabled || duration < self.threshold {
            return false;
        }

        let slow_call = SlowCall {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            op: op.to_string(),
        };

        tracing::warn!(
            target: "slow_store_call",
            duration_ms = slow_call.duration_ms,
            op = %slow_call.op,
            "Slow store call detected"
        );

        let mut calls = self.calls.write();
        calls.push(slow_call);
        if calls.len() > SLOW_CALL_HISTORY {
            let excess = calls.len() - SLOW_CALL_HISTORY;
            calls.drain(0..excess);
        }

        true
    }

    /// Most recent slow calls, newest first
    pub fn recent(&self, limit: usize) -> Vec<SlowCall> {
        self.calls.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> SlowCallStats {
        let calls = self.calls.read();
        let threshold_ms = self.threshold.as_millis() as u64;

        if calls.is_empty() {
            return SlowCallStats {
                threshold_ms,
                ..SlowCallStats::default()
            };
        }

        let total_count = calls.len();
        let total_duration: u64 = calls.iter().map(|c| c.duration_ms).sum();
        let max_duration = calls.iter().map(|c| c.duration_ms).max().unwrap_or(0);

        SlowCallStats {
            total_count,
            avg_duration_ms: total_duration / total_count as u64,
            max_duration_ms: max_duration,
            threshold_ms,
        }
    }
}
