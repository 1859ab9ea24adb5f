// src/scheduler/mod.rs
//! Named, replace-on-reregister alarms plus the connectivity-wait switch.
//!
//! `AlarmScheduler` never lets the retry alarm and the connectivity listener
//! be active at the same time: turning one on turns the other off.

pub mod connectivity;
pub mod timers;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::{StartCause, Trigger};
use crate::stock_date::StockDateCalculator;

pub const DEFAULT_RETRY_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKey {
    Daily,
    Retry,
}

impl TimerKey {
    pub fn name(&self) -> &'static str {
        match self {
            TimerKey::Daily => "stock_alarm.daily",
            TimerKey::Retry => "stock_alarm.retry",
        }
    }

    /// Trigger delivered to the coordinator when this alarm goes off.
    pub fn trigger(&self) -> Trigger {
        match self {
            TimerKey::Daily => Trigger::Start(StartCause::DailyAlarm),
            TimerKey::Retry => Trigger::RetryFire,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Once(DateTime<Utc>),
    Repeating { first: DateTime<Utc>, every: Duration },
}

/// Timer facility keyed by name. Registering an existing key replaces it.
pub trait TimerFacility: Send + Sync {
    fn register(&self, key: TimerKey, schedule: Schedule);
    /// No-op when nothing is registered under `key`.
    fn cancel(&self, key: TimerKey);
}

/// Connectivity-change listener. While enabled, a transition to reachable
/// is delivered as `ConnectivityRestored`.
pub trait ConnectivityMonitor: Send + Sync {
    fn set_enabled(&self, enabled: bool);
}

pub struct AlarmScheduler {
    timers: Arc<dyn TimerFacility>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    calc: StockDateCalculator,
    retry_after: Duration,
    daily_at: Option<DateTime<Utc>>,
    retry_at: Option<DateTime<Utc>>,
    connectivity_wait: bool,
}

impl AlarmScheduler {
    pub fn new(
        timers: Arc<dyn TimerFacility>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        calc: StockDateCalculator,
    ) -> Self {
        Self {
            timers,
            connectivity,
            calc,
            retry_after: Duration::minutes(DEFAULT_RETRY_MINUTES),
            daily_at: None,
            retry_at: None,
            connectivity_wait: false,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Daily alarm at the next cutoff strictly after `now`, repeating.
    pub fn enable_daily(&mut self, now: DateTime<Utc>) {
        let first = self.calc.next_mark_after(now);
        self.timers.register(
            TimerKey::Daily,
            Schedule::Repeating {
                first,
                every: Duration::days(1),
            },
        );
        self.daily_at = Some(first);
        tracing::info!(target: "alarm", key = TimerKey::Daily.name(), at = %first, "daily alarm set");
    }

    pub fn disable_all(&mut self) {
        self.timers.cancel(TimerKey::Daily);
        self.timers.cancel(TimerKey::Retry);
        self.connectivity.set_enabled(false);
        self.daily_at = None;
        self.retry_at = None;
        self.connectivity_wait = false;
        tracing::info!(target: "alarm", "all alarms cancelled");
    }

    pub fn schedule_retry(&mut self, now: DateTime<Utc>) {
        self.set_connectivity_wait(false);
        let at = now + self.retry_after;
        self.timers.register(TimerKey::Retry, Schedule::Once(at));
        self.retry_at = Some(at);
        tracing::info!(target: "alarm", key = TimerKey::Retry.name(), at = %at, "retry scheduled");
    }

    pub fn cancel_retry(&mut self) {
        self.timers.cancel(TimerKey::Retry);
        if self.retry_at.take().is_some() {
            tracing::debug!(target: "alarm", "retry cancelled");
        }
    }

    pub fn set_connectivity_wait(&mut self, enabled: bool) {
        if enabled {
            self.cancel_retry();
        }
        if self.connectivity_wait == enabled {
            return;
        }
        self.connectivity.set_enabled(enabled);
        self.connectivity_wait = enabled;
        tracing::debug!(target: "alarm", enabled, "connectivity listener toggled");
    }

    pub fn daily_at(&self) -> Option<DateTime<Utc>> {
        self.daily_at
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.retry_at
    }

    pub fn connectivity_wait(&self) -> bool {
        self.connectivity_wait
    }
}
