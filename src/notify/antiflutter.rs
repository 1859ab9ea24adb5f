// src/notify/antiflutter.rs
use std::collections::HashSet;

use chrono::NaiveDate;

use super::MatchAlert;
use crate::matcher::BatchKind;

/// Remembers which (date, kind) alerts went out, so a second cycle for the
/// same day (manual kick, restart, duplicate trigger) doesn't re-alert.
/// - First alert for a (date, kind) always passes.
/// - Entries for older dates are dropped once a newer date is recorded.
#[derive(Debug, Clone, Default)]
pub struct AlertLedger {
    sent: HashSet<(NaiveDate, BatchKind)>,
}

impl AlertLedger {
    /// Check without mutating.
    pub fn should_alert(&self, alert: &MatchAlert) -> bool {
        !self.sent.contains(&(alert.date, alert.kind))
    }

    /// Record the alert; returns whether it was new.
    pub fn record_if_new(&mut self, alert: &MatchAlert) -> bool {
        if !self.should_alert(alert) {
            return false;
        }
        self.sent.retain(|(d, _)| *d >= alert.date);
        self.sent.insert((alert.date, alert.kind));
        true
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
