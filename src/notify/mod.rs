// src/notify/mod.rs
//! Alert sink: the coordinator tells it about in-flight fetches and hands
//! it match batches; rendering and delivery happen here.

pub mod antiflutter;
pub mod discord;
pub mod slack;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::fetch::Variant;
use crate::matcher::{BatchKind, MatchBatch};
use antiflutter::AlertLedger;

/// Presentation-facing sink. Calls must not block the worker.
pub trait AlertSink: Send + Sync {
    fn in_progress(&self, date: NaiveDate, variant: Variant);
    fn clear_in_progress(&self);
    /// Drop match alerts left over from earlier cycles.
    fn clear_matches(&self);
    fn emit(&self, batch: MatchBatch);
}

/// Rendered form of a match batch, shared by every channel.
#[derive(Debug, Clone, Serialize)]
pub struct MatchAlert {
    pub kind: BatchKind,
    pub date: NaiveDate,
    pub location_id: String,
    pub location_name: String,
    pub distance_m: f64,
    pub additional_count: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub ts: DateTime<Utc>,
}

impl MatchAlert {
    pub fn from_batch(batch: &MatchBatch, ts: DateTime<Utc>) -> Self {
        Self {
            kind: batch.kind,
            date: batch.best.hash_point.date,
            location_id: batch.best.location.id.clone(),
            location_name: batch.best.location.name.clone(),
            distance_m: batch.best.distance,
            additional_count: batch.additional_count,
            latitude: batch.best.hash_point.latitude,
            longitude: batch.best.hash_point.longitude,
            ts,
        }
    }

    pub fn title(&self) -> String {
        match self.kind {
            BatchKind::Regular => format!("Hash point near a known location ({})", self.date),
            BatchKind::Global => format!("Globalhash near a known location ({})", self.date),
        }
    }

    pub fn summary(&self) -> String {
        let mut s = format!(
            "{} from {}",
            format_distance(self.distance_m),
            self.location_name
        );
        if self.additional_count > 0 {
            s.push_str(&format!(" (+{} more nearby)", self.additional_count));
        }
        s
    }
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &MatchAlert) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Logs everything and fans match alerts out to the configured channels.
/// Sends run on spawned tasks; a duplicate batch for the same date and
/// kind is suppressed by the ledger. The alerts of the latest cycle stay
/// active, at most one per kind, until the next cycle clears them.
pub struct NotifierMux {
    notifiers: Vec<Arc<dyn Notifier>>,
    ledger: Mutex<AlertLedger>,
    active: Mutex<Vec<MatchAlert>>,
    progress: Mutex<Option<(NaiveDate, Variant)>>,
}

impl NotifierMux {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            notifiers,
            ledger: Mutex::new(AlertLedger::default()),
            active: Mutex::new(Vec::new()),
            progress: Mutex::new(None),
        }
    }

    /// Slack/Discord from `SLACK_WEBHOOK_URL` / `DISCORD_WEBHOOK_URL`; both optional.
    pub fn from_env() -> Self {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
            notifiers.push(Arc::new(slack::SlackNotifier::new(url)));
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_URL") {
            notifiers.push(Arc::new(discord::DiscordNotifier::new(url)));
        }
        tracing::info!(target: "notify", channels = notifiers.len(), "notifier mux ready");
        Self::new(notifiers)
    }

    pub fn channels(&self) -> usize {
        self.notifiers.len()
    }

    /// Match alerts currently standing.
    pub fn active_alerts(&self) -> Vec<MatchAlert> {
        self.active.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn in_progress_now(&self) -> Option<(NaiveDate, Variant)> {
        self.progress.lock().ok().and_then(|p| *p)
    }
}

impl AlertSink for NotifierMux {
    fn in_progress(&self, date: NaiveDate, variant: Variant) {
        if let Ok(mut p) = self.progress.lock() {
            *p = Some((date, variant));
        }
        tracing::info!(target: "notify", %date, variant = variant.as_str(), "fetching stock value");
    }

    fn clear_in_progress(&self) {
        if let Ok(mut p) = self.progress.lock() {
            p.take();
        }
    }

    fn clear_matches(&self) {
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        if !active.is_empty() {
            tracing::debug!(target: "notify", cleared = active.len(), "clearing previous match alerts");
            active.clear();
        }
    }

    fn emit(&self, batch: MatchBatch) {
        let alert = MatchAlert::from_batch(&batch, Utc::now());
        if let Ok(mut active) = self.active.lock() {
            active.retain(|a| a.kind != alert.kind);
            active.push(alert.clone());
        }
        let fresh = match self.ledger.lock() {
            Ok(mut ledger) => ledger.record_if_new(&alert),
            Err(_) => true,
        };
        if !fresh {
            tracing::debug!(
                target: "notify",
                kind = alert.kind.as_str(),
                date = %alert.date,
                "duplicate match alert suppressed"
            );
            return;
        }

        tracing::info!(
            target: "notify",
            kind = alert.kind.as_str(),
            date = %alert.date,
            location = %alert.location_name,
            distance_m = alert.distance_m,
            additional = alert.additional_count,
            "{}: {}",
            alert.title(),
            alert.summary()
        );

        if self.notifiers.is_empty() {
            return;
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(target: "notify", "no runtime, webhook delivery skipped");
            return;
        };
        for n in &self.notifiers {
            let n = Arc::clone(n);
            let alert = alert.clone();
            rt.spawn(async move {
                if let Err(e) = n.send(&alert).await {
                    tracing::warn!(target: "notify", channel = n.name(), "send failed: {e:#}");
                }
            });
        }
    }
}
