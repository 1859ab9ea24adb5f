// src/worker.rs
//! Single consumer for every trigger: timers, the connectivity monitor,
//! fetch results and HTTP commands all feed one channel, and the worker
//! hands them to the coordinator one at a time.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::coordinator::{FetchCoordinator, StartCause, Trigger};
use crate::state::{read_state, write_state, CoordinatorSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Trigger(Trigger),
    AlarmOn,
    AlarmOff,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BootOptions {
    pub alarm_enabled: bool,
    pub fetch_on_boot: bool,
}

pub struct Worker {
    coordinator: FetchCoordinator,
    events: UnboundedReceiver<Event>,
    state_path: Option<PathBuf>,
    status: watch::Sender<CoordinatorSnapshot>,
}

impl Worker {
    pub fn new(
        coordinator: FetchCoordinator,
        events: UnboundedReceiver<Event>,
        state_path: Option<PathBuf>,
    ) -> (Self, watch::Receiver<CoordinatorSnapshot>) {
        let (status, status_rx) = watch::channel(coordinator.snapshot(Utc::now()));
        let worker = Self {
            coordinator,
            events,
            state_path,
            status,
        };
        (worker, status_rx)
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Restore persisted state, then arm the daily alarm and optionally
    /// kick a cycle right away.
    pub async fn boot(&mut self, opts: BootOptions) {
        let now = Utc::now();
        if let Some(path) = &self.state_path {
            if let Some(snap) = read_state(path).await {
                if opts.alarm_enabled {
                    self.coordinator.restore(&snap, now);
                } else {
                    self.coordinator.restore_counters(&snap);
                }
            }
        }
        if opts.alarm_enabled {
            self.coordinator.enable(now);
            if opts.fetch_on_boot && !self.coordinator.state().is_awaiting() {
                self.coordinator.handle(Trigger::Start(StartCause::Boot), now);
            }
        } else {
            tracing::info!(target: "alarm", "stock alarm is off, nothing started");
        }
        self.publish().await;
    }

    pub fn apply(&mut self, event: Event) {
        let now = Utc::now();
        match event {
            Event::Trigger(t) => {
                self.coordinator.handle(t, now);
            }
            Event::AlarmOn => self.coordinator.enable(now),
            Event::AlarmOff => self.coordinator.disable(),
        }
    }

    async fn publish(&self) {
        let snap = self.coordinator.snapshot(Utc::now());
        if let Some(path) = &self.state_path {
            if let Err(e) = write_state(path, &snap).await {
                tracing::warn!(target: "alarm", "persisting state failed: {e:#}");
            }
        }
        self.status.send_replace(snap);
    }

    /// Runs until every sender is gone, then hands the coordinator back.
    pub async fn run(mut self) -> FetchCoordinator {
        while let Some(event) = self.events.recv().await {
            self.apply(event);
            self.publish().await;
        }
        tracing::info!(target: "alarm", "event channel closed, worker exiting");
        self.coordinator
    }

    pub fn spawn(self) -> JoinHandle<FetchCoordinator> {
        tokio::spawn(self.run())
    }
}
