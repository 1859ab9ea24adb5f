// src/scheduler/timers.rs
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::{Schedule, TimerFacility, TimerKey};
use crate::worker::Event;

/// In-process alarms: one tokio task per key. Re-registering a key aborts
/// the previous task before arming the new one.
pub struct TokioTimers {
    events: UnboundedSender<Event>,
    tasks: Mutex<HashMap<TimerKey, JoinHandle<()>>>,
}

impl TokioTimers {
    pub fn new(events: UnboundedSender<Event>) -> Self {
        Self {
            events,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Keys whose task is still armed.
    pub fn pending(&self) -> Vec<TimerKey> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<TimerKey> = tasks
            .iter()
            .filter(|(_, t)| !t.is_finished())
            .map(|(k, _)| *k)
            .collect();
        keys.sort_by_key(|k| k.name());
        keys
    }
}

fn until(at: DateTime<Utc>) -> std::time::Duration {
    (at - Utc::now()).to_std().unwrap_or_default()
}

/// First step of `next + k * every` that lies after `now`. After a suspend
/// the missed periods collapse into the one fire that already happened.
fn next_after(mut next: DateTime<Utc>, every: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    while next <= now {
        next += every;
    }
    next
}

impl TimerFacility for TokioTimers {
    fn register(&self, key: TimerKey, schedule: Schedule) {
        let schedule = match schedule {
            Schedule::Repeating { first, every } if every <= Duration::zero() => {
                tracing::warn!(target: "alarm", key = key.name(), %every, "non-positive period, firing once");
                Schedule::Once(first)
            }
            s => s,
        };
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            match schedule {
                Schedule::Once(at) => {
                    tokio::time::sleep(until(at)).await;
                    tracing::debug!(target: "alarm", key = key.name(), "timer fired");
                    let _ = events.send(Event::Trigger(key.trigger()));
                }
                Schedule::Repeating { first, every } => {
                    let mut next = first;
                    loop {
                        tokio::time::sleep(until(next)).await;
                        tracing::debug!(target: "alarm", key = key.name(), "timer fired");
                        if events.send(Event::Trigger(key.trigger())).is_err() {
                            break;
                        }
                        next = next_after(next, every, Utc::now());
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = tasks.insert(key, task) {
            old.abort();
        }
    }

    fn cancel(&self, key: TimerKey) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = tasks.remove(&key) {
            old.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for (_, t) in tasks.drain() {
                t.abort();
            }
        }
    }
}
