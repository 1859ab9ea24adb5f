// src/scheduler/connectivity.rs
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::ConnectivityMonitor;
use crate::coordinator::Trigger;
use crate::worker::Event;

pub const DEFAULT_CHECK_ADDR: &str = "1.1.1.1:443";

/// Polls a TCP connect while enabled and reports the first success after
/// enabling as `ConnectivityRestored`. Disabled means no task at all.
pub struct TcpConnectivity {
    addr: String,
    interval: Duration,
    connect_timeout: Duration,
    events: UnboundedSender<Event>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpConnectivity {
    pub fn new(addr: String, interval: Duration, events: UnboundedSender<Event>) -> Self {
        Self {
            addr,
            interval,
            connect_timeout: Duration::from_secs(3),
            events,
            task: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

async fn reachable(addr: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

impl ConnectivityMonitor for TcpConnectivity {
    fn set_enabled(&self, enabled: bool) {
        let Ok(mut slot) = self.task.lock() else {
            tracing::error!(target: "alarm", "connectivity slot poisoned");
            return;
        };

        if !enabled {
            if let Some(h) = slot.take() {
                h.abort();
            }
            return;
        }
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let addr = self.addr.clone();
        let interval = self.interval;
        let timeout = self.connect_timeout;
        let events = self.events.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if reachable(&addr, timeout).await {
                    tracing::info!(target: "alarm", %addr, "network is back");
                    let _ = events.send(Event::Trigger(Trigger::ConnectivityRestored));
                    break;
                }
                tracing::trace!(target: "alarm", %addr, "still offline");
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn reports_once_when_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = TcpConnectivity::new(addr, Duration::from_millis(10), tx);

        monitor.set_enabled(true);
        assert!(monitor.is_enabled());
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, Event::Trigger(Trigger::ConnectivityRestored)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(!monitor.is_enabled());
    }

    #[tokio::test]
    async fn disabled_monitor_stays_quiet() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = TcpConnectivity::new(addr, Duration::from_millis(30), tx);

        monitor.set_enabled(true);
        monitor.set_enabled(false);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
        assert!(!monitor.is_enabled());
    }
}
