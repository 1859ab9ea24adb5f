//! Demo that runs one full alarm cycle against a scripted fetcher: the
//! first Primary answer is "not posted yet", the retry succeeds, and the
//! resulting points land next to two demo locations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedSender};

use geohash_alarm::coordinator::CycleState;
use geohash_alarm::fetch::{FetchCollaborator, FetchRequest, FetchResult, HashPoint, ResultCode};
use geohash_alarm::matcher::StaticLocations;
use geohash_alarm::scheduler::connectivity::TcpConnectivity;
use geohash_alarm::scheduler::timers::TokioTimers;
use geohash_alarm::worker::{BootOptions, Event, Worker};
use geohash_alarm::{
    AlarmScheduler, FetchCoordinator, KnownLocation, NotifierMux, StockDateCalculator, Trigger,
    Variant,
};

struct ScriptedFetcher {
    events: UnboundedSender<Event>,
    primary_calls: AtomicUsize,
}

impl FetchCollaborator for ScriptedFetcher {
    fn submit(&self, request: FetchRequest) {
        let first_primary = request.variant == Variant::Primary
            && self.primary_calls.fetch_add(1, Ordering::SeqCst) == 0;
        let result = if first_primary {
            FetchResult::failure(&request, ResultCode::NotPostedYet)
        } else {
            let (latitude, longitude) = match request.variant {
                Variant::Primary => (37.4211, -122.0841),
                Variant::Secondary => (51.5072, -0.1276),
            };
            let point = HashPoint {
                date: request.date,
                variant: request.variant,
                latitude,
                longitude,
            };
            FetchResult::success(&request, point)
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = events.send(Event::Trigger(Trigger::FetchResultArrived(result)));
        });
    }
}

fn demo_locations() -> Vec<KnownLocation> {
    vec![
        KnownLocation {
            id: "office".into(),
            name: "Office".into(),
            latitude: 37.4220,
            longitude: -122.0841,
            proximity_radius: 2_000.0,
        },
        KnownLocation {
            id: "cafe".into(),
            name: "Cafe".into(),
            latitude: 37.4300,
            longitude: -122.0900,
            proximity_radius: 5_000.0,
        },
        KnownLocation {
            id: "london".into(),
            name: "London flat".into(),
            latitude: 51.5080,
            longitude: -0.1280,
            proximity_radius: 1_000.0,
        },
    ]
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let (tx, rx) = mpsc::unbounded_channel();
    let calc = StockDateCalculator::default();
    let scheduler = AlarmScheduler::new(
        Arc::new(TokioTimers::new(tx.clone())),
        Arc::new(TcpConnectivity::new(
            "127.0.0.1:9".into(),
            Duration::from_secs(1),
            tx.clone(),
        )),
        calc,
    )
    .with_retry_after(chrono::Duration::seconds(1));
    let fetcher = Arc::new(ScriptedFetcher {
        events: tx.clone(),
        primary_calls: AtomicUsize::new(0),
    });

    let coordinator = FetchCoordinator::new(
        calc,
        scheduler,
        fetcher,
        Arc::new(StaticLocations(demo_locations())),
        Arc::new(NotifierMux::new(vec![])),
    );
    let (mut worker, mut status) = Worker::new(coordinator, rx, None);
    worker
        .boot(BootOptions {
            alarm_enabled: true,
            fetch_on_boot: true,
        })
        .await;
    let task = worker.spawn();

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let state = status.borrow_and_update().state;
            println!("{} state: {state}", Utc::now().format("%H:%M:%S%.3f"));
            if matches!(state, CycleState::Done | CycleState::Failed) {
                return state;
            }
            if status.changed().await.is_err() {
                return state;
            }
        }
    })
    .await;

    task.abort();
    match finished {
        Ok(state) => println!("cycle-demo done: {state}"),
        Err(_) => println!("cycle-demo timed out"),
    }
}
