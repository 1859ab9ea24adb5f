use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

use crate::coordinator::{StartCause, Trigger};
use crate::state::CoordinatorSnapshot;
use crate::worker::Event;

#[derive(Clone)]
pub struct ApiState {
    status: watch::Receiver<CoordinatorSnapshot>,
    events: UnboundedSender<Event>,
}

impl ApiState {
    pub fn new(status: watch::Receiver<CoordinatorSnapshot>, events: UnboundedSender<Event>) -> Self {
        Self { status, events }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/kick", post(kick))
        .route("/alarm/on", post(alarm_on))
        .route("/alarm/off", post(alarm_off))
        .with_state(state)
}

async fn status(State(state): State<ApiState>) -> Json<CoordinatorSnapshot> {
    Json(state.status.borrow().clone())
}

fn enqueue(state: &ApiState, event: Event) -> StatusCode {
    match state.events.send(event) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn kick(State(state): State<ApiState>) -> StatusCode {
    enqueue(&state, Event::Trigger(Trigger::Start(StartCause::Manual)))
}

async fn alarm_on(State(state): State<ApiState>) -> StatusCode {
    enqueue(&state, Event::AlarmOn)
}

async fn alarm_off(State(state): State<ApiState>) -> StatusCode {
    enqueue(&state, Event::AlarmOff)
}
