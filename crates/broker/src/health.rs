//! `{uptime, waiting, pairs}` — observational only, never authenticated.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::BrokerState;

#[derive(Clone)]
pub struct HealthState {
    pub broker_state: Arc<BrokerState>,
    pub started_at: Instant,
}

pub async fn health_handler(State(health): State<HealthState>) -> Json<Value> {
    let (waiting, pairs) = health.broker_state.counts();
    Json(json!({
        "uptime": health.started_at.elapsed().as_secs(),
        "waiting": waiting,
        "pairs": pairs,
    }))
}
