//! Periodic sweep that deletes registrations idle longer than `reclaimDays`,
//! skipping anything currently waiting or paired.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use relay_protocol::log;
use relay_protocol::system::trigger::Trigger;

use crate::state::BrokerState;
use crate::store::RegistrationStore;

pub async fn run(
    store: Arc<RegistrationStore>,
    state: Arc<BrokerState>,
    reclaim_days: i64,
    sweep_interval: Duration,
    stop: Trigger,
) {
    let mut interval = tokio::time::interval(sweep_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stop.wait_async() => break,
            _ = interval.tick() => sweep_once(&store, &state, reclaim_days).await,
        }
    }
}

async fn sweep_once(store: &Arc<RegistrationStore>, state: &Arc<BrokerState>, reclaim_days: i64) {
    let mut protected = state.waiting_usernames();
    protected.extend(state.paired_usernames());

    let cutoff = Utc::now() - TimeDelta::days(reclaim_days);
    let store = store.clone();
    match tokio::task::spawn_blocking(move || store.reclaim_stale(cutoff, &protected)).await {
        Ok(Ok(removed)) if removed > 0 => {
            log::info!("reclaimed {removed} stale registration(s)");
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::error!("registration reclamation failed: {e}"),
        Err(e) => log::error!("registration reclamation task panicked: {e}"),
    }
}
