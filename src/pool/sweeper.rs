// src/pool/sweeper.rs

use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// Spawns the background quarantine-release sweep.
///
/// Correctness does not depend on this task: `select_key` re-evaluates
/// eligibility against the current clock on every call. The sweep exists so
/// that recoveries show up in logs and in the `/status` snapshot without
/// waiting for the next request.
pub fn spawn(state: Arc<AppState>, sweep_interval: Duration) {
    tokio::spawn(async move {
        let mut timer = interval(sweep_interval);
        // The first tick completes immediately; skip it.
        timer.tick().await;
        loop {
            timer.tick().await;
            let pool = state.pool().await;
            let released = pool.release_quarantine_if_due();
            if released > 0 {
                info!(released, "Quarantine sweep released keys back into rotation");
            } else {
                debug!("Quarantine sweep found nothing to release");
            }
        }
    });

    info!(interval_secs = sweep_interval.as_secs(), "Quarantine sweeper started");
}
