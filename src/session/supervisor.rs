//! Session supervisor
//!
//! One loop per engine run: every tick it checks the slot, reaps a dead
//! session and dials a replacement. There is no back-off beyond the tick.

use super::{Session, SessionSlot};
use crate::masquerade::TrafficCounters;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const RETRY_INTERVAL: Duration = Duration::from_secs(3);

pub(crate) async fn run(
    slot: Arc<SessionSlot>,
    server: String,
    password: String,
    counters: Arc<TrafficCounters>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(RETRY_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => {}
        }
        if *stop.borrow() {
            return;
        }
        if !slot.reap() {
            continue;
        }
        match Session::establish(&server, &password, Arc::clone(&counters)).await {
            Ok(session) => {
                // A stop may have landed while the dial was in flight; the
                // session must not outlive it.
                if *stop.borrow() {
                    session.close();
                    return;
                }
                info!(server = %server, "tunnel session established");
                slot.publish(session);
            }
            Err(e) => warn!("session dial failed: {e}"),
        }
    }
}
