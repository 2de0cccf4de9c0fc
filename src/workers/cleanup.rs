//! Reservation cleanup worker.
//!
//! Periodically sweeps Active reservations whose TTL has lapsed into the
//! Expired state. The sweep is a single conditional UPDATE and never touches
//! product or batch quantities - expired holds were never decremented from
//! stock, so expiry only removes their contribution to the reserved total.

use crate::{
    core::{clock::Clock, reservation},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Background loop expiring stale reservations on a fixed interval.
pub struct ReservationCleanupWorker {
    db: Arc<DatabaseConnection>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ReservationCleanupWorker {
    /// Creates a worker; call [`spawn`](Self::spawn) to start it.
    pub fn new(
        db: Arc<DatabaseConnection>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            clock,
            poll_interval,
            shutdown,
        }
    }

    /// Runs one sweep immediately; the loop calls this every tick and tests
    /// call it directly.
    pub async fn sweep_once(&self) -> Result<u64> {
        reservation::expire_due_reservations(self.db.as_ref(), self.clock.now()).await
    }

    /// Spawns the periodic loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "reservation cleanup worker started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => debug!("cleanup sweep found nothing to expire"),
                        Ok(count) => debug!(count, "cleanup sweep expired reservations"),
                        Err(e) => error!("cleanup sweep failed: {e}"),
                    }
                }
                changed = self.shutdown.changed() => {
                    // A dropped sender counts as shutdown too.
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("reservation cleanup worker stopped");
    }
}
