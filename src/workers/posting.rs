//! Posting worker - drains the queue toward the ERP.
//!
//! Each tick claims due Pending items (highest priority first) and submits
//! them concurrently, up to the configured limit, each wrapped in a per-call
//! timeout so one stuck submission cannot block the rest of the queue.
//! Submission takes no keyed lock: stock was already committed when the
//! document was enqueued, and the queue guarantees eventual delivery only.

use crate::{
    core::{
        clock::Clock,
        poster::{DocumentPoster, SubmitError},
        posting::{self, RetryPolicy},
    },
    entities::queue_item,
    errors::Result,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Tuning for the posting worker.
#[derive(Debug, Clone)]
pub struct PostingWorkerConfig {
    /// How often the queue is polled for due items
    pub poll_interval: Duration,
    /// Maximum submissions in flight at once
    pub max_concurrent: usize,
    /// Per-call timeout on the document poster; elapsing counts as transient
    pub submit_timeout: Duration,
    /// Backoff applied to transient failures
    pub retry: RetryPolicy,
}

impl Default for PostingWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_concurrent: 4,
            submit_timeout: Duration::from_secs(30),
            retry: RetryPolicy::new(),
        }
    }
}

/// Background loop submitting queued documents to the ERP.
pub struct PostingWorker {
    db: Arc<DatabaseConnection>,
    poster: Arc<dyn DocumentPoster>,
    clock: Arc<dyn Clock>,
    config: PostingWorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl PostingWorker {
    /// Creates a worker; call [`spawn`](Self::spawn) to start it.
    pub fn new(
        db: Arc<DatabaseConnection>,
        poster: Arc<dyn DocumentPoster>,
        clock: Arc<dyn Clock>,
        config: PostingWorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            poster,
            clock,
            config,
            shutdown,
        }
    }

    /// Claims and processes one batch of due items, returning how many were
    /// submitted (successfully or not). The loop calls this every tick and
    /// tests call it directly.
    pub async fn process_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let claimed = posting::claim_due(
            self.db.as_ref(),
            now,
            self.config.max_concurrent as u64,
        )
        .await?;
        if claimed.is_empty() {
            return Ok(0);
        }
        debug!(count = claimed.len(), "processing due queue items");

        let mut in_flight = JoinSet::new();
        for item in claimed {
            let db = Arc::clone(&self.db);
            let poster = Arc::clone(&self.poster);
            let clock = Arc::clone(&self.clock);
            let policy = self.config.retry.clone();
            let submit_timeout = self.config.submit_timeout;
            in_flight.spawn(async move {
                submit_one(&db, poster.as_ref(), clock.as_ref(), &policy, submit_timeout, item)
                    .await
            });
        }

        let mut processed = 0;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(Ok(())) => processed += 1,
                Ok(Err(e)) => error!("queue item processing failed: {e}"),
                Err(e) => error!("submission task panicked: {e}"),
            }
        }
        Ok(processed)
    }

    /// Spawns the periodic loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent,
            "posting worker started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_due().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "posting pass finished"),
                        Err(e) => error!("posting pass failed: {e}"),
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("posting worker stopped");
    }
}

/// Submits a single claimed item and records the outcome.
async fn submit_one(
    db: &DatabaseConnection,
    poster: &dyn DocumentPoster,
    clock: &dyn Clock,
    policy: &RetryPolicy,
    submit_timeout: Duration,
    item: queue_item::Model,
) -> Result<()> {
    let payload: serde_json::Value = match serde_json::from_str(&item.payload) {
        Ok(value) => value,
        Err(e) => {
            // A payload we cannot even parse will never be accepted; fail it
            // without consuming retries.
            warn!(queue_item_id = item.id, "queue item payload is not valid JSON");
            return posting::record_rejection(
                db,
                clock.now(),
                item.id,
                &format!("payload is not valid JSON: {e}"),
            )
            .await;
        }
    };

    let outcome =
        tokio::time::timeout(submit_timeout, poster.submit(&item.transaction_type, &payload))
            .await;
    let now = clock.now();

    match outcome {
        Ok(Ok(external_doc_id)) => {
            posting::mark_completed(db, now, item.id, &external_doc_id).await
        }
        Ok(Err(SubmitError::Rejected(message))) => {
            posting::record_rejection(db, now, item.id, &message).await
        }
        Ok(Err(SubmitError::Transient(message))) => {
            posting::record_transient_failure(db, now, item.id, &message, policy)
                .await
                .map(|_| ())
        }
        Err(_) => {
            posting::record_transient_failure(db, now, item.id, "submission timed out", policy)
                .await
                .map(|_| ())
        }
    }
}
