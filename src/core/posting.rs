//! Durable queue of documents awaiting ERP submission.
//!
//! Committed documents are recorded here in the same transaction that
//! committed the stock movement, so an unreachable ERP can never lose a
//! document - the posting worker drains the queue whenever connectivity
//! allows. Claiming flips items to `Processing` with a conditional update,
//! making each item single-owner even if two worker passes overlap.

use crate::{
    entities::{QueueItem, QueueItemStatus, queue_item},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::Expr,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retry budget for a queue item.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Bounded exponential backoff for transient submission failures.
///
/// `delay_for_attempt(0)` is the wait before the first retry; each further
/// attempt doubles the delay until `max_delay` caps it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: i32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the default settings.
    ///
    /// Defaults:
    /// - `max_retries`: 3
    /// - `base_delay`: 5 seconds
    /// - `max_delay`: 300 seconds
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the cap on the exponential delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Retry budget before an item goes `Failed`.
    #[must_use]
    pub const fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Delay for a given attempt number (0-indexed):
    /// `min(base_delay * 2^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(62) as i32);
        Duration::from_secs_f64(exponential.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Enqueues a document for eventual ERP submission.
///
/// Runs against whatever connection the caller provides so document commit
/// and enqueue can share one transaction.
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    transaction_type: &str,
    payload: &serde_json::Value,
    priority: i32,
) -> Result<queue_item::Model> {
    if transaction_type.trim().is_empty() {
        return Err(Error::Validation {
            message: "transaction type cannot be empty".to_string(),
        });
    }
    let payload = serde_json::to_string(payload).map_err(|e| Error::Validation {
        message: format!("payload is not serializable: {e}"),
    })?;

    let created = queue_item::ActiveModel {
        transaction_type: Set(transaction_type.to_string()),
        payload: Set(payload),
        status: Set(QueueItemStatus::Pending),
        retry_count: Set(0),
        max_retries: Set(DEFAULT_MAX_RETRIES),
        last_error: Set(None),
        external_doc_id: Set(None),
        priority: Set(priority),
        created_at: Set(now),
        next_retry_at: Set(now),
        processed_at: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    info!(
        queue_item_id = created.id,
        transaction_type, priority, "document enqueued for posting"
    );
    Ok(created)
}

/// Claims up to `limit` due Pending items for processing.
///
/// Items are ordered by priority (highest first) then age (oldest first).
/// Each claim is a conditional Pending -> Processing update; an item another
/// pass claimed in between is simply skipped.
pub async fn claim_due<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    limit: u64,
) -> Result<Vec<queue_item::Model>> {
    let due = QueueItem::find()
        .filter(queue_item::Column::Status.eq(QueueItemStatus::Pending))
        .filter(queue_item::Column::NextRetryAt.lte(now))
        .order_by_desc(queue_item::Column::Priority)
        .order_by_asc(queue_item::Column::CreatedAt)
        .limit(limit)
        .all(conn)
        .await?;

    let mut claimed = Vec::with_capacity(due.len());
    for item in due {
        let flipped = QueueItem::update_many()
            .col_expr(
                queue_item::Column::Status,
                Expr::value(QueueItemStatus::Processing),
            )
            .filter(queue_item::Column::Id.eq(item.id))
            .filter(queue_item::Column::Status.eq(QueueItemStatus::Pending))
            .exec(conn)
            .await?;
        if flipped.rows_affected == 1 {
            claimed.push(queue_item::Model {
                status: QueueItemStatus::Processing,
                ..item
            });
        } else {
            debug!(queue_item_id = item.id, "item claimed by another pass; skipping");
        }
    }
    Ok(claimed)
}

/// Records a successful submission.
pub async fn mark_completed<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    queue_item_id: i64,
    external_doc_id: &str,
) -> Result<()> {
    QueueItem::update_many()
        .col_expr(
            queue_item::Column::Status,
            Expr::value(QueueItemStatus::Completed),
        )
        .col_expr(
            queue_item::Column::ExternalDocId,
            Expr::value(Some(external_doc_id.to_string())),
        )
        .col_expr(queue_item::Column::ProcessedAt, Expr::value(Some(now)))
        .filter(queue_item::Column::Id.eq(queue_item_id))
        .filter(queue_item::Column::Status.eq(QueueItemStatus::Processing))
        .exec(conn)
        .await?;
    info!(queue_item_id, external_doc_id, "document posted to ERP");
    Ok(())
}

/// Records a transient submission failure and either schedules a retry or,
/// with the budget exhausted, fails the item for operator attention.
///
/// Returns the status the item ended up in.
pub async fn record_transient_failure<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    queue_item_id: i64,
    error_message: &str,
    policy: &RetryPolicy,
) -> Result<QueueItemStatus> {
    let item = QueueItem::find_by_id(queue_item_id)
        .one(conn)
        .await?
        .ok_or(Error::QueueItemNotFound { id: queue_item_id })?;

    let retry_count = item.retry_count + 1;
    if retry_count < item.max_retries {
        let delay = policy.delay_for_attempt(retry_count.saturating_sub(1).unsigned_abs());
        let next_retry_at =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        QueueItem::update_many()
            .col_expr(
                queue_item::Column::Status,
                Expr::value(QueueItemStatus::Pending),
            )
            .col_expr(queue_item::Column::RetryCount, Expr::value(retry_count))
            .col_expr(
                queue_item::Column::LastError,
                Expr::value(Some(error_message.to_string())),
            )
            .col_expr(queue_item::Column::NextRetryAt, Expr::value(next_retry_at))
            .filter(queue_item::Column::Id.eq(queue_item_id))
            .exec(conn)
            .await?;
        warn!(
            queue_item_id,
            retry_count,
            next_retry_at = %next_retry_at,
            error = error_message,
            "transient posting failure; retry scheduled"
        );
        Ok(QueueItemStatus::Pending)
    } else {
        QueueItem::update_many()
            .col_expr(
                queue_item::Column::Status,
                Expr::value(QueueItemStatus::Failed),
            )
            .col_expr(queue_item::Column::RetryCount, Expr::value(retry_count))
            .col_expr(
                queue_item::Column::LastError,
                Expr::value(Some(error_message.to_string())),
            )
            .col_expr(queue_item::Column::ProcessedAt, Expr::value(Some(now)))
            .filter(queue_item::Column::Id.eq(queue_item_id))
            .exec(conn)
            .await?;
        warn!(
            queue_item_id,
            retry_count, error = error_message,
            "retries exhausted; item failed and needs operator attention"
        );
        Ok(QueueItemStatus::Failed)
    }
}

/// Records a non-transient rejection: the ERP will never accept this
/// document, so it fails immediately without consuming retries.
pub async fn record_rejection<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    queue_item_id: i64,
    error_message: &str,
) -> Result<()> {
    QueueItem::update_many()
        .col_expr(
            queue_item::Column::Status,
            Expr::value(QueueItemStatus::Failed),
        )
        .col_expr(
            queue_item::Column::LastError,
            Expr::value(Some(error_message.to_string())),
        )
        .col_expr(queue_item::Column::ProcessedAt, Expr::value(Some(now)))
        .filter(queue_item::Column::Id.eq(queue_item_id))
        .exec(conn)
        .await?;
    warn!(queue_item_id, error = error_message, "document rejected by ERP");
    Ok(())
}

/// Withdraws a Pending item before submission (operator surface).
pub async fn cancel<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    queue_item_id: i64,
) -> Result<()> {
    let flipped = QueueItem::update_many()
        .col_expr(
            queue_item::Column::Status,
            Expr::value(QueueItemStatus::Cancelled),
        )
        .col_expr(queue_item::Column::ProcessedAt, Expr::value(Some(now)))
        .filter(queue_item::Column::Id.eq(queue_item_id))
        .filter(queue_item::Column::Status.eq(QueueItemStatus::Pending))
        .exec(conn)
        .await?;

    if flipped.rows_affected == 0 {
        let item = QueueItem::find_by_id(queue_item_id)
            .one(conn)
            .await?
            .ok_or(Error::QueueItemNotFound { id: queue_item_id })?;
        return Err(Error::Validation {
            message: format!(
                "only pending items can be cancelled; item {queue_item_id} is {}",
                item.status
            ),
        });
    }
    info!(queue_item_id, "queue item cancelled");
    Ok(())
}

/// Puts a terminally Failed item back in the queue with a fresh retry budget
/// (operator surface, after the underlying fault is fixed).
pub async fn retry_failed<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    queue_item_id: i64,
) -> Result<()> {
    let flipped = QueueItem::update_many()
        .col_expr(
            queue_item::Column::Status,
            Expr::value(QueueItemStatus::Pending),
        )
        .col_expr(queue_item::Column::RetryCount, Expr::value(0))
        .col_expr(queue_item::Column::NextRetryAt, Expr::value(now))
        .col_expr(
            queue_item::Column::ProcessedAt,
            Expr::value(None::<DateTime<Utc>>),
        )
        .filter(queue_item::Column::Id.eq(queue_item_id))
        .filter(queue_item::Column::Status.eq(QueueItemStatus::Failed))
        .exec(conn)
        .await?;

    if flipped.rows_affected == 0 {
        let item = QueueItem::find_by_id(queue_item_id)
            .one(conn)
            .await?
            .ok_or(Error::QueueItemNotFound { id: queue_item_id })?;
        return Err(Error::Validation {
            message: format!(
                "only failed items can be re-driven; item {queue_item_id} is {}",
                item.status
            ),
        });
    }
    info!(queue_item_id, "failed queue item re-driven");
    Ok(())
}

/// Returns all items in the given status, oldest first (dashboard surface).
pub async fn find_by_status<C: ConnectionTrait>(
    conn: &C,
    status: QueueItemStatus,
) -> Result<Vec<queue_item::Model>> {
    QueueItem::find()
        .filter(queue_item::Column::Status.eq(status))
        .order_by_asc(queue_item::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(Into::into)
}
