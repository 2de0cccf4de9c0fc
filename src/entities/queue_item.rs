//! Queue item entity - A document awaiting submission to the ERP.
//!
//! Queue items are owned exclusively by the posting queue and its worker.
//! Claiming flips `Pending` to `Processing` with a conditional UPDATE so two
//! worker passes can never pick up the same item.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "queue_item_status")]
pub enum QueueItemStatus {
    /// Waiting for submission (or for its retry moment)
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Claimed by the posting worker; submission in flight
    #[sea_orm(string_value = "processing")]
    Processing,
    /// Accepted by the ERP (terminal)
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Retries exhausted or document rejected; needs operator attention
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Withdrawn by an operator before submission (terminal)
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Queue item database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_items")]
pub struct Model {
    /// Unique identifier for the queue item
    #[sea_orm(primary_key)]
    pub id: i64,
    /// ERP document type (e.g., "invoice", "stock_transfer")
    pub transaction_type: String,
    /// Serialized document payload (JSON)
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    /// Current lifecycle state
    pub status: QueueItemStatus,
    /// Transient failures recorded so far; never exceeds `max_retries`
    pub retry_count: i32,
    /// Retry budget before the item goes `Failed`
    pub max_retries: i32,
    /// Message from the most recent failed submission
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    /// Document id assigned by the ERP on successful posting
    pub external_doc_id: Option<String>,
    /// Higher priority items are submitted first
    pub priority: i32,
    /// When the item was enqueued
    pub created_at: DateTimeUtc,
    /// Earliest moment the next submission attempt may run
    pub next_retry_at: DateTimeUtc,
    /// When the item reached a terminal state
    pub processed_at: Option<DateTimeUtc>,
}

/// Queue items relate to nothing; the payload carries everything the ERP needs
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
