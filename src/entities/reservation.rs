//! Reservation entity - A time-bounded hold on inventory.
//!
//! Reservations never decrement stock; their batch allocations are counted
//! against availability until the reservation reaches a terminal state.
//! `Committed`, `Released` and `Expired` are terminal and immutable - every
//! transition is a conditional UPDATE filtered on the current status, so
//! whichever writer lands first is authoritative and the loser observes a
//! lifecycle error instead of double-applying stock effects.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "reservation_status")]
pub enum ReservationStatus {
    /// Live hold; counted against availability until `expires_at`
    #[sea_orm(string_value = "active")]
    Active,
    /// Converted into an actual stock deduction (terminal)
    #[sea_orm(string_value = "committed")]
    Committed,
    /// Explicitly cancelled by the originating system (terminal)
    #[sea_orm(string_value = "released")]
    Released,
    /// TTL elapsed before commit; reclaimed by the cleanup worker (terminal)
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl ReservationStatus {
    /// Whether this status is terminal (immutable once reached).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::Released => write!(f, "released"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Reservation database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservations")]
pub struct Model {
    /// Unique identifier for the reservation
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Idempotency key assigned by the originating system
    #[sea_orm(unique)]
    pub external_ref: String,
    /// Tag of the system that created the hold (e.g., "pos")
    pub source_system: String,
    /// Customer or loyalty-card code, when the source supplies one
    pub customer_code: Option<String>,
    /// Total monetary value of the reserved lines; never negative
    pub total_value: f64,
    /// Current lifecycle state
    pub status: ReservationStatus,
    /// When the reservation was created
    pub created_at: DateTimeUtc,
    /// Moment the hold lapses unless committed first
    pub expires_at: DateTimeUtc,
}

/// Defines relationships between Reservation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Ordered set of reserved lines
    #[sea_orm(has_many = "super::reservation_line::Entity")]
    ReservationLine,
    /// Batch-level holds backing the lines
    #[sea_orm(has_many = "super::reservation_batch_allocation::Entity")]
    ReservationBatchAllocation,
}

impl Related<super::reservation_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReservationLine.def()
    }
}

impl Related<super::reservation_batch_allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReservationBatchAllocation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
