//! Reservation batch allocation entity - Batch-level units backing a hold.
//!
//! These rows are what the reserved-quantity aggregator sums: while the owning
//! reservation is `Active` and unexpired, each row keeps its quantity out of
//! the availability seen by other allocations.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Reservation batch allocation database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservation_batch_allocations")]
pub struct Model {
    /// Unique identifier for the allocation row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Reservation this allocation belongs to
    pub reservation_id: i64,
    /// Line within the reservation this allocation backs
    pub line_index: i32,
    /// Item code being held
    pub item_code: String,
    /// Warehouse the hold is scoped to
    pub warehouse_code: String,
    /// Batch the units are held in
    pub batch_number: String,
    /// Held quantity; always positive
    pub quantity: f64,
}

/// Defines relationships between ReservationBatchAllocation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each allocation belongs to one reservation
    #[sea_orm(
        belongs_to = "super::reservation::Entity",
        from = "Column::ReservationId",
        to = "super::reservation::Column::Id"
    )]
    Reservation,
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
