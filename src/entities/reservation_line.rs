//! Reservation line entity - One reserved item/warehouse position.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Reservation line database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservation_lines")]
pub struct Model {
    /// Unique identifier for the line
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Reservation this line belongs to
    pub reservation_id: i64,
    /// Position of the line within the reservation
    pub line_index: i32,
    /// Item code being held
    pub item_code: String,
    /// Warehouse the hold is scoped to
    pub warehouse_code: String,
    /// Reserved quantity; always positive
    pub quantity: f64,
    /// Unit price quoted by the originating system; never negative
    pub unit_price: f64,
    /// Line total (quantity x unit price); never negative
    pub line_total: f64,
}

/// Defines relationships between ReservationLine and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each line belongs to one reservation
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
