//! Product entity - Stock position of one item in one warehouse.
//!
//! A product row is the unit of locking: every mutation of its quantities (and
//! of its batches) happens while holding the keyed lock for the
//! (`item_code`, `warehouse_code`) pair. All three quantity columns must stay
//! non-negative at all times; the application guards every decrement and the
//! database backs it up with a trigger installed at table-creation time.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Batch selection policy applied when the caller does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "allocation_policy")]
pub enum AllocationPolicy {
    /// Allocate from the batch admitted earliest first
    #[sea_orm(string_value = "fifo")]
    Fifo,
    /// Allocate from the batch expiring soonest first (perishables)
    #[sea_orm(string_value = "fefo")]
    Fefo,
}

/// Product database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Unique identifier for the product row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Item code as known to the ERP (e.g., "ITM1")
    pub item_code: String,
    /// Warehouse the stock position belongs to
    pub warehouse_code: String,
    /// Physical stock currently on the shelf; never negative
    pub quantity_on_hand: f64,
    /// Quantity ordered from suppliers, not yet admitted; never negative
    pub quantity_on_supplier_order: f64,
    /// Quantity promised to customer orders; never negative
    pub quantity_on_customer_order: f64,
    /// Default batch selection policy for this item
    pub allocation_policy: AllocationPolicy,
    /// Soft delete flag - if true, product is hidden but data is preserved
    pub is_deleted: bool,
    /// When the product row was created
    pub created_at: DateTimeUtc,
    /// When the product row was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Product and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each product owns the batches its stock is held in
    #[sea_orm(has_many = "super::batch::Entity")]
    Batch,
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
