//! Batch entity - A dated lot of stock belonging to exactly one product.
//!
//! Batch numbers are unique within a product. FIFO ordering walks batches by
//! (`admission_date`, `batch_number`); FEFO by (`expiry_date`, `batch_number`)
//! with expiry-less batches sorting last. Only `Released` batches are
//! allocatable.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Quality status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "batch_status")]
pub enum BatchStatus {
    /// Released for sale; eligible for allocation
    #[sea_orm(string_value = "released")]
    Released,
    /// Locked by quality control; excluded from allocation
    #[sea_orm(string_value = "locked")]
    Locked,
}

/// Batch database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    /// Unique identifier for the batch
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Product this batch belongs to
    pub product_id: i64,
    /// Batch number, unique within the product
    pub batch_number: String,
    /// Quantity still held in this batch; never negative
    pub quantity: f64,
    /// Quality status gating allocation
    pub status: BatchStatus,
    /// Date the batch was manufactured, when known
    pub manufacturing_date: Option<Date>,
    /// Moment the batch was admitted into the warehouse (FIFO key)
    pub admission_date: DateTimeUtc,
    /// Expiry date, when the item is perishable (FEFO key)
    pub expiry_date: Option<Date>,
    /// When the batch row was created
    pub created_at: DateTimeUtc,
    /// When the batch row was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Batch and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each batch belongs to one product
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
