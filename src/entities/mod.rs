//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod batch;
pub mod product;
pub mod queue_item;
pub mod reservation;
pub mod reservation_batch_allocation;
pub mod reservation_line;

// Re-export specific types to avoid conflicts
pub use batch::{
    BatchStatus, Column as BatchColumn, Entity as Batch, Model as BatchModel,
};
pub use product::{
    AllocationPolicy, Column as ProductColumn, Entity as Product, Model as ProductModel,
};
pub use queue_item::{
    Column as QueueItemColumn, Entity as QueueItem, Model as QueueItemModel, QueueItemStatus,
};
pub use reservation::{
    Column as ReservationColumn, Entity as Reservation, Model as ReservationModel,
    ReservationStatus,
};
pub use reservation_batch_allocation::{
    Column as ReservationBatchAllocationColumn, Entity as ReservationBatchAllocation,
    Model as ReservationBatchAllocationModel,
};
pub use reservation_line::{
    Column as ReservationLineColumn, Entity as ReservationLine, Model as ReservationLineModel,
};
