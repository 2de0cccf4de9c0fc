//! Database configuration module for `Stockroom`.
//!
//! This module handles `SQLite` database connection and table creation using
//! `SeaORM`. Tables are generated from the entity definitions via
//! `Schema::create_table_from_entity`, so the schema always matches the Rust
//! structs. On top of that it installs the storage-level guards the entity
//! derive cannot express: unique indexes for the natural keys and triggers
//! that abort any write driving a product or batch quantity negative -
//! defense in depth behind the application-level checks.

use crate::entities::{
    Batch, Product, QueueItem, Reservation, ReservationBatchAllocation, ReservationLine, batch,
    product, queue_item, reservation_batch_allocation, reservation_line,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a default local `SQLite` file if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://data/stockroom.sqlite".to_string())
}

/// Establishes a connection to the `SQLite` database.
pub async fn create_connection() -> Result<DatabaseConnection> {
    Database::connect(get_database_url())
        .await
        .map_err(Into::into)
}

/// Creates all tables, indexes and integrity triggers.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    // Create tables using SeaORM's schema generation
    let product_table = schema.create_table_from_entity(Product);
    let batch_table = schema.create_table_from_entity(Batch);
    let reservation_table = schema.create_table_from_entity(Reservation);
    let reservation_line_table = schema.create_table_from_entity(ReservationLine);
    let allocation_table = schema.create_table_from_entity(ReservationBatchAllocation);
    let queue_item_table = schema.create_table_from_entity(QueueItem);

    db.execute(builder.build(&product_table)).await?;
    db.execute(builder.build(&batch_table)).await?;
    db.execute(builder.build(&reservation_table)).await?;
    db.execute(builder.build(&reservation_line_table)).await?;
    db.execute(builder.build(&allocation_table)).await?;
    db.execute(builder.build(&queue_item_table)).await?;

    create_indexes(db).await?;
    create_quantity_guards(db).await?;
    Ok(())
}

/// Unique natural keys and the lookup indexes the workers lean on.
async fn create_indexes(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();

    let product_key = Index::create()
        .name("idx_products_item_warehouse")
        .table(Product)
        .col(product::Column::ItemCode)
        .col(product::Column::WarehouseCode)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&product_key)).await?;

    let batch_key = Index::create()
        .name("idx_batches_product_number")
        .table(Batch)
        .col(batch::Column::ProductId)
        .col(batch::Column::BatchNumber)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&batch_key)).await?;

    let allocation_scope = Index::create()
        .name("idx_allocations_item_warehouse")
        .table(ReservationBatchAllocation)
        .col(reservation_batch_allocation::Column::ItemCode)
        .col(reservation_batch_allocation::Column::WarehouseCode)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&allocation_scope)).await?;

    let line_reservation = Index::create()
        .name("idx_reservation_lines_reservation")
        .table(ReservationLine)
        .col(reservation_line::Column::ReservationId)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&line_reservation)).await?;

    let queue_due = Index::create()
        .name("idx_queue_items_status_retry")
        .table(QueueItem)
        .col(queue_item::Column::Status)
        .col(queue_item::Column::NextRetryAt)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&queue_due)).await?;

    Ok(())
}

/// `SQLite` cannot add CHECK constraints to generated tables after the fact;
/// triggers provide the same storage-level guarantee that quantities never go
/// negative, whatever SQL reaches the file.
async fn create_quantity_guards(db: &DatabaseConnection) -> Result<()> {
    db.execute_unprepared(
        "CREATE TRIGGER IF NOT EXISTS trg_products_quantities_non_negative_update
         BEFORE UPDATE ON products
         FOR EACH ROW
         WHEN NEW.quantity_on_hand < 0
           OR NEW.quantity_on_supplier_order < 0
           OR NEW.quantity_on_customer_order < 0
         BEGIN
           SELECT RAISE(ABORT, 'product quantity must not go negative');
         END;",
    )
    .await?;

    db.execute_unprepared(
        "CREATE TRIGGER IF NOT EXISTS trg_products_quantities_non_negative_insert
         BEFORE INSERT ON products
         FOR EACH ROW
         WHEN NEW.quantity_on_hand < 0
           OR NEW.quantity_on_supplier_order < 0
           OR NEW.quantity_on_customer_order < 0
         BEGIN
           SELECT RAISE(ABORT, 'product quantity must not go negative');
         END;",
    )
    .await?;

    db.execute_unprepared(
        "CREATE TRIGGER IF NOT EXISTS trg_batches_quantity_non_negative_update
         BEFORE UPDATE ON batches
         FOR EACH ROW
         WHEN NEW.quantity < 0
         BEGIN
           SELECT RAISE(ABORT, 'batch quantity must not go negative');
         END;",
    )
    .await?;

    db.execute_unprepared(
        "CREATE TRIGGER IF NOT EXISTS trg_batches_quantity_non_negative_insert
         BEFORE INSERT ON batches
         FOR EACH ROW
         WHEN NEW.quantity < 0
         BEGIN
           SELECT RAISE(ABORT, 'batch quantity must not go negative');
         END;",
    )
    .await?;

    Ok(())
}
