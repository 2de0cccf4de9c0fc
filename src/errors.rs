//! Unified error types for the inventory subsystem.
//!
//! The taxonomy matters operationally: validation and stock errors are
//! terminal for the current request, `LockTimeout` is safe for the caller to
//! retry, lifecycle errors mean a race was lost and the operation must be
//! re-created rather than repeated, and transient posting failures are retried
//! by the posting worker rather than surfaced here.

use thiserror::Error;

/// All errors produced by the inventory subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file missing fields or failed to parse.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong while loading configuration
        message: String,
    },

    /// Malformed request: bad quantities, duplicate batch specs, sum mismatch.
    /// Never retried.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the rejected input
        message: String,
    },

    /// Could not acquire the per-item lock within the configured timeout.
    /// Safe to retry; no state was touched.
    #[error("Timed out acquiring inventory lock for {key}")]
    LockTimeout {
        /// The (item, warehouse) key that was contended
        key: String,
    },

    /// No active product exists for the item/warehouse pair.
    #[error("Product {item_code} not found in warehouse {warehouse_code}")]
    ProductNotFound {
        /// Item code that was requested
        item_code: String,
        /// Warehouse the lookup was scoped to
        warehouse_code: String,
    },

    /// An explicitly requested batch does not exist for the product.
    #[error("Batch {batch_number} not found for item {item_code}")]
    BatchNotFound {
        /// Item code the batch was expected under
        item_code: String,
        /// The unknown batch number
        batch_number: String,
    },

    /// True availability (on-hand minus active reservations) cannot cover the
    /// requested quantity. Terminal for this request; the caller must re-decide.
    #[error(
        "Insufficient stock for {item_code} in {warehouse_code}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        /// Item code that was requested
        item_code: String,
        /// Warehouse the allocation was scoped to
        warehouse_code: String,
        /// Quantity the caller asked for
        requested: f64,
        /// Quantity actually available at planning time
        available: f64,
    },

    /// No reservation exists with the given id.
    #[error("Reservation {id} not found")]
    ReservationNotFound {
        /// Reservation primary key
        id: i64,
    },

    /// The reservation's TTL elapsed before it could be committed.
    #[error("Reservation {id} has expired")]
    ReservationExpired {
        /// Reservation primary key
        id: i64,
    },

    /// The reservation already reached a terminal state; terminal states are
    /// immutable and the losing side of a race lands here.
    #[error("Reservation {id} is already {status}")]
    AlreadyTerminal {
        /// Reservation primary key
        id: i64,
        /// The terminal status that was observed
        status: String,
    },

    /// No queue item exists with the given id.
    #[error("Queue item {id} not found")]
    QueueItemNotFound {
        /// Queue item primary key
        id: i64,
    },

    /// Database error from `SeaORM`.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O error, typically while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
