//! Core business logic - framework-agnostic inventory operations.
//!
//! Everything that mutates stock funnels through here: the keyed lock scopes
//! mutations to one (item, warehouse) pair, the allocator turns requested
//! quantities into batch-level plans and commits them, the reservation
//! manager layers time-bounded holds on top, and the posting queue records
//! committed documents for the background worker to deliver.

/// Batch allocation planning and committing under FIFO/FEFO/explicit policy
pub mod allocation;
/// Injectable time source for TTL and backoff arithmetic
pub mod clock;
/// Per-key mutual exclusion for (item, warehouse) pairs
pub mod keyed_lock;
/// Abstract ERP document submission seam
pub mod poster;
/// Durable queue of documents awaiting ERP submission
pub mod posting;
/// Reserved-quantity aggregation and availability queries
pub mod reserved;
/// Creation, commit, release and expiry of reservations
pub mod reservation;
