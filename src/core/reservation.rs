//! Reservation lifecycle - time-bounded holds for externally-originated sales.
//!
//! A reservation proves feasibility at creation time (planning only, nothing
//! decremented), counts against availability while Active, and converts into
//! an actual stock deduction only at commit. The status column is the single
//! source of truth for every race: create/commit/release/expire all transition
//! it with conditional updates, so the losing side of a race observes a
//! lifecycle error and never double-applies stock effects.

use crate::{
    core::{
        allocation::{self, AllocationPlan, AllocationStrategy, BatchAllocation, BatchSpec},
        clock::Clock,
        keyed_lock::{KeyedLock, LockKey},
        posting,
    },
    entities::{
        Reservation, ReservationBatchAllocation, ReservationLine, ReservationStatus, reservation,
        reservation_batch_allocation, reservation_line,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One requested line of a reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationLineRequest {
    /// Item to hold
    pub item_code: String,
    /// Warehouse to hold it in
    pub warehouse_code: String,
    /// Quantity to hold; always positive
    pub quantity: f64,
    /// Unit price quoted by the originating system; never negative
    pub unit_price: f64,
    /// Caller-chosen batches; `None` lets the product's policy pick
    pub batches: Option<Vec<BatchSpec>>,
}

/// A request to create a reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    /// Idempotency key from the originating system
    pub external_ref: String,
    /// Tag of the originating system (e.g., "pos")
    pub source_system: String,
    /// Customer or loyalty-card code, when known
    pub customer_code: Option<String>,
    /// How long the hold lives before the cleanup worker reclaims it;
    /// `None` applies the configured default
    pub ttl: Option<Duration>,
    /// Lines to hold
    pub lines: Vec<ReservationLineRequest>,
}

/// Reference to the document produced by committing a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedDocument {
    /// The committed reservation
    pub reservation_id: i64,
    /// The queue item that will carry the document to the ERP
    pub queue_item_id: i64,
}

/// ERP document type used for committed reservations.
const RESERVATION_DOCUMENT_TYPE: &str = "invoice";

/// Manager for creating, committing, releasing and expiring reservations.
pub struct ReservationManager {
    db: Arc<DatabaseConnection>,
    locks: Arc<KeyedLock>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    default_ttl: Duration,
}

impl ReservationManager {
    /// Creates a manager over the given connection and lock registry.
    pub fn new(
        db: Arc<DatabaseConnection>,
        locks: Arc<KeyedLock>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
        default_ttl: Duration,
    ) -> Self {
        Self {
            db,
            locks,
            clock,
            lock_timeout,
            default_ttl,
        }
    }

    /// Creates an Active reservation after proving every line is satisfiable.
    ///
    /// Idempotent on `external_ref`: a repeated create returns the existing
    /// reservation instead of taking a second hold. Planning runs under the
    /// sorted locks of every line's (item, warehouse) key; nothing is
    /// decremented - the hold only exists as rows the aggregator counts.
    pub async fn create(&self, request: ReservationRequest) -> Result<reservation::Model> {
        validate_request(&request)?;

        if let Some(existing) = self.get_by_external_ref(&request.external_ref).await? {
            info!(
                external_ref = %request.external_ref,
                reservation_id = existing.id,
                "reservation create replayed; returning existing hold"
            );
            return Ok(existing);
        }

        let keys: Vec<LockKey> = request
            .lines
            .iter()
            .map(|line| LockKey::new(line.item_code.clone(), line.warehouse_code.clone()))
            .collect();
        let _guards = self.locks.acquire_many(&keys, self.lock_timeout).await?;

        let now = self.clock.now();
        let ttl = request.ttl.unwrap_or(self.default_ttl);
        let expires_at = now
            + chrono::Duration::from_std(ttl).map_err(|e| Error::Validation {
                message: format!("reservation ttl out of range: {e}"),
            })?;

        let txn = self.db.begin().await?;

        // Re-check under the transaction: the pre-check above ran without locks.
        if let Some(existing) = find_by_external_ref(&txn, &request.external_ref).await? {
            txn.commit().await?;
            return Ok(existing);
        }

        // Plan every line first; an overlay per (item, warehouse) carries the
        // earlier lines' takes so one request cannot double-spend its own units.
        let mut overlays: HashMap<(String, String), HashMap<String, f64>> = HashMap::new();
        let mut plans: Vec<AllocationPlan> = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let scope = (line.item_code.clone(), line.warehouse_code.clone());
            let overlay = overlays.entry(scope).or_default();
            let strategy = line
                .batches
                .clone()
                .map(AllocationStrategy::Explicit);
            let plan = allocation::plan_allocation_with_overlay(
                &txn,
                now,
                &line.item_code,
                &line.warehouse_code,
                line.quantity,
                strategy,
                Some(overlay),
            )
            .await?;
            for taken in &plan.allocations {
                *overlay.entry(taken.batch_number.clone()).or_insert(0.0) += taken.quantity;
            }
            plans.push(plan);
        }

        let total_value: f64 = request
            .lines
            .iter()
            .map(|line| line.quantity * line.unit_price)
            .sum();

        let created = reservation::ActiveModel {
            external_ref: Set(request.external_ref.clone()),
            source_system: Set(request.source_system.clone()),
            customer_code: Set(request.customer_code.clone()),
            total_value: Set(total_value),
            status: Set(ReservationStatus::Active),
            created_at: Set(now),
            expires_at: Set(expires_at),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for (index, (line, plan)) in request.lines.iter().zip(&plans).enumerate() {
            let line_index = i32::try_from(index).map_err(|_| Error::Validation {
                message: "too many reservation lines".to_string(),
            })?;
            reservation_line::ActiveModel {
                reservation_id: Set(created.id),
                line_index: Set(line_index),
                item_code: Set(line.item_code.clone()),
                warehouse_code: Set(line.warehouse_code.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.quantity * line.unit_price),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            for taken in &plan.allocations {
                reservation_batch_allocation::ActiveModel {
                    reservation_id: Set(created.id),
                    line_index: Set(line_index),
                    item_code: Set(line.item_code.clone()),
                    warehouse_code: Set(line.warehouse_code.clone()),
                    batch_number: Set(taken.batch_number.clone()),
                    quantity: Set(taken.quantity),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;

        info!(
            reservation_id = created.id,
            external_ref = %created.external_ref,
            lines = request.lines.len(),
            expires_at = %created.expires_at,
            "reservation created"
        );
        Ok(created)
    }

    /// Commits a reservation: converts the hold into an actual stock
    /// deduction and enqueues the resulting document for ERP posting.
    ///
    /// Stock decrements, the status flip and the enqueue share one
    /// transaction under the line locks, so either all of it happened or
    /// none of it did.
    pub async fn commit(&self, reservation_id: i64) -> Result<CommittedDocument> {
        let found = Reservation::find_by_id(reservation_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(Error::ReservationNotFound { id: reservation_id })?;

        let lines = ReservationLine::find()
            .filter(reservation_line::Column::ReservationId.eq(found.id))
            .order_by_asc(reservation_line::Column::LineIndex)
            .all(self.db.as_ref())
            .await?;

        let keys: Vec<LockKey> = lines
            .iter()
            .map(|line| LockKey::new(line.item_code.clone(), line.warehouse_code.clone()))
            .collect();
        let _guards = self.locks.acquire_many(&keys, self.lock_timeout).await?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        // Fresh read under the transaction; the earlier read was advisory.
        let current = Reservation::find_by_id(reservation_id)
            .one(&txn)
            .await?
            .ok_or(Error::ReservationNotFound { id: reservation_id })?;
        if current.status != ReservationStatus::Active {
            return Err(Error::AlreadyTerminal {
                id: reservation_id,
                status: current.status.to_string(),
            });
        }
        if current.expires_at <= now {
            // The cleanup worker may not have swept it yet; committing an
            // overdue hold is still refused.
            return Err(Error::ReservationExpired { id: reservation_id });
        }

        // Re-apply the stored batch allocations as stock decrements, grouped
        // per (item, warehouse).
        let held = ReservationBatchAllocation::find()
            .filter(reservation_batch_allocation::Column::ReservationId.eq(found.id))
            .all(&txn)
            .await?;
        let mut grouped: HashMap<(String, String), Vec<BatchAllocation>> = HashMap::new();
        for row in held {
            grouped
                .entry((row.item_code.clone(), row.warehouse_code.clone()))
                .or_default()
                .push(BatchAllocation {
                    batch_number: row.batch_number,
                    quantity: row.quantity,
                });
        }
        for ((item_code, warehouse_code), allocations) in grouped {
            let total: f64 = allocations.iter().map(|a| a.quantity).sum();
            let plan = AllocationPlan {
                item_code,
                warehouse_code,
                requested_quantity: total,
                allocations,
            };
            allocation::apply_allocation(&txn, now, &plan).await?;
        }

        // The conditional flip is the race arbiter: zero rows affected means
        // another transition landed first and everything above rolls back.
        let flipped = Reservation::update_many()
            .col_expr(
                reservation::Column::Status,
                Expr::value(ReservationStatus::Committed),
            )
            .filter(reservation::Column::Id.eq(reservation_id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .exec(&txn)
            .await?;
        if flipped.rows_affected == 0 {
            warn!(reservation_id, "lost the commit race; rolling back");
            return Err(lifecycle_error(&txn, reservation_id).await?);
        }

        let payload = serde_json::json!({
            "reservation_id": current.id,
            "external_ref": current.external_ref,
            "source_system": current.source_system,
            "customer_code": current.customer_code,
            "total_value": current.total_value,
            "lines": lines.iter().map(|line| serde_json::json!({
                "item_code": line.item_code,
                "warehouse_code": line.warehouse_code,
                "quantity": line.quantity,
                "unit_price": line.unit_price,
                "line_total": line.line_total,
            })).collect::<Vec<_>>(),
        });
        let queued =
            posting::enqueue(&txn, now, RESERVATION_DOCUMENT_TYPE, &payload, 0).await?;

        txn.commit().await?;

        info!(
            reservation_id,
            queue_item_id = queued.id,
            "reservation committed and document enqueued"
        );
        Ok(CommittedDocument {
            reservation_id,
            queue_item_id: queued.id,
        })
    }

    /// Releases an Active reservation, freeing its held units.
    ///
    /// No stock mutation happens: the hold never decremented anything, so
    /// release only removes its contribution to the aggregator's total.
    pub async fn release(&self, reservation_id: i64) -> Result<()> {
        let flipped = Reservation::update_many()
            .col_expr(
                reservation::Column::Status,
                Expr::value(ReservationStatus::Released),
            )
            .filter(reservation::Column::Id.eq(reservation_id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .exec(self.db.as_ref())
            .await?;

        if flipped.rows_affected == 0 {
            return Err(lifecycle_error(self.db.as_ref(), reservation_id).await?);
        }
        info!(reservation_id, "reservation released");
        Ok(())
    }

    /// Looks a reservation up by id.
    pub async fn get(&self, reservation_id: i64) -> Result<Option<reservation::Model>> {
        Reservation::find_by_id(reservation_id)
            .one(self.db.as_ref())
            .await
            .map_err(Into::into)
    }

    /// Looks a reservation up by its external idempotency key.
    pub async fn get_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<reservation::Model>> {
        find_by_external_ref(self.db.as_ref(), external_ref).await
    }

    /// Returns the lines of a reservation in order.
    pub async fn get_lines(&self, reservation_id: i64) -> Result<Vec<reservation_line::Model>> {
        ReservationLine::find()
            .filter(reservation_line::Column::ReservationId.eq(reservation_id))
            .order_by_asc(reservation_line::Column::LineIndex)
            .all(self.db.as_ref())
            .await
            .map_err(Into::into)
    }
}

async fn find_by_external_ref<C: ConnectionTrait>(
    conn: &C,
    external_ref: &str,
) -> Result<Option<reservation::Model>> {
    Reservation::find()
        .filter(reservation::Column::ExternalRef.eq(external_ref))
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Maps a lost status race to the right lifecycle error.
async fn lifecycle_error<C: ConnectionTrait>(conn: &C, reservation_id: i64) -> Result<Error> {
    let current = Reservation::find_by_id(reservation_id)
        .one(conn)
        .await?
        .ok_or(Error::ReservationNotFound { id: reservation_id })?;
    Ok(match current.status {
        ReservationStatus::Expired => Error::ReservationExpired { id: reservation_id },
        status => Error::AlreadyTerminal {
            id: reservation_id,
            status: status.to_string(),
        },
    })
}

fn validate_request(request: &ReservationRequest) -> Result<()> {
    if request.external_ref.trim().is_empty() {
        return Err(Error::Validation {
            message: "external_ref cannot be empty".to_string(),
        });
    }
    if request.lines.is_empty() {
        return Err(Error::Validation {
            message: "reservation must contain at least one line".to_string(),
        });
    }
    for line in &request.lines {
        if !line.quantity.is_finite() || line.quantity <= 0.0 {
            return Err(Error::Validation {
                message: format!(
                    "line quantity for {} must be positive, got {}",
                    line.item_code, line.quantity
                ),
            });
        }
        if !line.unit_price.is_finite() || line.unit_price < 0.0 {
            return Err(Error::Validation {
                message: format!(
                    "unit price for {} must not be negative, got {}",
                    line.item_code, line.unit_price
                ),
            });
        }
    }
    Ok(())
}

/// Expires every Active reservation whose TTL has lapsed.
///
/// A pure state transition: stock was never decremented for these holds, so
/// flipping the status is all it takes to return their units to
/// availability. Safe to run concurrently with commit/release - the
/// conditional update means each reservation is transitioned exactly once.
pub async fn expire_due_reservations<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
) -> Result<u64> {
    let expired = Reservation::update_many()
        .col_expr(
            reservation::Column::Status,
            Expr::value(ReservationStatus::Expired),
        )
        .filter(reservation::Column::Status.eq(ReservationStatus::Active))
        .filter(reservation::Column::ExpiresAt.lt(now))
        .exec(conn)
        .await?;

    if expired.rows_affected > 0 {
        info!(count = expired.rows_affected, "expired stale reservations");
    }
    Ok(expired.rows_affected)
}
