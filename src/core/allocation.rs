//! Batch allocation - turning a requested quantity into batch-level takes.
//!
//! Allocation is split into two halves. Planning is a read-validate step: it
//! computes per-batch availability (batch quantity minus active reservations),
//! walks batches in policy order and returns a plan without touching stored
//! state. Committing applies a plan inside one database transaction, with
//! every decrement guarded so quantities can never go negative; any failure
//! rolls the whole transaction back. Both halves run under the keyed lock for
//! the (item, warehouse) pair, and the lock is held until the transaction is
//! durably committed so no later acquirer can read stale availability.

use crate::{
    core::{
        clock::Clock,
        keyed_lock::{KeyedLock, LockKey},
        reserved,
    },
    entities::{
        AllocationPolicy, Batch, BatchStatus, Product, batch, product,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
    sea_query::Expr,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tolerance for floating-point quantity comparison.
const QTY_EPSILON: f64 = 1e-9;

/// Caller-supplied batch/quantity pair for explicit allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSpec {
    /// Batch the caller wants units taken from
    pub batch_number: String,
    /// Quantity to take from that batch; always positive
    pub quantity: f64,
}

/// How batches are selected to satisfy a requested quantity.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationStrategy {
    /// Earliest admission date first
    Fifo,
    /// Earliest expiry date first; batches without expiry sort last
    Fefo,
    /// Caller names the batches; validated against availability and the
    /// requested total
    Explicit(Vec<BatchSpec>),
}

/// One batch-level take within a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAllocation {
    /// Batch the units come from
    pub batch_number: String,
    /// Quantity taken from that batch
    pub quantity: f64,
}

/// The outcome of planning: which batches cover the requested quantity.
///
/// A plan has no side effects until it is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    /// Item the plan is for
    pub item_code: String,
    /// Warehouse the plan is scoped to
    pub warehouse_code: String,
    /// Quantity the caller asked for
    pub requested_quantity: f64,
    /// Batch-level takes summing to the requested quantity
    pub allocations: Vec<BatchAllocation>,
}

async fn load_product<C: ConnectionTrait>(
    conn: &C,
    item_code: &str,
    warehouse_code: &str,
) -> Result<product::Model> {
    Product::find()
        .filter(product::Column::ItemCode.eq(item_code))
        .filter(product::Column::WarehouseCode.eq(warehouse_code))
        .filter(product::Column::IsDeleted.eq(false))
        .one(conn)
        .await?
        .ok_or_else(|| Error::ProductNotFound {
            item_code: item_code.to_string(),
            warehouse_code: warehouse_code.to_string(),
        })
}

fn sort_for_policy(batches: &mut [batch::Model], policy: AllocationPolicy) {
    match policy {
        AllocationPolicy::Fifo => batches.sort_by(|a, b| {
            a.admission_date
                .cmp(&b.admission_date)
                .then_with(|| a.batch_number.cmp(&b.batch_number))
        }),
        AllocationPolicy::Fefo => batches.sort_by(|a, b| match (a.expiry_date, b.expiry_date) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.batch_number.cmp(&b.batch_number)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.batch_number.cmp(&b.batch_number),
        }),
    }
}

fn plan_by_policy(
    item_code: &str,
    warehouse_code: &str,
    requested: f64,
    policy: AllocationPolicy,
    mut batches: Vec<batch::Model>,
    available_of: &HashMap<String, f64>,
) -> Result<Vec<BatchAllocation>> {
    let total_available: f64 = available_of.values().sum();
    if total_available + QTY_EPSILON < requested {
        return Err(Error::InsufficientStock {
            item_code: item_code.to_string(),
            warehouse_code: warehouse_code.to_string(),
            requested,
            available: total_available,
        });
    }

    sort_for_policy(&mut batches, policy);

    let mut allocations = Vec::new();
    let mut remaining = requested;
    for b in &batches {
        if remaining <= QTY_EPSILON {
            break;
        }
        let available = available_of.get(&b.batch_number).copied().unwrap_or(0.0);
        let take = available.min(remaining);
        if take > QTY_EPSILON {
            allocations.push(BatchAllocation {
                batch_number: b.batch_number.clone(),
                quantity: take,
            });
            remaining -= take;
        }
    }
    Ok(allocations)
}

fn plan_explicit(
    item_code: &str,
    warehouse_code: &str,
    requested: f64,
    specs: &[BatchSpec],
    batches: &[batch::Model],
    available_of: &HashMap<String, f64>,
) -> Result<Vec<BatchAllocation>> {
    if specs.is_empty() {
        return Err(Error::Validation {
            message: "explicit allocation requires at least one batch spec".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for spec in specs {
        if !spec.quantity.is_finite() || spec.quantity <= 0.0 {
            return Err(Error::Validation {
                message: format!(
                    "batch {} quantity must be positive, got {}",
                    spec.batch_number, spec.quantity
                ),
            });
        }
        if !seen.insert(spec.batch_number.as_str()) {
            return Err(Error::Validation {
                message: format!("batch {} named more than once", spec.batch_number),
            });
        }
    }

    let sum: f64 = specs.iter().map(|s| s.quantity).sum();
    if (sum - requested).abs() > QTY_EPSILON {
        return Err(Error::Validation {
            message: format!(
                "batch quantities sum to {sum} but requested quantity is {requested}"
            ),
        });
    }

    let mut allocations = Vec::with_capacity(specs.len());
    for spec in specs {
        let Some(b) = batches.iter().find(|b| b.batch_number == spec.batch_number) else {
            return Err(Error::BatchNotFound {
                item_code: item_code.to_string(),
                batch_number: spec.batch_number.clone(),
            });
        };
        if b.status != BatchStatus::Released {
            return Err(Error::Validation {
                message: format!("batch {} is not released for sale", spec.batch_number),
            });
        }
        let available = available_of.get(&spec.batch_number).copied().unwrap_or(0.0);
        if available + QTY_EPSILON < spec.quantity {
            return Err(Error::InsufficientStock {
                item_code: item_code.to_string(),
                warehouse_code: warehouse_code.to_string(),
                requested: spec.quantity,
                available,
            });
        }
        allocations.push(BatchAllocation {
            batch_number: spec.batch_number.clone(),
            quantity: spec.quantity,
        });
    }
    Ok(allocations)
}

/// Plans an allocation without mutating any stored state.
///
/// `strategy` of `None` falls back to the product's configured policy.
/// Availability is computed per batch as batch quantity minus active
/// reservation holds; the caller must already hold the keyed lock for the
/// (item, warehouse) pair for the result to stay valid through a commit.
pub async fn plan_allocation<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    item_code: &str,
    warehouse_code: &str,
    requested_quantity: f64,
    strategy: Option<AllocationStrategy>,
) -> Result<AllocationPlan> {
    plan_allocation_with_overlay(
        conn,
        now,
        item_code,
        warehouse_code,
        requested_quantity,
        strategy,
        None,
    )
    .await
}

/// Planning variant that additionally subtracts `overlay` quantities
/// (batch number -> quantity) from availability.
///
/// Multi-line reservation creation plans several lines for the same item
/// before anything is persisted; the overlay carries the earlier lines' takes
/// so one create cannot double-spend its own units.
pub(crate) async fn plan_allocation_with_overlay<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    item_code: &str,
    warehouse_code: &str,
    requested_quantity: f64,
    strategy: Option<AllocationStrategy>,
    overlay: Option<&HashMap<String, f64>>,
) -> Result<AllocationPlan> {
    if !requested_quantity.is_finite() || requested_quantity <= 0.0 {
        return Err(Error::Validation {
            message: format!("requested quantity must be positive, got {requested_quantity}"),
        });
    }

    let product = load_product(conn, item_code, warehouse_code).await?;

    let batches = Batch::find()
        .filter(batch::Column::ProductId.eq(product.id))
        .all(conn)
        .await?;

    let held = reserved::reserved_by_batch(conn, now, item_code, warehouse_code).await?;
    let mut available_of: HashMap<String, f64> = HashMap::new();
    for b in &batches {
        if b.status != BatchStatus::Released {
            continue;
        }
        let mut available = b.quantity - held.get(&b.batch_number).copied().unwrap_or(0.0);
        if let Some(overlay) = overlay {
            available -= overlay.get(&b.batch_number).copied().unwrap_or(0.0);
        }
        available_of.insert(b.batch_number.clone(), available.max(0.0));
    }

    let allocations = match strategy {
        Some(AllocationStrategy::Explicit(specs)) => plan_explicit(
            item_code,
            warehouse_code,
            requested_quantity,
            &specs,
            &batches,
            &available_of,
        )?,
        Some(AllocationStrategy::Fifo) => plan_by_policy(
            item_code,
            warehouse_code,
            requested_quantity,
            AllocationPolicy::Fifo,
            batches,
            &available_of,
        )?,
        Some(AllocationStrategy::Fefo) => plan_by_policy(
            item_code,
            warehouse_code,
            requested_quantity,
            AllocationPolicy::Fefo,
            batches,
            &available_of,
        )?,
        None => plan_by_policy(
            item_code,
            warehouse_code,
            requested_quantity,
            product.allocation_policy,
            batches,
            &available_of,
        )?,
    };

    debug!(
        item = item_code,
        warehouse = warehouse_code,
        requested = requested_quantity,
        batches = allocations.len(),
        "allocation planned"
    );

    Ok(AllocationPlan {
        item_code: item_code.to_string(),
        warehouse_code: warehouse_code.to_string(),
        requested_quantity,
        allocations,
    })
}

/// Applies a plan: decrements batch quantities and the product's on-hand.
///
/// Must run inside a database transaction held for the duration of the call;
/// every decrement is guarded at the SQL level, so a concurrent change that
/// would drive a quantity negative fails the call and the caller's
/// transaction rolls back with no partial decrement observable.
pub async fn apply_allocation<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    plan: &AllocationPlan,
) -> Result<()> {
    let product = load_product(conn, &plan.item_code, &plan.warehouse_code).await?;

    let mut total = 0.0;
    for allocation in &plan.allocations {
        let updated = Batch::update_many()
            .col_expr(
                batch::Column::Quantity,
                Expr::col(batch::Column::Quantity).sub(allocation.quantity),
            )
            .col_expr(batch::Column::UpdatedAt, Expr::value(now))
            .filter(batch::Column::ProductId.eq(product.id))
            .filter(batch::Column::BatchNumber.eq(&allocation.batch_number))
            .filter(batch::Column::Quantity.gte(allocation.quantity))
            .exec(conn)
            .await?;

        if updated.rows_affected == 0 {
            // Either the batch vanished or its quantity no longer covers the
            // take; distinguish for the caller, then let the transaction roll back.
            let current = Batch::find()
                .filter(batch::Column::ProductId.eq(product.id))
                .filter(batch::Column::BatchNumber.eq(&allocation.batch_number))
                .one(conn)
                .await?;
            return Err(match current {
                None => Error::BatchNotFound {
                    item_code: plan.item_code.clone(),
                    batch_number: allocation.batch_number.clone(),
                },
                Some(b) => Error::InsufficientStock {
                    item_code: plan.item_code.clone(),
                    warehouse_code: plan.warehouse_code.clone(),
                    requested: allocation.quantity,
                    available: b.quantity,
                },
            });
        }
        total += allocation.quantity;
    }

    let updated = Product::update_many()
        .col_expr(
            product::Column::QuantityOnHand,
            Expr::col(product::Column::QuantityOnHand).sub(total),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(now))
        .filter(product::Column::Id.eq(product.id))
        .filter(product::Column::QuantityOnHand.gte(total))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        warn!(
            item = %plan.item_code,
            warehouse = %plan.warehouse_code,
            "product on-hand no longer covers a planned allocation"
        );
        return Err(Error::InsufficientStock {
            item_code: plan.item_code.clone(),
            warehouse_code: plan.warehouse_code.clone(),
            requested: total,
            available: product.quantity_on_hand,
        });
    }

    Ok(())
}

/// Lock-coordinated batch allocator.
///
/// Wraps planning and committing with keyed-lock acquisition so callers get
/// the concurrency discipline without handling locks themselves.
pub struct BatchAllocator {
    db: Arc<DatabaseConnection>,
    locks: Arc<KeyedLock>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl BatchAllocator {
    /// Creates an allocator over the given connection and lock registry.
    pub fn new(
        db: Arc<DatabaseConnection>,
        locks: Arc<KeyedLock>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            db,
            locks,
            clock,
            lock_timeout,
        }
    }

    /// Plans an allocation under the item's lock and returns the plan.
    ///
    /// No stored state changes; this is the feasibility half of the
    /// allocate-then-commit flow.
    pub async fn allocate(
        &self,
        item_code: &str,
        warehouse_code: &str,
        requested_quantity: f64,
        strategy: Option<AllocationStrategy>,
    ) -> Result<AllocationPlan> {
        let key = LockKey::new(item_code, warehouse_code);
        let _guard = self.locks.acquire(&key, self.lock_timeout).await?;
        plan_allocation(
            self.db.as_ref(),
            self.clock.now(),
            item_code,
            warehouse_code,
            requested_quantity,
            strategy,
        )
        .await
    }

    /// Plans and commits in one lock scope (the direct-sale path).
    ///
    /// The lock is released only after the transaction has committed, so a
    /// second acquirer always reads the decremented quantities.
    pub async fn allocate_and_commit(
        &self,
        item_code: &str,
        warehouse_code: &str,
        requested_quantity: f64,
        strategy: Option<AllocationStrategy>,
    ) -> Result<AllocationPlan> {
        let key = LockKey::new(item_code, warehouse_code);
        let _guard = self.locks.acquire(&key, self.lock_timeout).await?;
        let now = self.clock.now();

        let txn = self.db.begin().await?;
        let plan = plan_allocation(
            &txn,
            now,
            item_code,
            warehouse_code,
            requested_quantity,
            strategy,
        )
        .await?;
        apply_allocation(&txn, now, &plan).await?;
        txn.commit().await?;

        info!(
            item = item_code,
            warehouse = warehouse_code,
            quantity = requested_quantity,
            "allocation committed"
        );
        Ok(plan)
    }

    /// Commits a previously returned plan under a fresh lock scope.
    ///
    /// Availability may have moved since planning; the guarded decrements
    /// re-validate, so a stale plan fails cleanly instead of going negative.
    pub async fn commit(&self, plan: &AllocationPlan) -> Result<()> {
        let key = LockKey::new(plan.item_code.clone(), plan.warehouse_code.clone());
        let _guard = self.locks.acquire(&key, self.lock_timeout).await?;
        let now = self.clock.now();

        let txn = self.db.begin().await?;
        apply_allocation(&txn, now, plan).await?;
        txn.commit().await?;

        info!(
            item = %plan.item_code,
            warehouse = %plan.warehouse_code,
            quantity = plan.requested_quantity,
            "allocation plan committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::entities::ReservationStatus;
    use crate::test_utils::{
        create_custom_batch, create_custom_product, create_test_batch, create_test_product,
        insert_reservation_with_allocation, setup_test_db, test_allocator,
    };
    use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn batch_quantity(db: &DatabaseConnection, product_id: i64, number: &str) -> f64 {
        Batch::find()
            .filter(batch::Column::ProductId.eq(product_id))
            .filter(batch::Column::BatchNumber.eq(number))
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .quantity
    }

    async fn on_hand(db: &DatabaseConnection, item: &str, wh: &str) -> f64 {
        load_product(db, item, wh).await.unwrap().quantity_on_hand
    }

    #[tokio::test]
    async fn test_fefo_allocates_soonest_expiry_first() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM1", "WH1", 15.0).await?;
        create_test_batch(&db, product.id, "B1", 10.0, Some(date(2025, 1, 1))).await?;
        create_test_batch(&db, product.id, "B2", 5.0, Some(date(2025, 2, 1))).await?;

        let allocator = test_allocator(Arc::clone(&db));
        let plan = allocator
            .allocate_and_commit("ITM1", "WH1", 12.0, Some(AllocationStrategy::Fefo))
            .await?;

        assert_eq!(
            plan.allocations,
            vec![
                BatchAllocation {
                    batch_number: "B1".to_string(),
                    quantity: 10.0
                },
                BatchAllocation {
                    batch_number: "B2".to_string(),
                    quantity: 2.0
                },
            ]
        );
        assert_eq!(batch_quantity(&db, product.id, "B1").await, 0.0);
        assert_eq!(batch_quantity(&db, product.id, "B2").await, 3.0);
        assert_eq!(on_hand(&db, "ITM1", "WH1").await, 3.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_fifo_orders_by_admission_then_batch_number() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM1", "WH1", 30.0).await?;
        let early = Utc::now() - ChronoDuration::days(10);
        let late = Utc::now() - ChronoDuration::days(1);
        // Same admission moment for B2/B3: batch number breaks the tie.
        create_custom_batch(&db, product.id, "B3", 10.0, BatchStatus::Released, early, None)
            .await?;
        create_custom_batch(&db, product.id, "B2", 10.0, BatchStatus::Released, early, None)
            .await?;
        create_custom_batch(&db, product.id, "B1", 10.0, BatchStatus::Released, late, None)
            .await?;

        let allocator = test_allocator(Arc::clone(&db));
        let plan = allocator
            .allocate("ITM1", "WH1", 25.0, Some(AllocationStrategy::Fifo))
            .await?;

        let order: Vec<&str> = plan
            .allocations
            .iter()
            .map(|a| a.batch_number.as_str())
            .collect();
        assert_eq!(order, vec!["B2", "B3", "B1"]);
        assert_eq!(plan.allocations[2].quantity, 5.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_default_strategy_comes_from_product_policy() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_custom_product(&db, "ITM1", "WH1", 15.0, AllocationPolicy::Fefo)
            .await?;
        // FIFO would prefer B-OLD (earlier admission); FEFO must prefer B-NEW.
        create_custom_batch(
            &db,
            product.id,
            "B-OLD",
            10.0,
            BatchStatus::Released,
            Utc::now() - ChronoDuration::days(30),
            Some(date(2025, 6, 1)),
        )
        .await?;
        create_custom_batch(
            &db,
            product.id,
            "B-NEW",
            5.0,
            BatchStatus::Released,
            Utc::now(),
            Some(date(2025, 1, 1)),
        )
        .await?;

        let allocator = test_allocator(Arc::clone(&db));
        let plan = allocator.allocate("ITM1", "WH1", 5.0, None).await?;
        assert_eq!(plan.allocations[0].batch_number, "B-NEW");
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_stock_has_no_side_effects() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM1", "WH1", 8.0).await?;
        create_test_batch(&db, product.id, "B1", 8.0, None).await?;

        let allocator = test_allocator(Arc::clone(&db));
        let result = allocator
            .allocate_and_commit("ITM1", "WH1", 9.0, Some(AllocationStrategy::Fifo))
            .await;

        match result {
            Err(Error::InsufficientStock {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 9.0);
                assert_eq!(available, 8.0);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(batch_quantity(&db, product.id, "B1").await, 8.0);
        assert_eq!(on_hand(&db, "ITM1", "WH1").await, 8.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reserved_units_are_not_allocatable() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM1", "WH1", 10.0).await?;
        create_test_batch(&db, product.id, "B1", 10.0, None).await?;
        insert_reservation_with_allocation(
            &db,
            "pos-hold",
            ReservationStatus::Active,
            Utc::now() + ChronoDuration::minutes(10),
            "ITM1",
            "WH1",
            "B1",
            6.0,
        )
        .await?;

        let allocator = test_allocator(Arc::clone(&db));
        let result = allocator
            .allocate("ITM1", "WH1", 5.0, Some(AllocationStrategy::Fifo))
            .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock { available, .. }) if available == 4.0
        ));

        let plan = allocator
            .allocate("ITM1", "WH1", 4.0, Some(AllocationStrategy::Fifo))
            .await?;
        assert_eq!(plan.allocations[0].quantity, 4.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_locked_batches_are_skipped() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM1", "WH1", 20.0).await?;
        create_custom_batch(
            &db,
            product.id,
            "B-QC",
            10.0,
            BatchStatus::Locked,
            Utc::now() - ChronoDuration::days(5),
            None,
        )
        .await?;
        create_test_batch(&db, product.id, "B-OK", 10.0, None).await?;

        let allocator = test_allocator(Arc::clone(&db));
        let plan = allocator
            .allocate("ITM1", "WH1", 10.0, Some(AllocationStrategy::Fifo))
            .await?;
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].batch_number, "B-OK");

        let result = allocator
            .allocate("ITM1", "WH1", 11.0, Some(AllocationStrategy::Fifo))
            .await;
        assert!(matches!(result, Err(Error::InsufficientStock { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_strategy_validates_specs() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM1", "WH1", 20.0).await?;
        create_test_batch(&db, product.id, "B1", 10.0, None).await?;
        create_test_batch(&db, product.id, "B2", 10.0, None).await?;

        let allocator = test_allocator(Arc::clone(&db));

        // Valid: pairs sum to the requested quantity.
        let plan = allocator
            .allocate(
                "ITM1",
                "WH1",
                12.0,
                Some(AllocationStrategy::Explicit(vec![
                    BatchSpec {
                        batch_number: "B1".to_string(),
                        quantity: 10.0,
                    },
                    BatchSpec {
                        batch_number: "B2".to_string(),
                        quantity: 2.0,
                    },
                ])),
            )
            .await?;
        assert_eq!(plan.allocations.len(), 2);

        // Sum mismatch: more than requested is rejected, not truncated.
        let result = allocator
            .allocate(
                "ITM1",
                "WH1",
                5.0,
                Some(AllocationStrategy::Explicit(vec![BatchSpec {
                    batch_number: "B1".to_string(),
                    quantity: 6.0,
                }])),
            )
            .await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        // Unknown batch.
        let result = allocator
            .allocate(
                "ITM1",
                "WH1",
                1.0,
                Some(AllocationStrategy::Explicit(vec![BatchSpec {
                    batch_number: "NOPE".to_string(),
                    quantity: 1.0,
                }])),
            )
            .await;
        assert!(matches!(result, Err(Error::BatchNotFound { .. })));

        // Overdrawn batch.
        let result = allocator
            .allocate(
                "ITM1",
                "WH1",
                11.0,
                Some(AllocationStrategy::Explicit(vec![BatchSpec {
                    batch_number: "B1".to_string(),
                    quantity: 11.0,
                }])),
            )
            .await;
        assert!(matches!(result, Err(Error::InsufficientStock { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_for_unknown_product() -> crate::errors::Result<()> {
        // Configure MockDatabase to return no product (simulating not found)
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([Vec::<product::Model>::new()])
            .into_connection();

        let result = plan_allocation(
            &db,
            Utc::now(),
            "NOPE",
            "WH1",
            1.0,
            Some(AllocationStrategy::Fifo),
        )
        .await;
        assert!(matches!(result, Err(Error::ProductNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_non_positive_quantity() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        create_test_product(&db, "ITM1", "WH1", 10.0).await?;

        let allocator = test_allocator(Arc::clone(&db));
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = allocator
                .allocate("ITM1", "WH1", bad, Some(AllocationStrategy::Fifo))
                .await;
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_last_unit_single_winner() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM2", "WH1", 1.0).await?;
        create_test_batch(&db, product.id, "B1", 1.0, None).await?;

        let allocator = test_allocator(Arc::clone(&db));
        let (a, b) = tokio::join!(
            allocator.allocate_and_commit("ITM2", "WH1", 1.0, Some(AllocationStrategy::Fifo)),
            allocator.allocate_and_commit("ITM2", "WH1", 1.0, Some(AllocationStrategy::Fifo)),
        );

        // Exactly one wins the race; the loser sees the truth, not -1.
        assert_eq!(
            u32::from(a.is_ok()) + u32::from(b.is_ok()),
            1,
            "exactly one of the two concurrent sales must succeed"
        );
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(Error::InsufficientStock { .. })));
        assert_eq!(on_hand(&db, "ITM2", "WH1").await, 0.0);
        assert_eq!(batch_quantity(&db, product.id, "B1").await, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_of_stale_plan_fails_cleanly() -> crate::errors::Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let product = create_test_product(&db, "ITM1", "WH1", 10.0).await?;
        create_test_batch(&db, product.id, "B1", 10.0, None).await?;

        let allocator = test_allocator(Arc::clone(&db));
        let plan = allocator
            .allocate("ITM1", "WH1", 8.0, Some(AllocationStrategy::Fifo))
            .await?;

        // Somebody else consumes the stock between plan and commit.
        allocator
            .allocate_and_commit("ITM1", "WH1", 5.0, Some(AllocationStrategy::Fifo))
            .await?;

        let result = allocator.commit(&plan).await;
        assert!(matches!(result, Err(Error::InsufficientStock { .. })));
        // The failed commit must not leave a partial decrement behind.
        assert_eq!(on_hand(&db, "ITM1", "WH1").await, 5.0);
        assert_eq!(batch_quantity(&db, product.id, "B1").await, 5.0);
        Ok(())
    }
}
