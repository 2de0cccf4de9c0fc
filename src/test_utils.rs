//! Shared test utilities for `Stockroom`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults, plus the deterministic
//! stand-ins for the external seams: a manual clock and a scripted document
//! poster.

use crate::{
    config::database::create_tables,
    core::{
        allocation::BatchAllocator,
        clock::{Clock, SystemClock},
        keyed_lock::KeyedLock,
        poster::{DocumentPoster, SubmitError},
        reservation::ReservationManager,
    },
    entities::{
        AllocationPolicy, BatchStatus, ReservationStatus, batch, product, reservation,
        reservation_batch_allocation, reservation_line,
    },
    errors::Result,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Initializes tracing for a test, once; respects `RUST_LOG` when set.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    create_tables(&db).await?;
    Ok(db)
}

/// Creates a test product with sensible defaults (FIFO policy, no open
/// supplier or customer orders).
pub async fn create_test_product(
    db: &DatabaseConnection,
    item_code: &str,
    warehouse_code: &str,
    quantity_on_hand: f64,
) -> Result<product::Model> {
    create_custom_product(
        db,
        item_code,
        warehouse_code,
        quantity_on_hand,
        AllocationPolicy::Fifo,
    )
    .await
}

/// Creates a test product with a specific allocation policy.
pub async fn create_custom_product(
    db: &DatabaseConnection,
    item_code: &str,
    warehouse_code: &str,
    quantity_on_hand: f64,
    allocation_policy: AllocationPolicy,
) -> Result<product::Model> {
    let now = Utc::now();
    product::ActiveModel {
        item_code: Set(item_code.to_string()),
        warehouse_code: Set(warehouse_code.to_string()),
        quantity_on_hand: Set(quantity_on_hand),
        quantity_on_supplier_order: Set(0.0),
        quantity_on_customer_order: Set(0.0),
        allocation_policy: Set(allocation_policy),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates a released test batch admitted "now".
///
/// # Arguments
/// * `expiry_date` - set it for FEFO scenarios, `None` for plain FIFO stock
pub async fn create_test_batch(
    db: &DatabaseConnection,
    product_id: i64,
    batch_number: &str,
    quantity: f64,
    expiry_date: Option<NaiveDate>,
) -> Result<batch::Model> {
    create_custom_batch(
        db,
        product_id,
        batch_number,
        quantity,
        BatchStatus::Released,
        Utc::now(),
        expiry_date,
    )
    .await
}

/// Creates a test batch with full control over status and dates.
pub async fn create_custom_batch(
    db: &DatabaseConnection,
    product_id: i64,
    batch_number: &str,
    quantity: f64,
    status: BatchStatus,
    admission_date: DateTime<Utc>,
    expiry_date: Option<NaiveDate>,
) -> Result<batch::Model> {
    let now = Utc::now();
    batch::ActiveModel {
        product_id: Set(product_id),
        batch_number: Set(batch_number.to_string()),
        quantity: Set(quantity),
        status: Set(status),
        manufacturing_date: Set(None),
        admission_date: Set(admission_date),
        expiry_date: Set(expiry_date),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Inserts a reservation with one line and one batch allocation directly,
/// bypassing the manager. Used to stage aggregator and cleanup scenarios in
/// arbitrary states.
#[allow(clippy::too_many_arguments)]
pub async fn insert_reservation_with_allocation(
    db: &DatabaseConnection,
    external_ref: &str,
    status: ReservationStatus,
    expires_at: DateTime<Utc>,
    item_code: &str,
    warehouse_code: &str,
    batch_number: &str,
    quantity: f64,
) -> Result<reservation::Model> {
    let created = reservation::ActiveModel {
        external_ref: Set(external_ref.to_string()),
        source_system: Set("pos".to_string()),
        customer_code: Set(None),
        total_value: Set(quantity),
        status: Set(status),
        created_at: Set(Utc::now()),
        expires_at: Set(expires_at),
        ..Default::default()
    }
    .insert(db)
    .await?;

    reservation_line::ActiveModel {
        reservation_id: Set(created.id),
        line_index: Set(0),
        item_code: Set(item_code.to_string()),
        warehouse_code: Set(warehouse_code.to_string()),
        quantity: Set(quantity),
        unit_price: Set(1.0),
        line_total: Set(quantity),
        ..Default::default()
    }
    .insert(db)
    .await?;

    reservation_batch_allocation::ActiveModel {
        reservation_id: Set(created.id),
        line_index: Set(0),
        item_code: Set(item_code.to_string()),
        warehouse_code: Set(warehouse_code.to_string()),
        batch_number: Set(batch_number.to_string()),
        quantity: Set(quantity),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(created)
}

/// Builds an allocator with a fresh lock registry and the system clock.
pub fn test_allocator(db: Arc<DatabaseConnection>) -> BatchAllocator {
    BatchAllocator::new(
        db,
        Arc::new(KeyedLock::new()),
        Arc::new(SystemClock),
        Duration::from_secs(2),
    )
}

/// Builds a reservation manager with a fresh lock registry and the system
/// clock (default TTL 30 minutes).
pub fn test_reservation_manager(db: Arc<DatabaseConnection>) -> ReservationManager {
    ReservationManager::new(
        db,
        Arc::new(KeyedLock::new()),
        Arc::new(SystemClock),
        Duration::from_secs(2),
        Duration::from_secs(30 * 60),
    )
}

/// Builds a reservation manager driven by a manual clock.
pub fn test_reservation_manager_with_clock(
    db: Arc<DatabaseConnection>,
    clock: Arc<ManualClock>,
) -> ReservationManager {
    ReservationManager::new(
        db,
        Arc::new(KeyedLock::new()),
        clock,
        Duration::from_secs(2),
        Duration::from_secs(30 * 60),
    )
}

/// A clock that only moves when a test tells it to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Pins the clock to a specific moment.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A document poster driven by a script of outcomes.
///
/// Outcomes are consumed front to back; once the script is empty every
/// submission succeeds with a generated document id. Construct with
/// [`failing_transient`](Self::failing_transient) for an ERP that never
/// answers.
#[derive(Debug, Default)]
pub struct FakePoster {
    script: Mutex<VecDeque<std::result::Result<String, SubmitError>>>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    always_transient: bool,
}

impl FakePoster {
    /// A poster that succeeds unless scripted otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A poster where every submission fails transiently.
    #[must_use]
    pub fn failing_transient() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            always_transient: true,
        }
    }

    /// Appends one outcome to the script.
    pub fn push_outcome(&self, outcome: std::result::Result<String, SubmitError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// How many submissions were attempted.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl DocumentPoster for FakePoster {
    async fn submit(
        &self,
        document_type: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<String, SubmitError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push((document_type.to_string(), payload.clone()));
            calls.len()
        };

        if self.always_transient {
            return Err(SubmitError::Transient("erp unreachable".to_string()));
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| Ok(format!("FAKE-{call_number}")))
    }
}
