//! Reserved-quantity aggregation and availability queries.
//!
//! This is the bridge that stops two concurrent holds, or a hold plus a live
//! sale, from spending the same physical units twice: allocation planning
//! subtracts the quantities summed here from each batch before handing any
//! units out. The sums must be computed inside the caller's lock scope and
//! never cached across an allocation boundary.

use crate::{
    entities::{
        Batch, Product, ReservationBatchAllocation, ReservationStatus, batch, product,
        reservation, reservation_batch_allocation,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, JoinType, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait,
};
use std::collections::HashMap;

/// Per-batch availability snapshot, used by allocation planning and exposed
/// read-only to operational dashboards.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAvailability {
    /// Batch number within the product
    pub batch_number: String,
    /// Physical quantity recorded on the batch
    pub on_hand: f64,
    /// Quantity held by active, unexpired reservations
    pub reserved: f64,
    /// Quantity an allocation may still take from this batch
    pub available: f64,
}

fn active_allocation_query(
    item_code: &str,
    warehouse_code: &str,
    now: DateTime<Utc>,
) -> sea_orm::Select<ReservationBatchAllocation> {
    ReservationBatchAllocation::find()
        .join(
            JoinType::InnerJoin,
            reservation_batch_allocation::Relation::Reservation.def(),
        )
        .filter(reservation_batch_allocation::Column::ItemCode.eq(item_code))
        .filter(reservation_batch_allocation::Column::WarehouseCode.eq(warehouse_code))
        .filter(reservation::Column::Status.eq(ReservationStatus::Active))
        .filter(reservation::Column::ExpiresAt.gt(now))
}

/// Sums the quantity held by active, unexpired reservations for an item in a
/// warehouse, optionally scoped to a single batch.
pub async fn reserved_quantity<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    item_code: &str,
    warehouse_code: &str,
    batch_number: Option<&str>,
) -> Result<f64> {
    let mut query = active_allocation_query(item_code, warehouse_code, now);
    if let Some(batch_number) = batch_number {
        query = query.filter(
            reservation_batch_allocation::Column::BatchNumber.eq(batch_number),
        );
    }

    let rows = query.all(conn).await?;
    Ok(rows.iter().map(|row| row.quantity).sum())
}

/// Returns the reserved quantity for every batch of an item/warehouse pair.
///
/// One query instead of one per batch; allocation planning walks potentially
/// many batches under the lock and should not multiply round trips.
pub async fn reserved_by_batch<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    item_code: &str,
    warehouse_code: &str,
) -> Result<HashMap<String, f64>> {
    let rows = active_allocation_query(item_code, warehouse_code, now)
        .all(conn)
        .await?;

    let mut by_batch: HashMap<String, f64> = HashMap::new();
    for row in rows {
        *by_batch.entry(row.batch_number).or_insert(0.0) += row.quantity;
    }
    Ok(by_batch)
}

/// Availability of an item in a warehouse: on-hand minus reserved.
pub async fn availability<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    item_code: &str,
    warehouse_code: &str,
) -> Result<f64> {
    let product = Product::find()
        .filter(product::Column::ItemCode.eq(item_code))
        .filter(product::Column::WarehouseCode.eq(warehouse_code))
        .filter(product::Column::IsDeleted.eq(false))
        .one(conn)
        .await?
        .ok_or_else(|| Error::ProductNotFound {
            item_code: item_code.to_string(),
            warehouse_code: warehouse_code.to_string(),
        })?;

    let reserved = reserved_quantity(conn, now, item_code, warehouse_code, None).await?;
    Ok(product.quantity_on_hand - reserved)
}

/// Per-batch availability breakdown for an item/warehouse pair, released
/// batches only, in batch-number order.
pub async fn batch_availability<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    item_code: &str,
    warehouse_code: &str,
) -> Result<Vec<BatchAvailability>> {
    let product = Product::find()
        .filter(product::Column::ItemCode.eq(item_code))
        .filter(product::Column::WarehouseCode.eq(warehouse_code))
        .filter(product::Column::IsDeleted.eq(false))
        .one(conn)
        .await?
        .ok_or_else(|| Error::ProductNotFound {
            item_code: item_code.to_string(),
            warehouse_code: warehouse_code.to_string(),
        })?;

    let batches = Batch::find()
        .filter(batch::Column::ProductId.eq(product.id))
        .filter(batch::Column::Status.eq(crate::entities::BatchStatus::Released))
        .order_by_asc(batch::Column::BatchNumber)
        .all(conn)
        .await?;

    let reserved = reserved_by_batch(conn, now, item_code, warehouse_code).await?;

    Ok(batches
        .into_iter()
        .map(|b| {
            let held = reserved.get(&b.batch_number).copied().unwrap_or(0.0);
            BatchAvailability {
                batch_number: b.batch_number,
                on_hand: b.quantity,
                reserved: held,
                available: b.quantity - held,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::{
        create_test_batch, create_test_product, insert_reservation_with_allocation,
        setup_test_db,
    };
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_reserved_quantity_counts_only_active_unexpired() -> Result<()> {
        let db = setup_test_db().await?;
        let now = Utc::now();
        let product = create_test_product(&db, "ITM1", "WH1", 100.0).await?;
        create_test_batch(&db, product.id, "B1", 100.0, None).await?;

        // Active and unexpired: counted.
        insert_reservation_with_allocation(
            &db,
            "ref-active",
            ReservationStatus::Active,
            now + ChronoDuration::minutes(10),
            "ITM1",
            "WH1",
            "B1",
            5.0,
        )
        .await?;
        // Active but past expiry: excluded even before the cleanup sweep runs.
        insert_reservation_with_allocation(
            &db,
            "ref-overdue",
            ReservationStatus::Active,
            now - ChronoDuration::minutes(1),
            "ITM1",
            "WH1",
            "B1",
            7.0,
        )
        .await?;
        // Terminal states: excluded.
        insert_reservation_with_allocation(
            &db,
            "ref-released",
            ReservationStatus::Released,
            now + ChronoDuration::minutes(10),
            "ITM1",
            "WH1",
            "B1",
            11.0,
        )
        .await?;

        let reserved = reserved_quantity(&db, now, "ITM1", "WH1", None).await?;
        assert_eq!(reserved, 5.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reserved_quantity_scopes_by_batch_and_warehouse() -> Result<()> {
        let db = setup_test_db().await?;
        let now = Utc::now();
        let expires = now + ChronoDuration::minutes(10);
        let product = create_test_product(&db, "ITM1", "WH1", 100.0).await?;
        create_test_batch(&db, product.id, "B1", 50.0, None).await?;
        create_test_batch(&db, product.id, "B2", 50.0, None).await?;

        insert_reservation_with_allocation(
            &db, "ref-1", ReservationStatus::Active, expires, "ITM1", "WH1", "B1", 3.0,
        )
        .await?;
        insert_reservation_with_allocation(
            &db, "ref-2", ReservationStatus::Active, expires, "ITM1", "WH1", "B2", 4.0,
        )
        .await?;
        insert_reservation_with_allocation(
            &db, "ref-3", ReservationStatus::Active, expires, "ITM1", "WH2", "B1", 9.0,
        )
        .await?;

        assert_eq!(
            reserved_quantity(&db, now, "ITM1", "WH1", Some("B1")).await?,
            3.0
        );
        assert_eq!(
            reserved_quantity(&db, now, "ITM1", "WH1", None).await?,
            7.0
        );

        let by_batch = reserved_by_batch(&db, now, "ITM1", "WH1").await?;
        assert_eq!(by_batch.get("B1"), Some(&3.0));
        assert_eq!(by_batch.get("B2"), Some(&4.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_availability_subtracts_reserved_from_on_hand() -> Result<()> {
        let db = setup_test_db().await?;
        let now = Utc::now();
        let product = create_test_product(&db, "ITM1", "WH1", 20.0).await?;
        create_test_batch(&db, product.id, "B1", 20.0, None).await?;

        insert_reservation_with_allocation(
            &db,
            "ref-1",
            ReservationStatus::Active,
            now + ChronoDuration::minutes(10),
            "ITM1",
            "WH1",
            "B1",
            6.0,
        )
        .await?;

        assert_eq!(availability(&db, now, "ITM1", "WH1").await?, 14.0);

        let breakdown = batch_availability(&db, now, "ITM1", "WH1").await?;
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown[0].on_hand, 20.0);
        assert_eq!(breakdown[0].reserved, 6.0);
        assert_eq!(breakdown[0].available, 14.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_availability_unknown_product() -> Result<()> {
        let db = setup_test_db().await?;
        let result = availability(&db, Utc::now(), "NOPE", "WH1").await;
        assert!(matches!(result, Err(Error::ProductNotFound { .. })));
        Ok(())
    }
}
