//! Reservation ledger.
//!
//! Every mutation runs in one database transaction together with its stock
//! effect and its history row. Notifications go out only after commit.

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::config::ReservationPolicyConfig;
use crate::entities::reservation::{self, Entity as ReservationEntity, ReservationStatus};
use crate::entities::reservation_status_history::{self, Entity as HistoryEntity};
use crate::entities::store;
use crate::errors::ServiceError;
use crate::events::{EventSender, EventType, ReservationEvent};
use crate::metrics::{record_failure, RESERVATIONS_CREATED, STATUS_TRANSITIONS};
use crate::services::inventory::InventoryService;
use crate::services::stores::find_store;
use crate::services::transitions::{self, ActorRelation, InventoryEffect, TransitionPlan, TransitionPolicy};

const MAX_REASON_LEN: usize = 500;

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub target: ReservationStatus,
    /// Free-text note stored in the history row
    pub reason: Option<String>,
    /// Version the caller last read; a mismatch is a `Conflict`
    pub expected_version: Option<i32>,
}

impl StatusChange {
    pub fn to(target: ReservationStatus) -> Self {
        Self {
            target,
            reason: None,
            expected_version: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn expecting_version(mut self, version: i32) -> Self {
        self.expected_version = Some(version);
        self
    }
}

enum PlannedChange {
    /// Already in the requested status
    Unchanged(reservation::Model),
    Write(PendingWrite),
}

struct PendingWrite {
    current: reservation::Model,
    owner_id: Uuid,
    effect: InventoryEffect,
}

/// Outcome of an applied transition, carried out of the transaction.
struct AppliedChange {
    reservation: reservation::Model,
    notify: ReservationEvent,
}

#[derive(Clone)]
pub struct ReservationLedger {
    db_pool: Arc<DatabaseConnection>,
    event_sender: EventSender,
    policy: ReservationPolicyConfig,
}

impl ReservationLedger {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: EventSender,
        policy: ReservationPolicyConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            policy,
        }
    }

    pub fn policy(&self) -> &ReservationPolicyConfig {
        &self.policy
    }

    /// Places a PENDING reservation for `customer`, holding the stock.
    ///
    /// No reservation is written unless the hold succeeds.
    #[instrument(skip(self), fields(customer_id = %customer.user_id))]
    pub async fn create(
        &self,
        customer: &Actor,
        item_id: Uuid,
        quantity: i32,
        pickup_time: DateTime<Utc>,
    ) -> Result<reservation::Model, ServiceError> {
        let now = Utc::now();
        if let Err(e) = self.validate_request(quantity, pickup_time, now) {
            record_failure("create", &e);
            return Err(e);
        }

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let result = Self::create_in_txn(&txn, customer, item_id, quantity, pickup_time, now).await;

        let (created, owner_id) = match result {
            Ok(value) => {
                txn.commit().await.map_err(ServiceError::db_error)?;
                value
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!("Rollback after failed create did not complete: {}", rollback_err);
                }
                record_failure("create", &e);
                return Err(e);
            }
        };

        RESERVATIONS_CREATED.inc();
        STATUS_TRANSITIONS
            .with_label_values(&[ReservationStatus::Pending.as_str()])
            .inc();
        self.event_sender.emit(ReservationEvent::new(
            EventType::ReservationCreated,
            created.id,
            owner_id,
        ));

        info!(
            reservation_id = %created.id,
            item_id = %item_id,
            quantity,
            "Reservation created"
        );
        Ok(created)
    }

    fn validate_request(
        &self,
        quantity: i32,
        pickup_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let max = self.policy.max_quantity_per_reservation;
        if quantity < 1 || quantity > max {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be between 1 and {}, got {}",
                max, quantity
            )));
        }
        if pickup_time < now {
            return Err(ServiceError::ValidationError(
                "pickup_time must not be in the past".to_string(),
            ));
        }
        Ok(())
    }

    async fn create_in_txn(
        txn: &DatabaseTransaction,
        customer: &Actor,
        item_id: Uuid,
        quantity: i32,
        pickup_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(reservation::Model, Uuid), ServiceError> {
        let hold = InventoryService::try_reserve(txn, item_id, quantity, now).await?;

        let store = find_store(txn, hold.store_id).await?;
        if !store.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Store {} is not accepting reservations",
                store.id
            )));
        }
        if !hold.item.window_contains(pickup_time) {
            return Err(ServiceError::ValidationError(format!(
                "pickup_time must fall between {} and {}",
                hold.item.available_from, hold.item.available_until
            )));
        }

        let created = reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            inventory_id: Set(item_id),
            customer_id: Set(customer.user_id),
            store_id: Set(store.id),
            quantity: Set(quantity),
            pickup_time: Set(pickup_time),
            status: Set(ReservationStatus::Pending),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        record_history(txn, created.id, None, ReservationStatus::Pending, customer.user_id, None, now)
            .await?;

        Ok((created, store.owner_id))
    }

    /// Moves a reservation to `target` on behalf of `actor`.
    pub async fn update_status(
        &self,
        reservation_id: Uuid,
        target: ReservationStatus,
        actor: &Actor,
    ) -> Result<reservation::Model, ServiceError> {
        self.apply_status_change(reservation_id, StatusChange::to(target), actor)
            .await
    }

    /// Moves a reservation as described by `change`.
    ///
    /// Re-requesting the current status succeeds without writing, releasing
    /// or committing anything, and emits no notification.
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn apply_status_change(
        &self,
        reservation_id: Uuid,
        change: StatusChange,
        actor: &Actor,
    ) -> Result<reservation::Model, ServiceError> {
        if change.reason.as_ref().map_or(false, |r| r.len() > MAX_REASON_LEN) {
            return Err(ServiceError::ValidationError(format!(
                "reason must be at most {} characters",
                MAX_REASON_LEN
            )));
        }

        let policy = TransitionPolicy::from(&self.policy);
        let pending = match self.plan_change(reservation_id, &change, actor, policy).await {
            Ok(PlannedChange::Unchanged(current)) => return Ok(current),
            Ok(PlannedChange::Write(pending)) => pending,
            Err(e) => {
                record_failure("update_status", &e);
                return Err(e);
            }
        };

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let result = Self::write_change(&txn, pending, &change, actor).await;

        let applied = match result {
            Ok(applied) => {
                txn.commit().await.map_err(ServiceError::db_error)?;
                applied
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!("Rollback after failed status change did not complete: {}", rollback_err);
                }
                record_failure("update_status", &e);
                return Err(e);
            }
        };

        STATUS_TRANSITIONS
            .with_label_values(&[change.target.as_str()])
            .inc();
        self.event_sender.emit(applied.notify);
        info!(
            reservation_id = %reservation_id,
            status = %change.target,
            "Reservation status changed"
        );

        Ok(applied.reservation)
    }

    /// Decides the change against a committed read of the reservation.
    ///
    /// The version read here guards the write, so a change that lands in
    /// between turns into a `Conflict`.
    async fn plan_change(
        &self,
        reservation_id: Uuid,
        change: &StatusChange,
        actor: &Actor,
        policy: TransitionPolicy,
    ) -> Result<PlannedChange, ServiceError> {
        let db = &*self.db_pool;
        let current = find_reservation(db, reservation_id).await?;
        let store = find_store(db, current.store_id).await?;
        let relation = ActorRelation::of(actor, current.customer_id, store.owner_id);

        let effect = match transitions::plan(current.status, change.target, relation, policy)? {
            TransitionPlan::NoOp => return Ok(PlannedChange::Unchanged(current)),
            TransitionPlan::Apply(effect) => effect,
        };

        if let Some(expected) = change.expected_version {
            if expected != current.version {
                return Err(ServiceError::Conflict(format!(
                    "Reservation {} is at version {}, not {}",
                    reservation_id, current.version, expected
                )));
            }
        }

        Ok(PlannedChange::Write(PendingWrite {
            current,
            owner_id: store.owner_id,
            effect,
        }))
    }

    async fn write_change(
        txn: &DatabaseTransaction,
        pending: PendingWrite,
        change: &StatusChange,
        actor: &Actor,
    ) -> Result<AppliedChange, ServiceError> {
        let PendingWrite {
            current,
            owner_id,
            effect,
        } = pending;
        let reservation_id = current.id;
        let now = Utc::now();

        // Version-guarded update goes first; the stock effect follows under its lock
        let result = ReservationEntity::update_many()
            .col_expr(reservation::Column::Status, Expr::value(change.target))
            .col_expr(
                reservation::Column::Version,
                Expr::col(reservation::Column::Version).add(1),
            )
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(reservation_id))
            .filter(reservation::Column::Version.eq(current.version))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            warn!(
                reservation_id = %reservation_id,
                "Concurrent modification detected for reservation"
            );
            return Err(ServiceError::Conflict(format!(
                "Reservation {} was modified concurrently",
                reservation_id
            )));
        }

        match effect {
            InventoryEffect::None => {}
            InventoryEffect::Release => {
                InventoryService::release(txn, current.inventory_id, current.quantity).await?
            }
            InventoryEffect::Commit => {
                InventoryService::commit(txn, current.inventory_id, current.quantity).await?
            }
        }

        record_history(
            txn,
            reservation_id,
            Some(current.status),
            change.target,
            actor.user_id,
            change.reason.clone(),
            now,
        )
        .await?;

        let recipient = notification_recipient(change.target, actor, &current, owner_id);
        let updated = reservation::Model {
            status: change.target,
            version: current.version + 1,
            updated_at: now,
            ..current
        };

        Ok(AppliedChange {
            notify: ReservationEvent::new(
                EventType::for_status(change.target),
                updated.id,
                recipient,
            ),
            reservation: updated,
        })
    }

    /// Reads one reservation. Visible to its customer, the store owner and admins.
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn get(
        &self,
        reservation_id: Uuid,
        actor: &Actor,
    ) -> Result<reservation::Model, ServiceError> {
        let db = &*self.db_pool;
        let found = find_reservation(db, reservation_id).await?;
        let store = find_store(db, found.store_id).await?;

        if !ActorRelation::of(actor, found.customer_id, store.owner_id).is_party() {
            return Err(ServiceError::Unauthorized(
                "reservation belongs to another customer and store".to_string(),
            ));
        }
        Ok(found)
    }

    /// Status changes of one reservation, oldest first.
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn history(
        &self,
        reservation_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<reservation_status_history::Model>, ServiceError> {
        self.get(reservation_id, actor).await?;

        HistoryEntity::find()
            .filter(reservation_status_history::Column::ReservationId.eq(reservation_id))
            .order_by_asc(reservation_status_history::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// A customer's reservations, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_customer(
        &self,
        customer_id: Uuid,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<reservation::Model>, ServiceError> {
        let mut query =
            ReservationEntity::find().filter(reservation::Column::CustomerId.eq(customer_id));
        if let Some(status) = status {
            query = query.filter(reservation::Column::Status.eq(status));
        }

        query
            .order_by_desc(reservation::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Reservations against every store owned by `owner_id`, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_store_owner(
        &self,
        owner_id: Uuid,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<reservation::Model>, ServiceError> {
        let mut query = ReservationEntity::find()
            .inner_join(store::Entity)
            .filter(store::Column::OwnerId.eq(owner_id));
        if let Some(status) = status {
            query = query.filter(reservation::Column::Status.eq(status));
        }

        query
            .order_by_desc(reservation::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

async fn find_reservation<C: sea_orm::ConnectionTrait>(
    conn: &C,
    reservation_id: Uuid,
) -> Result<reservation::Model, ServiceError> {
    ReservationEntity::find_by_id(reservation_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Reservation {} not found", reservation_id)))
}

async fn record_history(
    txn: &DatabaseTransaction,
    reservation_id: Uuid,
    from_status: Option<ReservationStatus>,
    to_status: ReservationStatus,
    actor_id: Uuid,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    reservation_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        reservation_id: Set(reservation_id),
        from_status: Set(from_status),
        to_status: Set(to_status),
        actor_id: Set(actor_id),
        reason: Set(reason),
        created_at: Set(at),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;
    Ok(())
}

/// Who hears about a reservation entering `status`.
///
/// Owner decisions go to the customer; a cancellation goes to whichever
/// side did not cancel.
fn notification_recipient(
    status: ReservationStatus,
    actor: &Actor,
    reservation: &reservation::Model,
    store_owner_id: Uuid,
) -> Uuid {
    match status {
        ReservationStatus::Pending => store_owner_id,
        ReservationStatus::Cancelled if actor.user_id == reservation.customer_id => store_owner_id,
        _ => reservation.customer_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(customer_id: Uuid) -> reservation::Model {
        let now = Utc::now();
        reservation::Model {
            id: Uuid::new_v4(),
            inventory_id: Uuid::new_v4(),
            customer_id,
            store_id: Uuid::new_v4(),
            quantity: 1,
            pickup_time: now,
            status: ReservationStatus::Pending,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cancellation_notifies_the_other_side() {
        let customer = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let r = reservation(customer);

        assert_eq!(
            notification_recipient(ReservationStatus::Cancelled, &Actor::customer(customer), &r, owner),
            owner
        );
        assert_eq!(
            notification_recipient(ReservationStatus::Cancelled, &Actor::store_owner(owner), &r, owner),
            customer
        );
        assert_eq!(
            notification_recipient(ReservationStatus::Cancelled, &Actor::admin(Uuid::new_v4()), &r, owner),
            customer
        );
    }

    #[test]
    fn owner_decisions_notify_the_customer() {
        let customer = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let r = reservation(customer);
        for status in [
            ReservationStatus::Confirmed,
            ReservationStatus::Rejected,
            ReservationStatus::Completed,
        ] {
            assert_eq!(
                notification_recipient(status, &Actor::store_owner(owner), &r, owner),
                customer
            );
        }
    }

    #[test]
    fn status_change_builder() {
        let change = StatusChange::to(ReservationStatus::Cancelled)
            .with_reason("changed plans")
            .expecting_version(3);
        assert_eq!(change.reason.as_deref(), Some("changed plans"));
        assert_eq!(change.expected_version, Some(3));
    }
}
