//! Reservation status transition engine.
//!
//! Pure decision logic: given the current status, the requested target, the
//! caller's relation to the reservation and the configured policy, decide
//! whether the change is a no-op, which stock effect it carries, or why it is
//! refused. Persistence lives in [`super::reservations`].

use sea_orm::Iterable;
use uuid::Uuid;

use crate::auth::Actor;
use crate::config::ReservationPolicyConfig;
use crate::entities::reservation::ReservationStatus;
use crate::errors::ServiceError;

use ReservationStatus::*;

/// How the acting user relates to one reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActorRelation {
    /// The actor placed the reservation.
    pub is_customer: bool,
    /// The actor owns the store, or is an admin acting for it.
    pub is_owner: bool,
}

impl ActorRelation {
    pub fn of(actor: &Actor, customer_id: Uuid, store_owner_id: Uuid) -> Self {
        Self {
            is_customer: !actor.is_admin() && actor.user_id == customer_id,
            is_owner: actor.acts_for_owner(store_owner_id),
        }
    }

    pub fn is_party(&self) -> bool {
        self.is_customer || self.is_owner
    }
}

/// Business choices the state machine leaves open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub customer_may_cancel_confirmed: bool,
    pub owner_may_cancel_confirmed: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::from(&ReservationPolicyConfig::default())
    }
}

impl From<&ReservationPolicyConfig> for TransitionPolicy {
    fn from(cfg: &ReservationPolicyConfig) -> Self {
        Self {
            customer_may_cancel_confirmed: cfg.customer_may_cancel_confirmed,
            owner_may_cancel_confirmed: cfg.owner_may_cancel_confirmed,
        }
    }
}

/// Stock side effect of an applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryEffect {
    None,
    /// Give the held quantity back to available stock.
    Release,
    /// Consume the held quantity permanently.
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Target already reached; nothing to write, nothing to emit.
    NoOp,
    Apply(InventoryEffect),
}

/// Whether `from -> to` is an edge of the state machine.
pub fn is_valid_edge(from: ReservationStatus, to: ReservationStatus) -> bool {
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Rejected)
            | (Pending, Cancelled)
            | (Confirmed, Completed)
            | (Confirmed, Cancelled)
    )
}

/// Every status reachable from `from` in one step.
pub fn allowed_targets(from: ReservationStatus) -> &'static [ReservationStatus] {
    match from {
        Pending => &[Confirmed, Rejected, Cancelled],
        Confirmed => &[Completed, Cancelled],
        Completed | Cancelled | Rejected => &[],
    }
}

fn effect_of(to: ReservationStatus) -> InventoryEffect {
    match to {
        Rejected | Cancelled => InventoryEffect::Release,
        Completed => InventoryEffect::Commit,
        Pending | Confirmed => InventoryEffect::None,
    }
}

fn permitted(
    from: ReservationStatus,
    to: ReservationStatus,
    relation: ActorRelation,
    policy: TransitionPolicy,
) -> bool {
    match (from, to) {
        (Pending, Confirmed) | (Pending, Rejected) | (Confirmed, Completed) => relation.is_owner,
        (Pending, Cancelled) => relation.is_customer,
        (Confirmed, Cancelled) => {
            (relation.is_customer && policy.customer_may_cancel_confirmed)
                || (relation.is_owner && policy.owner_may_cancel_confirmed)
        }
        _ => false,
    }
}

/// Whether the actor's side may bring a reservation into `to` at all.
/// PENDING is entered by the customer placing the reservation.
fn may_reach(to: ReservationStatus, relation: ActorRelation, policy: TransitionPolicy) -> bool {
    match to {
        Pending => relation.is_customer,
        _ => ReservationStatus::iter()
            .any(|from| is_valid_edge(from, to) && permitted(from, to, relation, policy)),
    }
}

/// Decides what moving a reservation from `current` to `target` means.
///
/// Checks run in a fixed order: the actor must be a party to the
/// reservation, a repeated target is a no-op if the actor's side could have
/// moved it there, the edge must exist, and the actor's side must be allowed
/// to take it.
pub fn plan(
    current: ReservationStatus,
    target: ReservationStatus,
    relation: ActorRelation,
    policy: TransitionPolicy,
) -> Result<TransitionPlan, ServiceError> {
    if !relation.is_party() {
        return Err(ServiceError::Unauthorized(
            "actor is neither the customer nor the store owner".to_string(),
        ));
    }

    if current == target {
        if !may_reach(target, relation, policy) {
            return Err(ServiceError::Unauthorized(format!(
                "actor may not move a reservation to {}",
                target
            )));
        }
        return Ok(TransitionPlan::NoOp);
    }

    if !is_valid_edge(current, target) {
        return Err(ServiceError::InvalidTransition(format!(
            "{} -> {} is not allowed",
            current, target
        )));
    }

    if !permitted(current, target, relation, policy) {
        return Err(ServiceError::Unauthorized(format!(
            "actor may not move a reservation from {} to {}",
            current, target
        )));
    }

    Ok(TransitionPlan::Apply(effect_of(target)))
}
