mod common;

use assert_matches::assert_matches;
use common::TestApp;
use std::sync::Arc;
use surplus_api::{
    auth::Actor,
    config::ReservationPolicyConfig,
    entities::reservation::ReservationStatus::{self, *},
    errors::ServiceError,
    events::EventType,
    services::StatusChange,
};
use tokio::sync::Barrier;
use uuid::Uuid;

struct Scene {
    app: TestApp,
    owner: Actor,
    customer: Actor,
    item_id: Uuid,
    reservation_id: Uuid,
}

/// A store with 5 units and one PENDING reservation for 2 of them.
async fn scene_with(policy: ReservationPolicyConfig) -> Scene {
    let app = TestApp::with_policy(policy).await;
    let owner = Actor::store_owner(Uuid::new_v4());
    let customer = Actor::customer(Uuid::new_v4());
    let store = app.seed_store(owner.user_id).await;
    let item = app.seed_item(&store, 5).await;
    let reservation = app.reserve(&customer, &item, 2).await.unwrap();

    Scene {
        app,
        owner,
        customer,
        item_id: item.id,
        reservation_id: reservation.id,
    }
}

async fn scene() -> Scene {
    scene_with(ReservationPolicyConfig::default()).await
}

impl Scene {
    async fn move_to(
        &self,
        target: ReservationStatus,
        actor: &Actor,
    ) -> Result<surplus_api::entities::reservation::Model, ServiceError> {
        self.app
            .state
            .reservations
            .update_status(self.reservation_id, target, actor)
            .await
    }

    async fn stock(&self) -> (i32, i32) {
        let item = self.app.item(self.item_id).await;
        (item.total_quantity, item.reserved_quantity)
    }
}

#[tokio::test]
async fn confirm_then_complete_consumes_stock() {
    let s = scene().await;
    assert_eq!(s.stock().await, (5, 2));

    let confirmed = s.move_to(Confirmed, &s.owner).await.unwrap();
    assert_eq!(confirmed.status, Confirmed);
    assert_eq!(confirmed.version, 2);
    assert_eq!(s.stock().await, (5, 2), "confirming holds stock unchanged");

    let completed = s.move_to(Completed, &s.owner).await.unwrap();
    assert_eq!(completed.status, Completed);
    assert_eq!(s.stock().await, (3, 0));
}

#[tokio::test]
async fn customer_cancel_releases_the_hold() {
    let s = scene().await;

    let cancelled = s.move_to(Cancelled, &s.customer).await.unwrap();
    assert_eq!(cancelled.status, Cancelled);
    assert_eq!(s.stock().await, (5, 0));
}

#[tokio::test]
async fn owner_rejection_releases_the_hold() {
    let s = scene().await;

    let rejected = s.move_to(Rejected, &s.owner).await.unwrap();
    assert_eq!(rejected.status, Rejected);
    assert_eq!(s.stock().await, (5, 0));
}

#[tokio::test]
async fn completed_reservation_cannot_go_back() {
    let s = scene().await;
    s.move_to(Confirmed, &s.owner).await.unwrap();
    let completed = s.move_to(Completed, &s.owner).await.unwrap();

    for target in [Confirmed, Pending, Cancelled, Rejected] {
        let result = s.move_to(target, &s.owner).await;
        assert_matches!(result, Err(ServiceError::InvalidTransition(_)));
    }

    let unchanged = s
        .app
        .state
        .reservations
        .get(s.reservation_id, &s.owner)
        .await
        .unwrap();
    assert_eq!(unchanged.status, Completed);
    assert_eq!(unchanged.version, completed.version);
    assert_eq!(s.stock().await, (3, 0));
}

#[tokio::test]
async fn repeated_confirm_is_a_no_op() {
    let mut s = scene().await;
    s.app.drain_events();

    let first = s.move_to(Confirmed, &s.owner).await.unwrap();
    let second = s.move_to(Confirmed, &s.owner).await.unwrap();
    assert_eq!(first.version, second.version);
    assert_eq!(second.status, Confirmed);

    let events = s.app.drain_events();
    assert_eq!(events.len(), 1, "a no-op must not notify again");
    assert_eq!(events[0].event_type, EventType::ReservationConfirmed);
    assert_eq!(events[0].recipient_id, s.customer.user_id);
}

#[tokio::test]
async fn repeating_a_status_still_checks_the_side() {
    let mut s = scene().await;
    let confirmed = s.move_to(Confirmed, &s.owner).await.unwrap();
    s.app.drain_events();

    let result = s.move_to(Confirmed, &s.customer).await;
    assert_matches!(result, Err(ServiceError::Unauthorized(_)));

    let unchanged = s
        .app
        .state
        .reservations
        .get(s.reservation_id, &s.owner)
        .await
        .unwrap();
    assert_eq!(unchanged.version, confirmed.version);
    assert!(s.app.drain_events().is_empty());
}

#[tokio::test]
async fn repeated_cancel_releases_once() {
    let s = scene().await;
    s.move_to(Cancelled, &s.customer).await.unwrap();
    s.move_to(Cancelled, &s.customer).await.unwrap();
    assert_eq!(s.stock().await, (5, 0));

    let history = s
        .app
        .state
        .reservations
        .history(s.reservation_id, &s.customer)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn repeated_complete_commits_once() {
    let s = scene().await;
    s.move_to(Confirmed, &s.owner).await.unwrap();
    s.move_to(Completed, &s.owner).await.unwrap();
    s.move_to(Completed, &s.owner).await.unwrap();
    assert_eq!(s.stock().await, (3, 0));
}

#[tokio::test]
async fn history_records_the_path_taken() {
    let s = scene().await;
    s.app
        .state
        .reservations
        .apply_status_change(
            s.reservation_id,
            StatusChange::to(Confirmed).with_reason("see you at six"),
            &s.owner,
        )
        .await
        .unwrap();
    s.move_to(Completed, &s.owner).await.unwrap();

    let history = s
        .app
        .state
        .reservations
        .history(s.reservation_id, &s.customer)
        .await
        .unwrap();
    let path: Vec<(Option<ReservationStatus>, ReservationStatus)> = history
        .iter()
        .map(|row| (row.from_status, row.to_status))
        .collect();
    assert_eq!(
        path,
        vec![
            (None, Pending),
            (Some(Pending), Confirmed),
            (Some(Confirmed), Completed),
        ]
    );
    assert_eq!(history[0].actor_id, s.customer.user_id);
    assert_eq!(history[1].actor_id, s.owner.user_id);
    assert_eq!(history[1].reason.as_deref(), Some("see you at six"));
}

#[tokio::test]
async fn customer_cannot_confirm_or_complete() {
    let s = scene().await;

    assert_matches!(
        s.move_to(Confirmed, &s.customer).await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_matches!(
        s.move_to(Rejected, &s.customer).await,
        Err(ServiceError::Unauthorized(_))
    );

    s.move_to(Confirmed, &s.owner).await.unwrap();
    assert_matches!(
        s.move_to(Completed, &s.customer).await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_eq!(s.stock().await, (5, 2));
}

#[tokio::test]
async fn strangers_may_not_touch_or_see_the_reservation() {
    let s = scene().await;
    let other_owner = Actor::store_owner(Uuid::new_v4());
    let other_customer = Actor::customer(Uuid::new_v4());

    assert_matches!(
        s.move_to(Confirmed, &other_owner).await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_matches!(
        s.move_to(Cancelled, &other_customer).await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_matches!(
        s.app
            .state
            .reservations
            .get(s.reservation_id, &other_customer)
            .await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_eq!(s.stock().await, (5, 2));
}

#[tokio::test]
async fn admin_acts_for_the_owner() {
    let s = scene().await;
    let admin = Actor::admin(Uuid::new_v4());

    s.move_to(Confirmed, &admin).await.unwrap();
    s.move_to(Completed, &admin).await.unwrap();
    assert_eq!(s.stock().await, (3, 0));
}

#[tokio::test]
async fn pending_cancel_belongs_to_the_customer() {
    let s = scene().await;
    assert_matches!(
        s.move_to(Cancelled, &s.owner).await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_eq!(s.stock().await, (5, 2));
}

#[tokio::test]
async fn confirmed_cancel_follows_default_policy() {
    let mut s = scene().await;
    s.move_to(Confirmed, &s.owner).await.unwrap();

    assert_matches!(
        s.move_to(Cancelled, &s.customer).await,
        Err(ServiceError::Unauthorized(_))
    );
    s.app.drain_events();

    s.move_to(Cancelled, &s.owner).await.unwrap();
    assert_eq!(s.stock().await, (5, 0));

    let events = s.app.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ReservationCancelled);
    assert_eq!(events[0].recipient_id, s.customer.user_id);
}

#[tokio::test]
async fn confirmed_cancel_can_be_opened_to_customers() {
    let mut s = scene_with(ReservationPolicyConfig {
        customer_may_cancel_confirmed: true,
        owner_may_cancel_confirmed: false,
        ..Default::default()
    })
    .await;
    s.move_to(Confirmed, &s.owner).await.unwrap();

    assert_matches!(
        s.move_to(Cancelled, &s.owner).await,
        Err(ServiceError::Unauthorized(_))
    );
    s.app.drain_events();

    s.move_to(Cancelled, &s.customer).await.unwrap();
    assert_eq!(s.stock().await, (5, 0));

    let events = s.app.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].recipient_id, s.owner.user_id);
}

#[tokio::test]
async fn stale_expected_version_is_a_conflict() {
    let s = scene().await;
    let ledger = &s.app.state.reservations;

    let result = ledger
        .apply_status_change(
            s.reservation_id,
            StatusChange::to(Confirmed).expecting_version(7),
            &s.owner,
        )
        .await;
    let err = result.unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert!(err.is_retryable());

    let confirmed = ledger
        .apply_status_change(
            s.reservation_id,
            StatusChange::to(Confirmed).expecting_version(1),
            &s.owner,
        )
        .await
        .unwrap();
    assert_eq!(confirmed.version, 2);
}

#[tokio::test]
async fn overlong_reason_is_rejected() {
    let s = scene().await;
    let result = s
        .app
        .state
        .reservations
        .apply_status_change(
            s.reservation_id,
            StatusChange::to(Cancelled).with_reason("x".repeat(501)),
            &s.customer,
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(s.stock().await, (5, 2));
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let s = scene().await;
    let result = s
        .app
        .state
        .reservations
        .update_status(Uuid::new_v4(), Confirmed, &s.owner)
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn lists_are_scoped_filtered_and_newest_first() {
    let app = TestApp::new().await;
    let owner = Actor::store_owner(Uuid::new_v4());
    let customer = Actor::customer(Uuid::new_v4());
    let store = app.seed_store(owner.user_id).await;
    let item = app.seed_item(&store, 10).await;

    let other_store = app.seed_store(Uuid::new_v4()).await;
    let other_item = app.seed_item(&other_store, 10).await;

    let first = app.reserve(&customer, &item, 1).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = app.reserve(&customer, &item, 1).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let elsewhere = app.reserve(&customer, &other_item, 1).await.unwrap();

    app.state
        .reservations
        .update_status(first.id, Confirmed, &owner)
        .await
        .unwrap();

    let ledger = &app.state.reservations;

    let mine: Vec<Uuid> = ledger
        .list_by_customer(customer.user_id, None)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(mine, vec![elsewhere.id, second.id, first.id]);

    let for_owner: Vec<Uuid> = ledger
        .list_by_store_owner(owner.user_id, None)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(for_owner, vec![second.id, first.id]);

    let confirmed = ledger
        .list_by_store_owner(owner.user_id, Some(Confirmed))
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].id, first.id);

    let pending = ledger
        .list_by_customer(customer.user_id, Some(Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    let nobody = ledger
        .list_by_customer(Uuid::new_v4(), None)
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_status_changes_leave_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let app = TestApp::pooled_on_disk(dir.path(), 8).await;
    let owner = Actor::store_owner(Uuid::new_v4());
    let customer = Actor::customer(Uuid::new_v4());
    let store = app.seed_store(owner.user_id).await;

    for round in 0..20 {
        let item = app.seed_item(&store, 2).await;
        let reservation = app.reserve(&customer, &item, 1).await.unwrap();
        let start = Arc::new(Barrier::new(2));

        let mut tasks = Vec::new();
        for (target, actor) in [(Confirmed, owner), (Cancelled, customer)] {
            let ledger = app.state.reservations.clone();
            let start = start.clone();
            let id = reservation.id;
            tasks.push(tokio::spawn(async move {
                start.wait().await;
                ledger.update_status(id, target, &actor).await
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(updated) => winners.push(updated.status),
                // The loser either lost the version race or saw the winner's status
                Err(
                    ServiceError::Conflict(_)
                    | ServiceError::Unauthorized(_)
                    | ServiceError::InvalidTransition(_),
                ) => {}
                Err(other) => panic!("round {round}: unexpected error: {other}"),
            }
        }
        assert_eq!(winners.len(), 1, "round {round}");

        let stored = app
            .state
            .reservations
            .get(reservation.id, &owner)
            .await
            .unwrap();
        assert_eq!(stored.status, winners[0]);
        assert_eq!(stored.version, 2);
        let expected_held = if stored.status.holds_stock() { 1 } else { 0 };
        assert_eq!(app.item(item.id).await.reserved_quantity, expected_held);
    }
}
