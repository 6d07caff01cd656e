//! Property-based tests for the reservation state machine and stock
//! bookkeeping.
//!
//! The first group drives the pure transition planner; the second replays
//! random operation sequences against a real (in-memory) database.

mod common;

use proptest::prelude::*;
use surplus_api::{
    auth::Actor,
    entities::reservation::ReservationStatus::{self, *},
    services::transitions::{
        self, ActorRelation, InventoryEffect, TransitionPlan, TransitionPolicy,
    },
};
use uuid::Uuid;

fn status_strategy() -> impl Strategy<Value = ReservationStatus> {
    prop_oneof![
        Just(Pending),
        Just(Confirmed),
        Just(Completed),
        Just(Cancelled),
        Just(Rejected),
    ]
}

fn relation_strategy() -> impl Strategy<Value = ActorRelation> {
    (any::<bool>(), any::<bool>()).prop_map(|(is_customer, is_owner)| ActorRelation {
        is_customer,
        is_owner,
    })
}

fn policy_strategy() -> impl Strategy<Value = TransitionPolicy> {
    (any::<bool>(), any::<bool>()).prop_map(|(customer, owner)| TransitionPolicy {
        customer_may_cancel_confirmed: customer,
        owner_may_cancel_confirmed: owner,
    })
}

// Property: whatever is requested, the observed status path only follows
// state machine edges and stock bookkeeping never goes negative.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn observed_paths_follow_the_state_machine(
        requests in prop::collection::vec((status_strategy(), relation_strategy()), 1..30),
        policy in policy_strategy(),
        quantity in 1i32..10,
    ) {
        let mut status = Pending;
        let mut total = 20i32;
        let mut reserved = quantity;
        let mut path = vec![status];

        for (target, relation) in requests {
            match transitions::plan(status, target, relation, policy) {
                Ok(TransitionPlan::NoOp) => prop_assert_eq!(status, target),
                Ok(TransitionPlan::Apply(effect)) => {
                    prop_assert!(transitions::is_valid_edge(status, target));
                    prop_assert!(!status.is_terminal());
                    match effect {
                        InventoryEffect::None => {}
                        InventoryEffect::Release => reserved -= quantity,
                        InventoryEffect::Commit => {
                            reserved -= quantity;
                            total -= quantity;
                        }
                    }
                    status = target;
                    path.push(status);
                }
                Err(_) => {}
            }
            prop_assert!(0 <= reserved && reserved <= total);
            prop_assert_eq!(reserved > 0, status.holds_stock());
        }

        for pair in path.windows(2) {
            prop_assert!(transitions::is_valid_edge(pair[0], pair[1]));
        }
    }

    #[test]
    fn terminal_states_never_move(
        from in prop_oneof![Just(Completed), Just(Cancelled), Just(Rejected)],
        target in status_strategy(),
        relation in relation_strategy(),
        policy in policy_strategy(),
    ) {
        match transitions::plan(from, target, relation, policy) {
            Ok(TransitionPlan::Apply(_)) => prop_assert!(false, "{} -> {} was applied", from, target),
            Ok(TransitionPlan::NoOp) => prop_assert_eq!(from, target),
            Err(_) => {}
        }
    }

    #[test]
    fn outsiders_are_always_refused(
        from in status_strategy(),
        target in status_strategy(),
        policy in policy_strategy(),
    ) {
        let outsider = ActorRelation { is_customer: false, is_owner: false };
        prop_assert!(transitions::plan(from, target, outsider, policy).is_err());
    }
}

#[derive(Debug, Clone)]
enum Op {
    Reserve(i32),
    Confirm(usize),
    Reject(usize),
    Cancel(usize),
    Complete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1i32..4).prop_map(Op::Reserve),
        1 => any::<usize>().prop_map(Op::Confirm),
        1 => any::<usize>().prop_map(Op::Reject),
        1 => any::<usize>().prop_map(Op::Cancel),
        1 => any::<usize>().prop_map(Op::Complete),
    ]
}

// Property: against the database, reserved stock always equals the sum held
// by live reservations and never exceeds the total.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn stock_matches_live_reservations(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let app = common::TestApp::new().await;
            let owner = Actor::store_owner(Uuid::new_v4());
            let customer = Actor::customer(Uuid::new_v4());
            let store = app.seed_store(owner.user_id).await;
            let item = app.seed_item(&store, 8).await;
            let ledger = &app.state.reservations;
            let mut ids: Vec<Uuid> = Vec::new();

            for op in ops {
                let (index, target, actor) = match op {
                    Op::Reserve(quantity) => {
                        if let Ok(created) = app.reserve(&customer, &item, quantity).await {
                            ids.push(created.id);
                        }
                        (None, Pending, &customer)
                    }
                    Op::Confirm(i) => (Some(i), Confirmed, &owner),
                    Op::Reject(i) => (Some(i), Rejected, &owner),
                    Op::Complete(i) => (Some(i), Completed, &owner),
                    Op::Cancel(i) => (Some(i), Cancelled, &customer),
                };
                if let Some(i) = index {
                    if !ids.is_empty() {
                        let id = ids[i % ids.len()];
                        let _ = ledger.update_status(id, target, actor).await;
                    }
                }

                let stock = app.item(item.id).await;
                assert!(0 <= stock.reserved_quantity);
                assert!(stock.reserved_quantity <= stock.total_quantity);

                let mine = ledger.list_by_customer(customer.user_id, None).await.unwrap();
                let held: i32 = mine
                    .iter()
                    .filter(|r| r.status.holds_stock())
                    .map(|r| r.quantity)
                    .sum();
                let consumed: i32 = mine
                    .iter()
                    .filter(|r| r.status == Completed)
                    .map(|r| r.quantity)
                    .sum();
                assert_eq!(stock.reserved_quantity, held);
                assert_eq!(stock.total_quantity, 8 - consumed);
            }
        });
    }
}
