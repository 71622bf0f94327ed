//! Ownership aggregation over every arrival order.

use std::rc::Rc;

use geograin::directory::{
    ActivationPrecedence, ActivationResponse, GlobalSingleInstanceResponseTracker, GrainId,
    HashedPrecedence, OwnershipOutcome,
};
use geograin::identity::IdentityInterner;

use super::common::{activation, silo};

fn grain() -> GrainId {
    GrainId::new("Chat", "room-1")
}

/// Every ordering of `0..n`.
fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut all = Vec::new();
    for rest in permutations(n - 1) {
        for position in 0..=rest.len() {
            let mut order = rest.clone();
            order.insert(position, n - 1);
            all.push(order);
        }
    }
    all
}

/// Feed `responses` in `order`. Returns the outcome and how many responses
/// had arrived when it resolved.
fn aggregate(responses: &[ActivationResponse], order: &[usize]) -> (OwnershipOutcome, usize) {
    let (mut tracker, mut receiver) =
        GlobalSingleInstanceResponseTracker::new(grain(), responses.len(), Rc::new(HashedPrecedence));
    tracker.notify();

    let mut resolved_after = None;
    for (arrived, slot) in order.iter().enumerate() {
        if tracker.record(*slot, responses[*slot].clone()).is_some() && resolved_after.is_none() {
            resolved_after = Some(arrived + 1);
        }
    }

    let outcome = receiver.try_recv().expect("outcome delivered");
    (outcome, resolved_after.expect("resolved"))
}

#[test]
fn test_unanimous_pass_succeeds_only_when_complete() {
    let responses = vec![ActivationResponse::Pass; 4];
    for order in permutations(responses.len()) {
        let (outcome, resolved_after) = aggregate(&responses, &order);
        assert_eq!(outcome, OwnershipOutcome::Succeed, "order {order:?}");
        assert_eq!(resolved_after, responses.len(), "order {order:?}");
    }
}

#[test]
fn test_no_remote_clusters_succeeds_immediately() {
    let (mut tracker, mut receiver) =
        GlobalSingleInstanceResponseTracker::new(grain(), 0, Rc::new(HashedPrecedence));
    tracker.notify();
    assert_eq!(
        receiver.try_recv().expect("resolved"),
        OwnershipOutcome::Succeed
    );
}

#[test]
fn test_definite_owner_wins_in_any_order() {
    let interner = IdentityInterner::new();
    let owner = activation(&grain(), silo(&interner, 2, "us"), 7);
    let responses = vec![
        ActivationResponse::Pass,
        ActivationResponse::owned_by(owner.clone(), 3, Some("us".into())),
        ActivationResponse::timed_out(Some("asia".into())),
        ActivationResponse::refused(Some("au".into())),
    ];

    for order in permutations(responses.len()) {
        let (outcome, resolved_after) = aggregate(&responses, &order);
        let OwnershipOutcome::RemoteOwner(claim) = outcome else {
            panic!("order {order:?}: expected remote owner, got {outcome:?}");
        };
        assert_eq!(claim.address.as_ref(), Some(&owner));
        assert_eq!(claim.cluster.as_deref(), Some("us"));

        let owner_position = order.iter().position(|slot| *slot == 1).expect("slot present");
        assert_eq!(
            resolved_after,
            owner_position + 1,
            "order {order:?}: resolves as soon as the owner answers"
        );
    }
}

#[test]
fn test_no_claim_and_no_unanimity_is_inconclusive() {
    let responses = vec![
        ActivationResponse::Pass,
        ActivationResponse::refused(Some("us".into())),
        ActivationResponse::timed_out(Some("asia".into())),
    ];
    for order in permutations(responses.len()) {
        let (outcome, resolved_after) = aggregate(&responses, &order);
        assert_eq!(outcome, OwnershipOutcome::Inconclusive, "order {order:?}");
        assert_eq!(resolved_after, responses.len());
    }
}

#[test]
fn test_competing_candidates_resolve_by_precedence_in_any_order() {
    let interner = IdentityInterner::new();
    let clusters = ["us", "asia", "au"];
    let mut responses: Vec<ActivationResponse> = clusters
        .iter()
        .enumerate()
        .map(|(i, cluster)| {
            let address = activation(&grain(), silo(&interner, i as u8 + 1, cluster), i as u64);
            ActivationResponse::candidate(address, 1, Some((*cluster).to_string()))
        })
        .collect();
    responses.push(ActivationResponse::Pass);

    let precedence = HashedPrecedence;
    let expected = clusters
        .iter()
        .copied()
        .reduce(|best, next| {
            if precedence.precedes(&grain(), next, best) {
                next
            } else {
                best
            }
        })
        .expect("non-empty");

    for order in permutations(responses.len()) {
        let (outcome, _) = aggregate(&responses, &order);
        let OwnershipOutcome::RemoteOwnerLikely(claim) = outcome else {
            panic!("order {order:?}: expected likely owner, got {outcome:?}");
        };
        assert_eq!(claim.cluster.as_deref(), Some(expected), "order {order:?}");
    }
}

#[test]
fn test_duplicate_owners_are_reported_but_first_arrival_wins() {
    let interner = IdentityInterner::new();
    let low = activation(&grain(), silo(&interner, 1, "us"), 1);
    let high = activation(&grain(), silo(&interner, 2, "asia"), 2);
    let responses = vec![
        ActivationResponse::owned_by(low.clone(), 1, Some("us".into())),
        ActivationResponse::owned_by(high.clone(), 1, Some("asia".into())),
        ActivationResponse::Pass,
    ];

    for order in permutations(responses.len()) {
        let (mut tracker, _receiver) =
            GlobalSingleInstanceResponseTracker::new(grain(), 3, Rc::new(HashedPrecedence));
        for slot in &order {
            tracker.record(*slot, responses[*slot].clone());
        }

        assert_eq!(tracker.violations().len(), 1, "order {order:?}");
        assert_eq!(tracker.violations()[0].claims, 2);
        let Some(OwnershipOutcome::RemoteOwner(claim)) = tracker.outcome() else {
            panic!("order {order:?}: expected remote owner");
        };
        let first_owner = order
            .iter()
            .copied()
            .find(|slot| *slot < 2)
            .expect("an owner slot");
        let expected = if first_owner == 0 { &low } else { &high };
        assert_eq!(claim.address.as_ref(), Some(expected), "order {order:?}");
    }
}
