//! Aggregation of per-cluster ownership votes.
//!
//! A [`GlobalSingleInstanceResponseTracker`] has one slot per remote
//! cluster. Each arriving response fills its slot and re-evaluates:
//!
//! 1. every slot holds `Pass` → [`OwnershipOutcome::Succeed`];
//! 2. some slot holds `Failed { owned: true }` → [`OwnershipOutcome::RemoteOwner`],
//!    immediately, without waiting for the other slots;
//! 3. every slot filled, no definite owner → the best claimed activation by
//!    [`ActivationPrecedence`] gives [`OwnershipOutcome::RemoteOwnerLikely`],
//!    otherwise [`OwnershipOutcome::Inconclusive`].
//!
//! The outcome resolves once. Later responses are still recorded, but never
//! change it.
//!
//! The tracker performs no networking and no timeouts: the caller must
//! fill slots of unreachable clusters with
//! [`ActivationResponse::timed_out`].

use std::rc::Rc;

use tokio::sync::oneshot;

use super::precedence::ActivationPrecedence;
use super::types::{ActivationResponse, GrainId, RemoteClaim};
use crate::error::AggregationViolation;

/// Resolution of one ownership round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipOutcome {
    /// No other cluster has or wants an activation.
    Succeed,
    /// Another cluster definitely owns the grain.
    RemoteOwner(RemoteClaim),
    /// The best candidate among competing claims.
    RemoteOwnerLikely(RemoteClaim),
    /// No owner could be identified, but not every cluster passed.
    Inconclusive,
}

/// Collects one response per remote cluster and resolves ownership once.
#[derive(Debug)]
pub struct GlobalSingleInstanceResponseTracker {
    grain: GrainId,
    responses: Vec<Option<ActivationResponse>>,
    precedence: Rc<dyn ActivationPrecedence>,
    outcome: Option<OwnershipOutcome>,
    sender: Option<oneshot::Sender<OwnershipOutcome>>,
    violations: Vec<AggregationViolation>,
}

impl GlobalSingleInstanceResponseTracker {
    /// Create a tracker with `slots` empty slots, plus the receiver its
    /// outcome is delivered to.
    pub fn new(
        grain: GrainId,
        slots: usize,
        precedence: Rc<dyn ActivationPrecedence>,
    ) -> (Self, oneshot::Receiver<OwnershipOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let tracker = Self {
            grain,
            responses: vec![None; slots],
            precedence,
            outcome: None,
            sender: Some(sender),
            violations: Vec::new(),
        };
        (tracker, receiver)
    }

    /// Fill `slot` and re-evaluate. Returns the outcome once resolved.
    ///
    /// A slot that already holds a response, or an index out of range, is
    /// ignored.
    pub fn record(
        &mut self,
        slot: usize,
        response: ActivationResponse,
    ) -> Option<&OwnershipOutcome> {
        match self.responses.get(slot) {
            Some(None) => {
                self.responses[slot] = Some(response);
                self.check_duplicate_owner();
            }
            Some(Some(_)) => {
                tracing::debug!(grain = %self.grain, slot, "duplicate ownership response ignored");
            }
            None => {
                tracing::warn!(grain = %self.grain, slot, "ownership response for unknown slot");
            }
        }
        self.notify();
        self.outcome.as_ref()
    }

    fn check_duplicate_owner(&mut self) {
        let claims = self
            .responses
            .iter()
            .flatten()
            .filter(|r| matches!(r, ActivationResponse::Failed { owned: true, .. }))
            .count();
        let already_reported = self
            .violations
            .last()
            .is_some_and(|violation| violation.claims >= claims);
        if claims > 1 && !already_reported {
            let violation = AggregationViolation {
                grain: self.grain.clone(),
                claims,
            };
            tracing::error!(grain = %self.grain, claims, "{violation}");
            self.violations.push(violation);
        }
    }

    /// Re-evaluate the filled slots. No-op once resolved.
    pub fn notify(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let Some(outcome) = self.evaluate() else {
            return;
        };
        tracing::debug!(grain = %self.grain, ?outcome, "ownership round resolved");
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(outcome.clone());
        }
        self.outcome = Some(outcome);
    }

    fn evaluate(&self) -> Option<OwnershipOutcome> {
        if self
            .responses
            .iter()
            .all(|r| r.as_ref().is_some_and(ActivationResponse::is_pass))
        {
            return Some(OwnershipOutcome::Succeed);
        }

        let owner = self.responses.iter().flatten().find_map(|r| match r {
            ActivationResponse::Failed { owned: true, claim } => Some(claim.clone()),
            _ => None,
        });
        if let Some(claim) = owner {
            return Some(OwnershipOutcome::RemoteOwner(claim));
        }

        if self.responses.iter().any(Option::is_none) {
            return None;
        }

        let mut best: Option<&RemoteClaim> = None;
        for response in self.responses.iter().flatten() {
            let ActivationResponse::Failed { claim, .. } = response else {
                continue;
            };
            if claim.address.is_none() {
                continue;
            }
            best = match best {
                None => Some(claim),
                Some(current) => {
                    let candidate = claim.cluster.as_deref().unwrap_or("");
                    let incumbent = current.cluster.as_deref().unwrap_or("");
                    if self.precedence.precedes(&self.grain, candidate, incumbent) {
                        Some(claim)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        Some(match best {
            Some(claim) => OwnershipOutcome::RemoteOwnerLikely(claim.clone()),
            None => OwnershipOutcome::Inconclusive,
        })
    }

    /// The grain being voted on.
    pub fn grain(&self) -> &GrainId {
        &self.grain
    }

    /// Outcome, once resolved.
    pub fn outcome(&self) -> Option<&OwnershipOutcome> {
        self.outcome.as_ref()
    }

    /// Whether the outcome has resolved.
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Responses recorded so far, by slot.
    pub fn responses(&self) -> &[Option<ActivationResponse>] {
        &self.responses
    }

    /// Duplicate-owner violations observed.
    pub fn violations(&self) -> &[AggregationViolation] {
        &self.violations
    }
}
