//! Global single-instance registration.
//!
//! Guarantees at most one activation of a grain across all clusters, with
//! an optimistic protocol:
//!
//! 1. register locally as [`ActivationStatus::RequestedOwnership`];
//! 2. ask every remote cluster, feeding answers into a
//!    [`GlobalSingleInstanceResponseTracker`] as they arrive;
//! 3. on `Succeed` become [`ActivationStatus::Owned`]; on a remote owner
//!    cache it and hand it back; when only unreachable clusters stood in the
//!    way settle as [`ActivationStatus::Doubtful`]; otherwise wait and retry;
//! 4. after the last round, settle as doubtful.
//!
//! Doubtful activations are revisited later by the
//! [`DoubtfulActivationMaintainer`].
//!
//! The other side of the protocol is
//! [`GlobalSingleInstanceRegistrar::process_activation_request`], which
//! answers a remote cluster's request from the local partition. Two clusters
//! requesting ownership concurrently are ordered by
//! [`ActivationPrecedence`]; the loser marks itself
//! [`ActivationStatus::RaceLoser`] and retries.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use futures::stream::{FuturesUnordered, StreamExt};

use super::partition::DirectoryPartition;
use super::precedence::ActivationPrecedence;
use super::tracker::{GlobalSingleInstanceResponseTracker, OwnershipOutcome};
use super::types::{ActivationAddress, ActivationResponse, ActivationStatus, GrainId, RemoteClaim};
use crate::config::RegistrarConfig;
use crate::error::{AggregationViolation, RegistrarError, WorkerError};
use crate::worker::{BatchWork, BatchWorker};

/// Directories of the other clusters, as reached through the RPC layer.
///
/// Implementations own timeouts. A request that fails or times out
/// returns an error; the registrar records it as a faulted vote.
#[async_trait::async_trait(?Send)]
pub trait RemoteClusterDirectory: fmt::Debug {
    /// Clusters to consult, excluding the local one.
    fn remote_clusters(&self) -> Vec<String>;

    /// Ask `cluster` whether `requesting_cluster` may own `address.grain`.
    async fn request_activation(
        &self,
        cluster: &str,
        address: &ActivationAddress,
        requesting_cluster: &str,
    ) -> Result<ActivationResponse, RegistrarError>;
}

/// Registrar enforcing one activation per grain across all clusters.
#[derive(Debug)]
pub struct GlobalSingleInstanceRegistrar {
    partition: Rc<DirectoryPartition>,
    cluster: String,
    remotes: Rc<dyn RemoteClusterDirectory>,
    precedence: Rc<dyn ActivationPrecedence>,
    config: RegistrarConfig,
    violations: RefCell<Vec<AggregationViolation>>,
}

impl GlobalSingleInstanceRegistrar {
    /// Create a registrar for the local `cluster`.
    pub fn new(
        partition: Rc<DirectoryPartition>,
        cluster: impl Into<String>,
        remotes: Rc<dyn RemoteClusterDirectory>,
        precedence: Rc<dyn ActivationPrecedence>,
        config: RegistrarConfig,
    ) -> Self {
        Self {
            partition,
            cluster: cluster.into(),
            remotes,
            precedence,
            config,
            violations: RefCell::new(Vec::new()),
        }
    }

    /// The local cluster tag.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// The local partition.
    pub fn partition(&self) -> &Rc<DirectoryPartition> {
        &self.partition
    }

    /// Duplicate-owner violations seen across every ownership round.
    pub fn violations(&self) -> Ref<'_, [AggregationViolation]> {
        Ref::map(self.violations.borrow(), Vec::as_slice)
    }

    /// Register `address`, coordinating with remote clusters when it must
    /// be the single activation.
    ///
    /// Returns the activation callers should use, which may live in another
    /// cluster, and the local entry etag. Each round waits for every remote
    /// cluster to answer or fail, even once its outcome is known.
    pub async fn register(
        &self,
        address: &ActivationAddress,
        single_activation: bool,
    ) -> (ActivationAddress, u64) {
        if !single_activation {
            return (address.clone(), self.partition.add_activation(address));
        }

        let (winner, mut etag) = self
            .partition
            .add_single_activation(address, ActivationStatus::RequestedOwnership);
        if winner != *address {
            return (winner, etag);
        }

        for round in 0..self.config.ownership_retries() {
            if round > 0 {
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            match self.partition.status_of(address) {
                Some(ActivationStatus::RaceLoser) => {
                    etag = self.set_status(address, ActivationStatus::RequestedOwnership, etag);
                }
                Some(_) => {}
                None => {
                    // Replaced while we waited, typically by a cached remote owner.
                    return self.current_registration(address, etag);
                }
            }

            let (outcome, responses) = self.run_round(address).await;
            tracing::debug!(grain = %address.grain, round, ?outcome, "ownership round finished");

            match outcome {
                OwnershipOutcome::Succeed => {
                    if self.partition.status_of(address)
                        == Some(ActivationStatus::RequestedOwnership)
                    {
                        etag = self.set_status(address, ActivationStatus::Owned, etag);
                        tracing::info!(grain = %address.grain, cluster = %self.cluster, "grain owned");
                        return (address.clone(), etag);
                    }
                }
                OwnershipOutcome::RemoteOwner(claim) | OwnershipOutcome::RemoteOwnerLikely(claim) => {
                    if let Some(remote) = self.adopt_remote(&claim) {
                        return remote;
                    }
                }
                OwnershipOutcome::Inconclusive => {
                    let only_unreachable = responses.iter().flatten().all(|r| {
                        matches!(r, ActivationResponse::Pass | ActivationResponse::Faulted { .. })
                    });
                    if only_unreachable {
                        return self.settle_doubtful(address, etag);
                    }
                }
            }
        }

        self.settle_doubtful(address, etag)
    }

    /// Unregister exactly this activation.
    pub fn unregister(&self, address: &ActivationAddress, force: bool) -> bool {
        self.partition.remove_activation(address, force)
    }

    /// Remove every registration of `grain`.
    pub fn delete(&self, grain: &GrainId) -> bool {
        self.partition.remove_grain(grain)
    }

    /// Answer a remote cluster asking to own `requested.grain`.
    pub fn process_activation_request(
        &self,
        requested: &ActivationAddress,
        requesting_cluster: &str,
    ) -> ActivationResponse {
        let Some(entry) = self.partition.lookup(&requested.grain) else {
            return ActivationResponse::Pass;
        };
        let Some(primary) = entry.primary() else {
            return ActivationResponse::Pass;
        };

        let claim = || RemoteClaim {
            address: Some(primary.address.clone()),
            etag: Some(entry.etag),
            cluster: Some(self.cluster.clone()),
        };

        match primary.status {
            ActivationStatus::Owned => ActivationResponse::Failed {
                owned: true,
                claim: claim(),
            },
            ActivationStatus::Doubtful => ActivationResponse::Failed {
                owned: false,
                claim: claim(),
            },
            ActivationStatus::Cached | ActivationStatus::RaceLoser => ActivationResponse::Pass,
            ActivationStatus::RequestedOwnership => {
                if self
                    .precedence
                    .precedes(&requested.grain, &self.cluster, requesting_cluster)
                {
                    ActivationResponse::Failed {
                        owned: false,
                        claim: claim(),
                    }
                } else {
                    tracing::debug!(
                        grain = %requested.grain,
                        winner = requesting_cluster,
                        "lost ownership race"
                    );
                    self.partition
                        .update_status(&primary.address, ActivationStatus::RaceLoser);
                    ActivationResponse::Pass
                }
            }
        }
    }

    /// Re-run the protocol for every doubtful activation. Returns how many
    /// were settled.
    pub async fn resolve_doubtful(&self) -> usize {
        let mut settled = 0;
        for address in self
            .partition
            .activations_with_status(ActivationStatus::Doubtful)
        {
            let (outcome, _) = self.run_round(&address).await;
            match outcome {
                OwnershipOutcome::Succeed => {
                    if self.partition.status_of(&address) == Some(ActivationStatus::Doubtful) {
                        self.partition
                            .update_status(&address, ActivationStatus::Owned);
                        tracing::info!(grain = %address.grain, "doubtful activation now owned");
                        settled += 1;
                    }
                }
                OwnershipOutcome::RemoteOwner(claim) => {
                    if self.adopt_remote(&claim).is_some() {
                        settled += 1;
                    }
                }
                OwnershipOutcome::RemoteOwnerLikely(claim) => {
                    let remote_wins = claim.cluster.as_deref().is_some_and(|remote| {
                        self.precedence.precedes(&address.grain, remote, &self.cluster)
                    });
                    if remote_wins && self.adopt_remote(&claim).is_some() {
                        settled += 1;
                    }
                }
                OwnershipOutcome::Inconclusive => {}
            }
        }
        settled
    }

    /// A batch worker that runs [`Self::resolve_doubtful`] on notification.
    pub fn maintainer(self: &Rc<Self>) -> BatchWorker<DoubtfulActivationMaintainer> {
        BatchWorker::new(
            format!("doubtful-maintainer-{}", self.cluster),
            DoubtfulActivationMaintainer {
                registrar: Rc::clone(self),
                settled: Cell::new(0),
            },
        )
    }

    async fn run_round(
        &self,
        address: &ActivationAddress,
    ) -> (OwnershipOutcome, Vec<Option<ActivationResponse>>) {
        let clusters = self.remotes.remote_clusters();
        let (mut tracker, receiver) = GlobalSingleInstanceResponseTracker::new(
            address.grain.clone(),
            clusters.len(),
            Rc::clone(&self.precedence),
        );
        tracker.notify();

        let remotes = &self.remotes;
        let local = self.cluster.as_str();
        let mut requests: FuturesUnordered<_> = clusters
            .iter()
            .enumerate()
            .map(|(slot, cluster)| async move {
                let result = remotes.request_activation(cluster, address, local).await;
                (slot, cluster, result)
            })
            .collect();

        // Responses arriving after resolution cannot change the outcome but
        // still count towards duplicate-owner detection.
        while let Some((slot, cluster, result)) = requests.next().await {
            let response = result.unwrap_or_else(|err| {
                tracing::warn!(grain = %address.grain, cluster = %cluster, error = %err, "ownership request failed");
                ActivationResponse::Faulted {
                    cluster: Some(cluster.clone()),
                    reason: err.to_string(),
                }
            });
            tracker.record(slot, response);
        }
        drop(requests);

        let responses = tracker.responses().to_vec();
        self.violations
            .borrow_mut()
            .extend(tracker.violations().iter().cloned());
        drop(tracker);
        let outcome = receiver.await.unwrap_or(OwnershipOutcome::Inconclusive);
        (outcome, responses)
    }

    fn adopt_remote(&self, claim: &RemoteClaim) -> Option<(ActivationAddress, u64)> {
        let remote = claim.address.as_ref()?;
        let etag = self.partition.cache_remote_owner(remote);
        tracing::info!(
            grain = %remote.grain,
            owner = %remote,
            cluster = claim.cluster.as_deref().unwrap_or(""),
            "using remote owner"
        );
        Some((remote.clone(), etag))
    }

    fn set_status(&self, address: &ActivationAddress, status: ActivationStatus, etag: u64) -> u64 {
        self.partition.update_status(address, status).unwrap_or(etag)
    }

    fn settle_doubtful(&self, address: &ActivationAddress, etag: u64) -> (ActivationAddress, u64) {
        tracing::warn!(grain = %address.grain, cluster = %self.cluster, "ownership doubtful");
        let etag = self.set_status(address, ActivationStatus::Doubtful, etag);
        (address.clone(), etag)
    }

    fn current_registration(&self, address: &ActivationAddress, etag: u64) -> (ActivationAddress, u64) {
        match self.partition.lookup(&address.grain) {
            Some(entry) => match entry.primary() {
                Some(primary) => (primary.address.clone(), entry.etag),
                None => (address.clone(), etag),
            },
            None => (address.clone(), etag),
        }
    }
}

/// Background work revisiting doubtful activations.
#[derive(Debug)]
pub struct DoubtfulActivationMaintainer {
    registrar: Rc<GlobalSingleInstanceRegistrar>,
    settled: Cell<usize>,
}

impl DoubtfulActivationMaintainer {
    /// Total activations settled so far.
    pub fn settled(&self) -> usize {
        self.settled.get()
    }
}

#[async_trait::async_trait(?Send)]
impl BatchWork for DoubtfulActivationMaintainer {
    async fn work(&self) -> Result<(), WorkerError> {
        let settled = self.registrar.resolve_doubtful().await;
        self.settled.set(self.settled.get() + settled);
        Ok(())
    }
}
