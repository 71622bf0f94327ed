//! In-memory directory partition.
//!
//! The partition maps a grain to its registered activations, each with a
//! multi-cluster status, plus an etag that changes on every modification
//! of that grain's entry.
//!
//! # Register semantics
//!
//! - [`DirectoryPartition::add_single_activation`] is first-writer-wins:
//!   when an entry exists, nothing is overwritten and the existing address
//!   comes back. The caller compares it with what it asked for.
//! - [`DirectoryPartition::add_activation`] allows several activations of
//!   one grain.
//! - Removal only matches the exact activation, so a silo never removes a
//!   newer activation registered by someone else.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::types::{ActivationAddress, ActivationStatus, GrainId};
use crate::identity::NodeIdentity;

/// One activation registered for a grain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredActivation {
    /// Where it lives.
    pub address: ActivationAddress,
    /// Its multi-cluster status.
    pub status: ActivationStatus,
}

/// Snapshot of a grain's entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Registered activations, oldest first.
    pub activations: Vec<RegisteredActivation>,
    /// Etag of the entry.
    pub etag: u64,
}

impl DirectoryEntry {
    /// First registered activation.
    pub fn primary(&self) -> Option<&RegisteredActivation> {
        self.activations.first()
    }
}

#[derive(Debug)]
struct ActivationRecord {
    address: ActivationAddress,
    status: ActivationStatus,
    registered_at: Instant,
}

#[derive(Debug)]
struct GrainRecord {
    activations: Vec<ActivationRecord>,
    etag: u64,
}

impl GrainRecord {
    fn snapshot(&self) -> DirectoryEntry {
        DirectoryEntry {
            activations: self
                .activations
                .iter()
                .map(|record| RegisteredActivation {
                    address: record.address.clone(),
                    status: record.status,
                })
                .collect(),
            etag: self.etag,
        }
    }
}

/// Directory partition held by one silo.
#[derive(Debug)]
pub struct DirectoryPartition {
    entries: RefCell<HashMap<GrainId, GrainRecord>>,
    etag_counter: Cell<u64>,
    unregister_grace: Duration,
}

impl DirectoryPartition {
    /// Create an empty partition with no unregister grace period.
    pub fn new() -> Self {
        Self::with_unregister_grace(Duration::ZERO)
    }

    /// Create an empty partition whose non-forced removals skip entries
    /// younger than `grace`.
    pub fn with_unregister_grace(grace: Duration) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            etag_counter: Cell::new(0),
            unregister_grace: grace,
        }
    }

    fn next_etag(&self) -> u64 {
        let etag = self.etag_counter.get() + 1;
        self.etag_counter.set(etag);
        etag
    }

    /// Current entry for `grain`.
    pub fn lookup(&self, grain: &GrainId) -> Option<DirectoryEntry> {
        self.entries.borrow().get(grain).map(GrainRecord::snapshot)
    }

    /// Status of exactly this activation, if registered.
    pub fn status_of(&self, address: &ActivationAddress) -> Option<ActivationStatus> {
        self.entries
            .borrow()
            .get(&address.grain)
            .and_then(|record| {
                record
                    .activations
                    .iter()
                    .find(|a| a.address == *address)
                    .map(|a| a.status)
            })
    }

    /// Register `address` as the only activation of its grain.
    ///
    /// Returns the registered address and the entry etag. When another
    /// activation is already registered it is returned unchanged.
    pub fn add_single_activation(
        &self,
        address: &ActivationAddress,
        status: ActivationStatus,
    ) -> (ActivationAddress, u64) {
        let mut entries = self.entries.borrow_mut();
        if let Some(existing) = entries.get(&address.grain) {
            if let Some(first) = existing.activations.first() {
                return (first.address.clone(), existing.etag);
            }
        }

        let etag = self.next_etag();
        entries.insert(
            address.grain.clone(),
            GrainRecord {
                activations: vec![ActivationRecord {
                    address: address.clone(),
                    status,
                    registered_at: Instant::now(),
                }],
                etag,
            },
        );
        (address.clone(), etag)
    }

    /// Register `address` next to any existing activations. Returns the new
    /// etag.
    pub fn add_activation(&self, address: &ActivationAddress) -> u64 {
        let etag = self.next_etag();
        let mut entries = self.entries.borrow_mut();
        let record = entries
            .entry(address.grain.clone())
            .or_insert_with(|| GrainRecord {
                activations: Vec::new(),
                etag,
            });
        if !record.activations.iter().any(|a| a.address == *address) {
            record.activations.push(ActivationRecord {
                address: address.clone(),
                status: ActivationStatus::Owned,
                registered_at: Instant::now(),
            });
        }
        record.etag = etag;
        etag
    }

    /// Remove exactly this activation.
    ///
    /// Without `force`, activations registered less than the grace period
    /// ago are kept. Returns whether something was removed.
    pub fn remove_activation(&self, address: &ActivationAddress, force: bool) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(record) = entries.get_mut(&address.grain) else {
            return false;
        };
        let Some(index) = record
            .activations
            .iter()
            .position(|a| a.address == *address)
        else {
            return false;
        };

        if !force && record.activations[index].registered_at.elapsed() < self.unregister_grace {
            tracing::debug!(activation = %address, "unregister skipped, entry inside grace period");
            return false;
        }

        record.activations.remove(index);
        if record.activations.is_empty() {
            entries.remove(&address.grain);
        } else {
            record.etag = self.next_etag();
        }
        true
    }

    /// Remove every activation of `grain`. Returns whether an entry existed.
    pub fn remove_grain(&self, grain: &GrainId) -> bool {
        self.entries.borrow_mut().remove(grain).is_some()
    }

    /// Change the status of exactly this activation. Returns the new etag.
    pub fn update_status(
        &self,
        address: &ActivationAddress,
        status: ActivationStatus,
    ) -> Option<u64> {
        let mut entries = self.entries.borrow_mut();
        let record = entries.get_mut(&address.grain)?;
        let activation = record
            .activations
            .iter_mut()
            .find(|a| a.address == *address)?;
        activation.status = status;
        record.etag = self.next_etag();
        Some(record.etag)
    }

    /// Replace the grain's entry with a cached pointer to a remote owner.
    ///
    /// Returns the new etag.
    pub fn cache_remote_owner(&self, remote: &ActivationAddress) -> u64 {
        let etag = self.next_etag();
        self.entries.borrow_mut().insert(
            remote.grain.clone(),
            GrainRecord {
                activations: vec![ActivationRecord {
                    address: remote.clone(),
                    status: ActivationStatus::Cached,
                    registered_at: Instant::now(),
                }],
                etag,
            },
        );
        etag
    }

    /// Every activation currently in `status`.
    pub fn activations_with_status(&self, status: ActivationStatus) -> Vec<ActivationAddress> {
        self.entries
            .borrow()
            .values()
            .flat_map(|record| record.activations.iter())
            .filter(|a| a.status == status)
            .map(|a| a.address.clone())
            .collect()
    }

    /// Drop every activation hosted on `silo`, for a silo declared dead.
    pub fn remove_silo(&self, silo: &NodeIdentity) -> Vec<ActivationAddress> {
        let mut entries = self.entries.borrow_mut();
        let mut removed = Vec::new();
        entries.retain(|_, record| {
            record.activations.retain(|a| {
                if a.address.silo == *silo {
                    removed.push(a.address.clone());
                    false
                } else {
                    true
                }
            });
            !record.activations.is_empty()
        });
        removed
    }

    /// Number of grains with an entry.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the partition is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for DirectoryPartition {
    fn default() -> Self {
        Self::new()
    }
}
