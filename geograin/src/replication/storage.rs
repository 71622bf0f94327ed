//! Versioned grain storage: the one contract the replication protocol needs
//! from a storage provider.
//!
//! # Design
//!
//! - State is stored as opaque bytes; encoding is the adaptor's business.
//! - Every stored value carries a version. A grain that was never written
//!   reads as version `0` with no data.
//! - `write_state` is conditional: it succeeds only when `expected_version`
//!   matches the stored version, and then stores `expected_version + 1`.
//!   A mismatch is reported as [`StorageError::Conflict`] and nothing else.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::directory::GrainId;
use crate::error::StorageError;

/// A stored value and its version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionedState {
    /// Version of the stored value, `0` if never written.
    pub version: u64,
    /// Encoded state, `None` if never written.
    pub data: Option<Vec<u8>>,
}

/// Storage backend with optimistic concurrency.
///
/// # Single-core
///
/// No Send bounds, matching the single-threaded execution model.
#[async_trait::async_trait(?Send)]
pub trait GrainStorage: fmt::Debug {
    /// Read the current value and version of `grain`.
    async fn read_state(&self, grain: &GrainId) -> Result<VersionedState, StorageError>;

    /// Store `data` if the stored version is still `expected_version`.
    ///
    /// Returns the new version.
    async fn write_state(
        &self,
        grain: &GrainId,
        data: Vec<u8>,
        expected_version: u64,
    ) -> Result<u64, StorageError>;
}

/// A successful write, as recorded by [`InMemoryGrainStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Grain written.
    pub grain: GrainId,
    /// Version stored by the write.
    pub version: u64,
    /// Bytes stored.
    pub data: Vec<u8>,
}

/// In-memory storage for tests and single-process use.
///
/// Besides the plain contract it can inject faults: a number of upcoming
/// writes that lose a race against a simulated concurrent writer, an
/// unavailable mode, and a fixed latency per call.
#[derive(Debug, Default)]
pub struct InMemoryGrainStorage {
    entries: RefCell<HashMap<GrainId, VersionedState>>,
    injected_conflicts: Cell<u32>,
    unavailable: Cell<bool>,
    latency: Cell<Duration>,
    writes: RefCell<Vec<WriteRecord>>,
    write_attempts: Cell<u64>,
    reads: Cell<u64>,
}

impl InMemoryGrainStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a conflict. Each one bumps the
    /// stored version as if another writer got there first.
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.set(count);
    }

    /// Make every call fail with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }

    /// Store `data` at `version` directly, bypassing the version check.
    pub fn seed(&self, grain: &GrainId, version: u64, data: Vec<u8>) {
        self.entries.borrow_mut().insert(
            grain.clone(),
            VersionedState {
                version,
                data: Some(data),
            },
        );
    }

    /// Successful writes, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.borrow().clone()
    }

    /// Write calls made, including rejected ones.
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.get()
    }

    /// Read calls made.
    pub fn reads(&self) -> u64 {
        self.reads.get()
    }

    async fn simulate_latency(&self) {
        let latency = self.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.get() {
            Err(StorageError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait(?Send)]
impl GrainStorage for InMemoryGrainStorage {
    async fn read_state(&self, grain: &GrainId) -> Result<VersionedState, StorageError> {
        self.simulate_latency().await;
        self.check_available()?;
        self.reads.set(self.reads.get() + 1);
        Ok(self
            .entries
            .borrow()
            .get(grain)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_state(
        &self,
        grain: &GrainId,
        data: Vec<u8>,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        self.simulate_latency().await;
        self.check_available()?;
        self.write_attempts.set(self.write_attempts.get() + 1);

        let mut entries = self.entries.borrow_mut();
        let entry = entries.entry(grain.clone()).or_default();

        let injected = self.injected_conflicts.get();
        if injected > 0 {
            self.injected_conflicts.set(injected - 1);
            entry.version += 1;
            return Err(StorageError::Conflict {
                expected: expected_version,
                actual: entry.version,
            });
        }

        if entry.version != expected_version {
            return Err(StorageError::Conflict {
                expected: expected_version,
                actual: entry.version,
            });
        }

        entry.version = expected_version + 1;
        entry.data = Some(data.clone());
        self.writes.borrow_mut().push(WriteRecord {
            grain: grain.clone(),
            version: entry.version,
            data,
        });
        Ok(entry.version)
    }
}
