//! Configuration for replication adaptors and grain registrars.
//!
//! Both configs follow the same shape: `Default` carries the protocol
//! constants, a builder overrides them, and accessors expose the result.

use std::time::Duration;

/// Attempts a flush cycle makes before failing with
/// [`RetriesExhausted`](crate::ReplicationError::RetriesExhausted).
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 10;

/// Rounds of the global single-instance protocol before settling on a
/// doubtful activation.
pub const DEFAULT_OWNERSHIP_RETRIES: u32 = 3;

/// Pause between rounds of the global single-instance protocol.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Settings for a [`LogViewAdaptor`](crate::replication::LogViewAdaptor).
///
/// # Known limitation
///
/// Conflicting writes are retried immediately, up to
/// [`max_write_attempts`](Self::max_write_attempts) times, with no backoff
/// between attempts. Under sustained contention a cycle can burn its whole
/// budget in a burst and fail; the queue is kept and the next notification
/// retries it.
///
/// # Example
///
/// ```rust,ignore
/// let config = ReplicationConfig::builder()
///     .max_write_attempts(3)
///     .collect_stats(true)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    max_write_attempts: u32,
    collect_stats: bool,
    staleness_bound: Option<Duration>,
}

impl ReplicationConfig {
    /// Start building a replication configuration.
    pub fn builder() -> ReplicationConfigBuilder {
        ReplicationConfigBuilder::default()
    }

    /// Read-apply-write attempts per flush cycle.
    pub fn max_write_attempts(&self) -> u32 {
        self.max_write_attempts
    }

    /// Whether adaptors start with statistics collection enabled.
    pub fn collect_stats(&self) -> bool {
        self.collect_stats
    }

    /// Maximum age of the confirmed view before a local read refreshes it.
    ///
    /// `None` means local reads never force a refresh.
    pub fn staleness_bound(&self) -> Option<Duration> {
        self.staleness_bound
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            collect_stats: false,
            staleness_bound: None,
        }
    }
}

/// Builder for [`ReplicationConfig`].
#[derive(Debug, Clone, Default)]
pub struct ReplicationConfigBuilder {
    config: ReplicationConfig,
}

impl ReplicationConfigBuilder {
    /// Set the attempt budget of a flush cycle. Clamped to at least one.
    pub fn max_write_attempts(mut self, attempts: u32) -> Self {
        self.config.max_write_attempts = attempts.max(1);
        self
    }

    /// Enable statistics collection from activation onward.
    pub fn collect_stats(mut self, enabled: bool) -> Self {
        self.config.collect_stats = enabled;
        self
    }

    /// Set the staleness bound for local reads.
    pub fn staleness_bound(mut self, bound: Duration) -> Self {
        self.config.staleness_bound = Some(bound);
        self
    }

    /// Build the configuration (infallible).
    pub fn build(self) -> ReplicationConfig {
        self.config
    }
}

/// Settings for grain registrars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarConfig {
    ownership_retries: u32,
    retry_delay: Duration,
    unregister_grace: Duration,
}

impl RegistrarConfig {
    /// Start building a registrar configuration.
    pub fn builder() -> RegistrarConfigBuilder {
        RegistrarConfigBuilder::default()
    }

    /// Rounds of the ownership protocol before falling back to doubtful.
    pub fn ownership_retries(&self) -> u32 {
        self.ownership_retries
    }

    /// Pause between ownership rounds.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Minimum age of a directory entry before a non-forced unregister may
    /// remove it.
    pub fn unregister_grace(&self) -> Duration {
        self.unregister_grace
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            ownership_retries: DEFAULT_OWNERSHIP_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            unregister_grace: Duration::ZERO,
        }
    }
}

/// Builder for [`RegistrarConfig`].
#[derive(Debug, Clone, Default)]
pub struct RegistrarConfigBuilder {
    config: RegistrarConfig,
}

impl RegistrarConfigBuilder {
    /// Set the number of ownership rounds. Clamped to at least one.
    pub fn ownership_retries(mut self, retries: u32) -> Self {
        self.config.ownership_retries = retries.max(1);
        self
    }

    /// Set the pause between ownership rounds.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set the grace period protecting young entries from non-forced
    /// unregistration.
    pub fn unregister_grace(mut self, grace: Duration) -> Self {
        self.config.unregister_grace = grace;
        self
    }

    /// Build the configuration (infallible).
    pub fn build(self) -> RegistrarConfig {
        self.config
    }
}
