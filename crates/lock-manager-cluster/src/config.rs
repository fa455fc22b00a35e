//! Engine configuration.

use std::time::Duration;

use lock_manager_core::error::{LockError, LockResult};

/// Default wait for read requests when the caller passes no timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Default wait for write requests when the caller passes no timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(7200);

/// Settings for a [`ClusterLockService`](crate::ClusterLockService).
#[derive(Debug, Clone)]
pub struct ClusterLockConfig {
    /// Lifetime written into every lock record.
    pub lock_expiry: Duration,
    pub default_read_timeout: Duration,
    pub default_write_timeout: Duration,
    /// How long unlock waits for the access mutexes before giving up.
    pub unlock_timeout: Duration,
    /// Minimum number of live members required to serve any request.
    pub min_cluster_size: usize,
}

impl ClusterLockConfig {
    /// Returns a new builder.
    pub fn builder() -> ClusterLockConfigBuilder {
        ClusterLockConfigBuilder::new()
    }
}

impl Default for ClusterLockConfig {
    fn default() -> Self {
        Self {
            lock_expiry: Duration::from_secs(3600),
            default_read_timeout: DEFAULT_READ_TIMEOUT,
            default_write_timeout: DEFAULT_WRITE_TIMEOUT,
            unlock_timeout: Duration::from_secs(5),
            min_cluster_size: 1,
        }
    }
}

/// Builder for [`ClusterLockConfig`].
pub struct ClusterLockConfigBuilder {
    config: ClusterLockConfig,
}

impl ClusterLockConfigBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ClusterLockConfig::default(),
        }
    }

    /// Sets how long a granted lock stays valid without being released.
    pub fn lock_expiry(mut self, expiry: Duration) -> Self {
        self.config.lock_expiry = expiry;
        self
    }

    pub fn default_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_read_timeout = timeout;
        self
    }

    pub fn default_write_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_write_timeout = timeout;
        self
    }

    /// Sets how long unlock waits for the access mutexes.
    pub fn unlock_timeout(mut self, timeout: Duration) -> Self {
        self.config.unlock_timeout = timeout;
        self
    }

    /// Sets the minimum number of live members.
    ///
    /// Below this size every operation fails with `LockError::Unavailable`,
    /// which keeps a minority partition from granting locks on its own.
    pub fn min_cluster_size(mut self, size: usize) -> Self {
        self.config.min_cluster_size = size;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> LockResult<ClusterLockConfig> {
        if self.config.lock_expiry.is_zero() {
            return Err(LockError::InvalidName(
                "lock expiry must be greater than zero".to_string(),
            ));
        }
        if self.config.min_cluster_size == 0 {
            return Err(LockError::InvalidName(
                "minimum cluster size must be at least 1".to_string(),
            ));
        }
        Ok(self.config)
    }
}

impl Default for ClusterLockConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
