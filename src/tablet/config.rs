// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for a tablet.

use std::time::Duration;

use crate::storage::StorageOptions;

/// Tablet configuration.
#[derive(Debug, Clone)]
pub struct TabletOptions {
    /// Options for the underlying storage engine.
    pub storage: StorageOptions,
    /// How long a write waits for its key locks before failing.
    pub lock_wait_timeout: Duration,
    /// How long a read at an explicit time waits for older writes to finish.
    pub safe_time_wait_timeout: Duration,
    /// History kept for reads in the past, regardless of active readers.
    pub history_retention: Duration,
    /// How often shutdown logs while waiting on pending operations.
    pub shutdown_wait_log_interval: Duration,
    /// Reads further than this ahead of the local clock are rejected.
    pub max_clock_skew: Duration,
}

impl Default for TabletOptions {
    fn default() -> Self {
        Self {
            storage: StorageOptions::default(),
            lock_wait_timeout: Duration::from_secs(10),
            safe_time_wait_timeout: Duration::from_secs(5),
            history_retention: Duration::from_secs(900),
            shutdown_wait_log_interval: Duration::from_secs(1),
            max_clock_skew: Duration::from_millis(500),
        }
    }
}

impl TabletOptions {
    /// Sets the storage engine options.
    pub fn with_storage(mut self, storage: StorageOptions) -> Self {
        self.storage = storage;
        self
    }

    /// Sets how long writes wait for key locks.
    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    pub fn with_safe_time_wait_timeout(mut self, timeout: Duration) -> Self {
        self.safe_time_wait_timeout = timeout;
        self
    }

    /// Sets the minimum history kept for reads in the past.
    pub fn with_history_retention(mut self, retention: Duration) -> Self {
        self.history_retention = retention;
        self
    }

    pub fn with_shutdown_wait_log_interval(mut self, interval: Duration) -> Self {
        self.shutdown_wait_log_interval = interval;
        self
    }

    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }
}
