// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded executor for service callbacks.
//!
//! Service code is synchronous and not assumed to be thread-safe, so every
//! callback runs on tokio's blocking pool behind a shared semaphore. With the
//! default single permit, lifecycle callbacks and message handlers never
//! overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::error::{Result, ServiceError};

/// Shared worker pool for service callbacks
#[derive(Debug)]
pub struct ServiceExecutor {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl ServiceExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Run a callback and wait for its result, for at most `timeout`.
    ///
    /// The timeout covers queueing for a permit as well as the callback
    /// itself. A callback that overruns keeps its permit until it returns.
    pub async fn run<T, F>(&self, operation: &'static str, timeout: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::Executor(format!(
                "cannot run {}: executor shut down",
                operation
            )));
        }

        let permits = self.permits.clone();
        let task = self.tracker.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ServiceError::Executor("executor closed".to_string()))?;
            match tokio::task::spawn_blocking(f).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ServiceError::Callback {
                    operation,
                    message: format!("{:#}", e),
                }),
                Err(join) => Err(ServiceError::Callback {
                    operation,
                    message: format!("panicked: {}", join),
                }),
            }
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ServiceError::Executor(join.to_string())),
            Err(_) => {
                warn!(operation, ?timeout, "Service callback timed out");
                Err(ServiceError::Timeout { operation, timeout })
            }
        }
    }

    /// Run a callback in the background; failures are logged.
    pub fn spawn<F>(&self, operation: &'static str, f: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            debug!(operation, "Executor shut down, dropping callback");
            return;
        }

        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match tokio::task::spawn_blocking(f).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let message = format!("{:#}", e);
                    error!(operation, error = %message, "Error while calling service callback");
                }
                Err(join) => error!(operation, error = %join, "Service callback panicked"),
            }
        });
    }

    /// Stop accepting callbacks and wait for those already submitted.
    ///
    /// Returns `false` if they did not all finish within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(pending = self.tracker.len(), "Service callbacks still running at shutdown");
                false
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for ServiceExecutor {
    fn default() -> Self {
        Self::new(1)
    }
}
