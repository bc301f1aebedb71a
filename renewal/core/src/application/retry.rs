// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bounded retry for external collaborators
//!
//! Transient failures are retried with exponential backoff
//! (`base_delay_ms * 2^attempt`). A definitive rejection is returned on the
//! spot; retrying it needs new input from the caller.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::config::RetryConfig;
use crate::domain::gateway::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: 0,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded on attempt {}", operation, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(CollaboratorError::Transient(reason)) if attempt + 1 < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation,
                        attempt + 1,
                        self.max_attempts,
                        reason
                    );
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
