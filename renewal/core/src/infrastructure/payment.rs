// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process payment gateway
//!
//! Records every capture it confirms. Tokens can be marked as declined, and a
//! number of transient failures can be queued to exercise retry paths. Used
//! by `fleetctl serve` in development deployments and by the test suite.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

use crate::domain::gateway::{CollaboratorError, PaymentCapture, PaymentGateway};
use crate::domain::renewal::PaymentToken;

#[derive(Default)]
pub struct RecordingPaymentGateway {
    captures: Mutex<Vec<PaymentCapture>>,
    declined: Mutex<HashSet<PaymentToken>>,
    pending_transient_failures: AtomicU32,
}

impl RecordingPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capture for `token` from now on is declined
    pub fn decline(&self, token: &PaymentToken) {
        self.declined.lock().insert(token.clone());
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: u32) {
        self.pending_transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn captures(&self) -> Vec<PaymentCapture> {
        self.captures.lock().clone()
    }

    pub fn capture_count(&self, token: &PaymentToken) -> usize {
        self.captures
            .lock()
            .iter()
            .filter(|capture| &capture.token == token)
            .count()
    }
}

#[async_trait]
impl PaymentGateway for RecordingPaymentGateway {
    async fn capture(
        &self,
        token: &PaymentToken,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentCapture, CollaboratorError> {
        let injected = self
            .pending_transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(payment_token = %token, "Injected transient payment failure");
            return Err(CollaboratorError::Transient("payment gateway timed out".to_string()));
        }

        if self.declined.lock().contains(token) {
            return Err(CollaboratorError::Rejected(format!("token {} was declined", token)));
        }
        if amount_minor <= 0 {
            return Err(CollaboratorError::Rejected(format!(
                "invalid capture amount {}",
                amount_minor
            )));
        }

        let mut captures = self.captures.lock();
        let capture = PaymentCapture {
            token: token.clone(),
            amount_minor,
            reference: format!("cap_{}", captures.len() + 1),
        };
        captures.push(capture.clone());
        info!(payment_token = %token, amount_minor, currency, "Payment captured");
        Ok(capture)
    }
}
