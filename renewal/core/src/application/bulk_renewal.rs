// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bulk Renewal Orchestrator
//!
//! Applies a confirmed payment to a set of devices:
//!
//! 1. Calls for the same payment token are serialized by a per-token lock,
//!    then the targeted devices are locked until the expiry write is done.
//! 2. The ledger is consulted first. An `Applied` token returns its stored
//!    receipt; a `Charged` token skips straight to the expiry update.
//! 3. Otherwise the actor is authorized, the gateway is charged once (with
//!    bounded retry on transient failure) and the charge is recorded.
//! 4. Expiries are advanced by whole years from each device's prior expiry
//!    in one versioned batch. A version conflict means another batch got
//!    there first, so the devices are re-read and the batch recomputed.
//!
//! Once the charge is recorded the renewal is never abandoned: a failed
//! expiry write leaves the ledger at `Charged` and replaying the token
//! finishes the job without charging again. Removal refuses devices under a
//! `Charged` entry; if one vanishes anyway, the replay settles the token with
//! that device listed in `missing_devices`.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::fleet_context::FleetContext;
use crate::application::keyed_locks::KeyedLocks;
use crate::application::retry::RetryPolicy;
use crate::domain::config::PricingConfig;
use crate::domain::device::DeviceId;
use crate::domain::error::RenewalError;
use crate::domain::events::RenewalEvent;
use crate::domain::gateway::PaymentGateway;
use crate::domain::organization::Organization;
use crate::domain::policy::{Action, Target};
use crate::domain::renewal::{
    BulkRenewalCommand, BulkRenewalReceipt, ExpiryUpdate, LedgerEntry, PaymentToken, RenewedDevice,
};
use crate::domain::repository::RepositoryError;
use crate::infrastructure::event_bus::EventBus;

/// Re-read/recompute rounds before a contended batch gives up
const MAX_APPLY_ATTEMPTS: u32 = 5;

pub struct BulkRenewalOrchestrator {
    context: FleetContext,
    gateway: Arc<dyn PaymentGateway>,
    event_bus: Arc<EventBus>,
    pricing: PricingConfig,
    max_term_years: u32,
    retry: RetryPolicy,
    token_locks: KeyedLocks<PaymentToken>,
}

impl BulkRenewalOrchestrator {
    pub fn new(
        context: FleetContext,
        gateway: Arc<dyn PaymentGateway>,
        event_bus: Arc<EventBus>,
        pricing: PricingConfig,
        max_term_years: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            context,
            gateway,
            event_bus,
            pricing,
            max_term_years,
            retry,
            token_locks: KeyedLocks::new(),
        }
    }

    /// Price of renewing `device_count` devices for `years`
    pub fn quote_amount(&self, device_count: usize, years: u32) -> Result<i64, RenewalError> {
        i64::try_from(device_count)
            .ok()
            .and_then(|n| n.checked_mul(i64::from(years)))
            .and_then(|units| units.checked_mul(self.pricing.renewal_price_minor))
            .ok_or_else(|| RenewalError::Validation("renewal amount overflows".to_string()))
    }

    pub async fn renew(
        &self,
        actor: &Organization,
        command: BulkRenewalCommand,
    ) -> Result<BulkRenewalReceipt, RenewalError> {
        self.validate(&command)?;
        let token = command.payment_token.clone();

        let _token_guard = self.token_locks.lock(token.clone()).await;
        let _device_guards = self.context.device_locks.lock_all(&command.device_ids).await;

        let amount_minor = match self.context.ledger.find(&token).await? {
            Some(entry) => {
                if !entry.matches(&command.device_ids, command.years) {
                    return Err(RenewalError::Validation(format!(
                        "payment token {} was already used for a different renewal",
                        token
                    )));
                }
                match entry {
                    LedgerEntry::Applied(receipt) => {
                        if receipt.org_id != actor.id {
                            return Err(RenewalError::NotFound(format!("payment token {}", token)));
                        }
                        info!(payment_token = %token, "Bulk renewal replayed; returning prior receipt");
                        metrics::counter!("fleet_renewal_bulk_renewals_total", "outcome" => "replayed")
                            .increment(1);
                        self.event_bus.publish_renewal_event(RenewalEvent::BulkRenewalReplayed {
                            payment_token: token,
                            replayed_at: self.context.clock.now(),
                        });
                        return Ok(receipt);
                    }
                    LedgerEntry::Charged {
                        org_id,
                        amount_minor,
                        ..
                    } => {
                        if org_id != actor.id {
                            return Err(RenewalError::NotFound(format!("payment token {}", token)));
                        }
                        warn!(payment_token = %token, "Resuming bulk renewal after earlier charge");
                        amount_minor
                    }
                }
            }
            None => self.authorize_and_charge(actor, &command).await?,
        };

        let receipt = match self.apply(actor, &command, amount_minor).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(
                    payment_token = %token,
                    "Expiry update failed after payment capture; replay the token to complete: {}",
                    e
                );
                metrics::counter!("fleet_renewal_bulk_renewals_total", "outcome" => "apply_failed")
                    .increment(1);
                return Err(e);
            }
        };

        self.context
            .ledger
            .record(&token, LedgerEntry::Applied(receipt.clone()))
            .await?;

        info!(
            payment_token = %token,
            org_id = %actor.id,
            devices = receipt.devices.len(),
            years = receipt.years,
            amount_minor = receipt.amount_minor,
            "Bulk renewal applied"
        );
        metrics::counter!("fleet_renewal_bulk_renewals_total", "outcome" => "applied").increment(1);
        self.event_bus.publish_renewal_event(RenewalEvent::BulkRenewalApplied {
            payment_token: token,
            org_id: actor.id,
            device_count: receipt.devices.len(),
            years: receipt.years,
            applied_at: receipt.applied_at,
        });
        Ok(receipt)
    }

    fn validate(&self, command: &BulkRenewalCommand) -> Result<(), RenewalError> {
        if command.device_ids.is_empty() {
            return Err(RenewalError::Validation(
                "bulk renewal needs at least one device".to_string(),
            ));
        }
        let unique: HashSet<&DeviceId> = command.device_ids.iter().collect();
        if unique.len() != command.device_ids.len() {
            return Err(RenewalError::Validation(
                "device ids must not repeat within a renewal".to_string(),
            ));
        }
        if command.years == 0 || command.years > self.max_term_years {
            return Err(RenewalError::Validation(format!(
                "renewal term must be between 1 and {} years, got {}",
                self.max_term_years, command.years
            )));
        }
        if command.payment_token.as_str().trim().is_empty() {
            return Err(RenewalError::Validation(
                "payment confirmation token is required".to_string(),
            ));
        }
        Ok(())
    }

    async fn authorize_and_charge(
        &self,
        actor: &Organization,
        command: &BulkRenewalCommand,
    ) -> Result<i64, RenewalError> {
        let devices = self.context.devices(&command.device_ids).await?;
        let views = self
            .context
            .device_views(&devices, self.context.today())
            .await?;
        self.context
            .policy
            .decide(actor, Action::BulkRenew, &Target::Devices(views))
            .into_result()?;

        let amount_minor = self.quote_amount(devices.len(), command.years)?;
        let token = &command.payment_token;
        let gateway = &self.gateway;
        let currency = self.pricing.currency.as_str();

        self.retry
            .run("payment capture", move || gateway.capture(token, amount_minor, currency))
            .await
            .map_err(|e| {
                warn!(payment_token = %token, "Payment capture failed: {}", e);
                metrics::counter!("fleet_renewal_bulk_renewals_total", "outcome" => "payment_failed")
                    .increment(1);
                RenewalError::external("payment gateway", e)
            })?;

        let charged_at = self.context.clock.now();
        self.context
            .ledger
            .record(
                token,
                LedgerEntry::Charged {
                    org_id: actor.id,
                    device_ids: command.device_ids.clone(),
                    years: command.years,
                    amount_minor,
                    charged_at,
                },
            )
            .await?;
        self.event_bus.publish_renewal_event(RenewalEvent::PaymentCaptured {
            payment_token: token.clone(),
            org_id: actor.id,
            amount_minor,
            captured_at: charged_at,
        });
        Ok(amount_minor)
    }

    async fn apply(
        &self,
        actor: &Organization,
        command: &BulkRenewalCommand,
        amount_minor: i64,
    ) -> Result<BulkRenewalReceipt, RenewalError> {
        for attempt in 0..MAX_APPLY_ATTEMPTS {
            let mut devices = Vec::with_capacity(command.device_ids.len());
            let mut missing = Vec::new();
            for id in &command.device_ids {
                match self.context.registry.find_by_id(*id).await? {
                    Some(device) => devices.push(device),
                    None => missing.push(*id),
                }
            }
            if !missing.is_empty() {
                error!(
                    payment_token = %command.payment_token,
                    missing = missing.len(),
                    "Paid-for devices left the registry; settling the charge without them"
                );
                metrics::counter!("fleet_renewal_bulk_renewals_total", "outcome" => "settled_short")
                    .increment(1);
            }

            let mut updates = Vec::with_capacity(devices.len());
            let mut renewed = Vec::with_capacity(devices.len());
            for device in &devices {
                let new_expiry = device.renewed_expiry(command.years)?;
                updates.push(ExpiryUpdate {
                    device_id: device.id,
                    expected_version: device.version,
                    new_expiry,
                });
                renewed.push(RenewedDevice {
                    device_id: device.id,
                    previous_expiry: device.expiry_date,
                    new_expiry,
                });
            }

            let written = if updates.is_empty() {
                Ok(Vec::new())
            } else {
                self.context.registry.apply_expiry_batch(&updates).await
            };
            match written {
                Ok(_) => {
                    return Ok(BulkRenewalReceipt {
                        payment_token: command.payment_token.clone(),
                        org_id: actor.id,
                        years: command.years,
                        devices: renewed,
                        missing_devices: missing,
                        amount_minor,
                        currency: self.pricing.currency.clone(),
                        applied_at: self.context.clock.now(),
                    });
                }
                Err(RepositoryError::VersionConflict(detail)) => {
                    warn!(
                        payment_token = %command.payment_token,
                        "Concurrent device update (attempt {}/{}): {}",
                        attempt + 1,
                        MAX_APPLY_ATTEMPTS,
                        detail
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RenewalError::Conflict(format!(
            "devices kept changing during renewal {}; replay the payment token to complete",
            command.payment_token
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::FixedClock;
    use crate::domain::config::LifecycleConfig;
    use crate::infrastructure::payment::RecordingPaymentGateway;
    use crate::infrastructure::repositories::{
        InMemoryDeviceRegistry, InMemoryOrganizationRepository, InMemoryRenewalLedger,
        InMemoryRenewalRequestRepository,
    };
    use chrono::NaiveDate;

    fn orchestrator() -> BulkRenewalOrchestrator {
        let context = FleetContext::new(
            Arc::new(InMemoryOrganizationRepository::new()),
            Arc::new(InMemoryDeviceRegistry::new()),
            Arc::new(InMemoryRenewalRequestRepository::new()),
            Arc::new(InMemoryRenewalLedger::new()),
            Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())),
        );
        BulkRenewalOrchestrator::new(
            context,
            Arc::new(RecordingPaymentGateway::new()),
            Arc::new(EventBus::new(16)),
            PricingConfig::default(),
            LifecycleConfig::default().max_term_years,
            RetryPolicy::immediate(1),
        )
    }

    fn command(device_ids: Vec<DeviceId>, years: u32) -> BulkRenewalCommand {
        BulkRenewalCommand {
            device_ids,
            years,
            payment_token: PaymentToken::new("tok_test"),
        }
    }

    #[test]
    fn test_amount_scales_with_devices_and_years() {
        let orchestrator = orchestrator();
        let per_year = PricingConfig::default().renewal_price_minor;
        assert_eq!(orchestrator.quote_amount(3, 2).unwrap(), 6 * per_year);
        assert!(orchestrator.quote_amount(usize::MAX, u32::MAX).is_err());
    }

    #[test]
    fn test_command_shape_is_validated() {
        let orchestrator = orchestrator();
        let device = DeviceId::new();

        assert!(orchestrator.validate(&command(vec![], 1)).is_err());
        assert!(orchestrator.validate(&command(vec![device, device], 1)).is_err());
        assert!(orchestrator.validate(&command(vec![device], 0)).is_err());
        assert!(orchestrator.validate(&command(vec![device], 6)).is_err());
        assert!(orchestrator.validate(&command(vec![device], 5)).is_ok());

        let mut blank = command(vec![device], 1);
        blank.payment_token = PaymentToken::new("  ");
        assert!(matches!(
            orchestrator.validate(&blank),
            Err(RenewalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_locks_are_released_after_renewal() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .renew(&Organization::reseller("R"), command(vec![DeviceId::new()], 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RenewalError::NotFound(_)));
        assert!(orchestrator.token_locks.is_empty());
        assert!(orchestrator.context.device_locks.is_empty());
    }
}
