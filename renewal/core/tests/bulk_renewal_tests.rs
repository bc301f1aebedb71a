// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bulk renewal: payment capture, idempotent replay and concurrent batches

mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{date, World};
use futures::future::join_all;
use fleet_renewal_core::application::FleetService;
use fleet_renewal_core::domain::device::{DeviceId, DeviceStatus};
use fleet_renewal_core::domain::error::RenewalError;
use fleet_renewal_core::domain::events::RenewalEvent;
use fleet_renewal_core::domain::gateway::{CollaboratorError, PaymentCapture, PaymentGateway};
use fleet_renewal_core::domain::renewal::{BulkRenewalCommand, LedgerEntry, PaymentToken};
use fleet_renewal_core::domain::repository::{DeviceRegistry, RenewalLedger};
use fleet_renewal_core::infrastructure::event_bus::DomainEvent;
use fleet_renewal_core::infrastructure::payment::RecordingPaymentGateway;
use std::sync::Arc;
use tokio::sync::Notify;

fn command(device_ids: Vec<DeviceId>, years: u32, token: &str) -> BulkRenewalCommand {
    BulkRenewalCommand {
        device_ids,
        years,
        payment_token: PaymentToken::new(token),
    }
}

/// Signals when a capture starts and holds it until released
struct HeldCapture {
    inner: Arc<RecordingPaymentGateway>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl PaymentGateway for HeldCapture {
    async fn capture(
        &self,
        token: &PaymentToken,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentCapture, CollaboratorError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.capture(token, amount_minor, currency).await
    }
}

async fn record_charge(world: &World, token: &PaymentToken, device_ids: Vec<DeviceId>) {
    let amount_minor = 20_000 * device_ids.len() as i64;
    world
        .ledger
        .record(
            token,
            LedgerEntry::Charged {
                org_id: world.direct.id,
                device_ids,
                years: 1,
                amount_minor,
                charged_at: Utc::now(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_renewal_extends_from_current_expiry() {
    let world = World::new().await;
    let expired = world.device(&world.direct, "SN-1", date(2023, 12, 1)).await;
    let child_device = world.device(&world.direct_child, "SN-2", date(2024, 1, 20)).await;

    let receipt = world
        .renewals
        .renew(
            &world.direct,
            command(vec![expired.id, child_device.id], 2, "tok_1"),
        )
        .await
        .unwrap();

    assert_eq!(receipt.amount_minor, 2 * 2 * 20_000);
    assert_eq!(receipt.currency, "GBP");
    assert_eq!(receipt.devices.len(), 2);

    let renewed = world.reload(&expired).await;
    assert_eq!(renewed.expiry_date, date(2025, 12, 1));
    assert_eq!(renewed.status(common::today()), DeviceStatus::Active);
    assert_eq!(world.reload(&child_device).await.expiry_date, date(2026, 1, 20));
}

#[tokio::test]
async fn test_replayed_token_applies_once() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;
    let token = PaymentToken::new("tok_replay");
    let mut events = world.event_bus.subscribe();

    let first = world
        .renewals
        .renew(&world.direct, command(vec![device.id], 1, "tok_replay"))
        .await
        .unwrap();
    let second = world
        .renewals
        .renew(&world.direct, command(vec![device.id], 1, "tok_replay"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(world.gateway.capture_count(&token), 1);
    assert_eq!(world.reload(&device).await.expiry_date, date(2025, 3, 1));

    let mut replayed = 0;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::Renewal(RenewalEvent::BulkRenewalReplayed { .. }) = event {
            replayed += 1;
        }
    }
    assert_eq!(replayed, 1);
}

#[tokio::test]
async fn test_concurrent_replays_charge_once() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;

    let attempts = (0..4).map(|_| {
        world
            .renewals
            .renew(&world.direct, command(vec![device.id], 1, "tok_race"))
    });
    let receipts: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert!(receipts.windows(2).all(|pair| pair[0] == pair[1]));

    assert_eq!(world.gateway.capture_count(&PaymentToken::new("tok_race")), 1);
    assert_eq!(world.reload(&device).await.expiry_date, date(2025, 3, 1));
}

#[tokio::test]
async fn test_token_reused_for_other_devices_is_invalid() {
    let world = World::new().await;
    let a = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;
    let b = world.device(&world.direct, "SN-2", date(2024, 3, 1)).await;

    world
        .renewals
        .renew(&world.direct, command(vec![a.id], 1, "tok_shared"))
        .await
        .unwrap();
    let err = world
        .renewals
        .renew(&world.direct, command(vec![b.id], 1, "tok_shared"))
        .await
        .unwrap_err();

    assert!(matches!(err, RenewalError::Validation(_)));
    assert_eq!(world.reload(&b).await.expiry_date, date(2024, 3, 1));
}

#[tokio::test]
async fn test_declined_payment_is_not_retried_and_nothing_changes() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;
    let token = PaymentToken::new("tok_declined");
    world.gateway.decline(&token);

    let err = world
        .renewals
        .renew(&world.direct, command(vec![device.id], 1, "tok_declined"))
        .await
        .unwrap_err();

    assert!(matches!(err, RenewalError::ExternalService { .. }));
    assert!(world.gateway.captures().is_empty());
    assert_eq!(world.reload(&device).await.expiry_date, date(2024, 3, 1));
}

#[tokio::test]
async fn test_transient_payment_failure_is_retried() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;
    world.gateway.fail_next(2);

    world
        .renewals
        .renew(&world.direct, command(vec![device.id], 1, "tok_flaky"))
        .await
        .unwrap();

    assert_eq!(world.gateway.capture_count(&PaymentToken::new("tok_flaky")), 1);
    assert_eq!(world.reload(&device).await.expiry_date, date(2025, 3, 1));
}

#[tokio::test]
async fn test_persistent_payment_failure_surfaces_as_external() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;
    world.gateway.fail_next(10);

    let err = world
        .renewals
        .renew(&world.direct, command(vec![device.id], 1, "tok_down"))
        .await
        .unwrap_err();
    assert!(matches!(err, RenewalError::ExternalService { .. }));
    assert_eq!(world.reload(&device).await.expiry_date, date(2024, 3, 1));
}

#[tokio::test]
async fn test_overlapping_batches_both_apply() {
    let world = World::new().await;
    let shared = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;
    let only_first = world.device(&world.direct, "SN-2", date(2024, 3, 1)).await;
    let only_second = world.device(&world.direct, "SN-3", date(2024, 3, 1)).await;

    let first = {
        let renewals = world.renewals.clone();
        let actor = world.direct.clone();
        let cmd = command(vec![shared.id, only_first.id], 1, "tok_a");
        tokio::spawn(async move { renewals.renew(&actor, cmd).await })
    };
    let second = {
        let renewals = world.renewals.clone();
        let actor = world.direct.clone();
        let cmd = command(vec![shared.id, only_second.id], 1, "tok_b");
        tokio::spawn(async move { renewals.renew(&actor, cmd).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(world.reload(&shared).await.expiry_date, date(2026, 3, 1));
    assert_eq!(world.reload(&only_first).await.expiry_date, date(2025, 3, 1));
    assert_eq!(world.reload(&only_second).await.expiry_date, date(2025, 3, 1));
}

#[tokio::test]
async fn test_renewal_clears_grace_token() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2023, 12, 1)).await;
    world.fleet.issue_grace(&world.direct, device.id).await.unwrap();

    world
        .renewals
        .renew(&world.direct, command(vec![device.id], 1, "tok_grace"))
        .await
        .unwrap();

    let renewed = world.reload(&device).await;
    assert_eq!(renewed.grace_token_expiry, None);
    assert_eq!(renewed.expiry_date, date(2024, 12, 1));
}

#[tokio::test]
async fn test_only_direct_parents_bulk_renew() {
    let world = World::new().await;
    let routed_device = world.device(&world.routed, "SN-1", date(2024, 3, 1)).await;
    let child_device = world.device(&world.direct_child, "SN-2", date(2024, 3, 1)).await;

    for (actor, device) in [
        (&world.routed, routed_device.id),
        (&world.reseller, routed_device.id),
        (&world.direct_child, child_device.id),
    ] {
        let err = world
            .renewals
            .renew(actor, command(vec![device], 1, "tok_denied"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenewalError::Authorization(_)), "{:?}", err);
    }
    assert!(world.gateway.captures().is_empty());
}

#[tokio::test]
async fn test_foreign_device_is_not_found() {
    let world = World::new().await;
    let foreign = world.device(&world.routed, "SN-1", date(2024, 3, 1)).await;

    let err = world
        .renewals
        .renew(&world.direct, command(vec![foreign.id], 1, "tok_foreign"))
        .await
        .unwrap_err();
    assert!(matches!(err, RenewalError::NotFound(_)));
}

#[tokio::test]
async fn test_term_outside_bounds_is_invalid() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2024, 3, 1)).await;

    for years in [0, 6] {
        let err = world
            .renewals
            .renew(&world.direct, command(vec![device.id], years, "tok_term"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenewalError::Validation(_)));
    }
}

#[tokio::test]
async fn test_removal_waits_for_renewal_in_flight() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let world = {
        let (entered, release) = (entered.clone(), release.clone());
        World::with_gateway(move |inner| {
            Arc::new(HeldCapture {
                inner,
                entered,
                release,
            }) as Arc<dyn PaymentGateway>
        })
        .await
    };
    let device = world.device(&world.direct, "SN-1", date(2023, 12, 1)).await;

    let renewal = {
        let renewals = world.renewals.clone();
        let actor = world.direct.clone();
        let cmd = command(vec![device.id], 1, "tok_held");
        tokio::spawn(async move { renewals.renew(&actor, cmd).await })
    };
    entered.notified().await;

    let removal = {
        let fleet = world.fleet.clone();
        let actor = world.direct.clone();
        let device_id = device.id;
        tokio::spawn(async move { fleet.remove_device(&actor, device_id).await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!removal.is_finished());

    release.notify_one();
    let receipt = renewal.await.unwrap().unwrap();
    assert_eq!(receipt.devices[0].new_expiry, date(2024, 12, 1));

    // By the time removal runs the device is active again
    let err = removal.await.unwrap().unwrap_err();
    assert!(matches!(err, RenewalError::Validation(_)));
    assert_eq!(world.reload(&device).await.expiry_date, date(2024, 12, 1));
    assert_eq!(world.gateway.capture_count(&PaymentToken::new("tok_held")), 1);
}

#[tokio::test]
async fn test_unapplied_charge_blocks_removal_until_replayed() {
    let world = World::new().await;
    let device = world.device(&world.direct, "SN-1", date(2023, 12, 1)).await;
    let token = PaymentToken::new("tok_stalled");
    record_charge(&world, &token, vec![device.id]).await;

    let err = world
        .fleet
        .remove_device(&world.direct, device.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RenewalError::Conflict(_)));
    assert!(world.registry.find_by_id(device.id).await.unwrap().is_some());

    let receipt = world
        .renewals
        .renew(&world.direct, command(vec![device.id], 1, "tok_stalled"))
        .await
        .unwrap();
    assert_eq!(receipt.amount_minor, 20_000);
    assert!(world.gateway.captures().is_empty());
    assert_eq!(world.reload(&device).await.expiry_date, date(2024, 12, 1));
    assert!(world.ledger.charged_covering(device.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_charge_for_vanished_device_settles_on_replay() {
    let world = World::new().await;
    let kept = world.device(&world.direct, "SN-1", date(2023, 12, 1)).await;
    let gone = world.device(&world.direct, "SN-2", date(2023, 12, 1)).await;
    let token = PaymentToken::new("tok_orphaned");
    record_charge(&world, &token, vec![kept.id, gone.id]).await;
    world.registry.delete(gone.id).await.unwrap();

    let receipt = world
        .renewals
        .renew(&world.direct, command(vec![kept.id, gone.id], 1, "tok_orphaned"))
        .await
        .unwrap();
    assert_eq!(receipt.devices.len(), 1);
    assert_eq!(receipt.devices[0].device_id, kept.id);
    assert_eq!(receipt.missing_devices, vec![gone.id]);
    assert_eq!(receipt.amount_minor, 40_000);
    assert!(world.gateway.captures().is_empty());
    assert_eq!(world.reload(&kept).await.expiry_date, date(2024, 12, 1));

    let replay = world
        .renewals
        .renew(&world.direct, command(vec![gone.id, kept.id], 1, "tok_orphaned"))
        .await
        .unwrap();
    assert_eq!(replay, receipt);
    assert_eq!(world.reload(&kept).await.expiry_date, date(2024, 12, 1));
}
