// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixture: a small fleet wired over in-memory stores
//!
//! Hierarchy:
//! - `reseller` (RESELLER)
//! - `direct` (PARENT, DIRECT) with child `direct_child`
//! - `routed` (PARENT, RESELLER_ONLY via `reseller`) with child `routed_child`
//!
//! Request storage yields to the scheduler before every call, so concurrent
//! callers interleave between their reads and their conditional writes.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Instant;

use fleet_renewal_core::application::{
    BulkRenewalOrchestrator, FleetContext, QuoteCoordinator, RetryPolicy, StandardFleetService,
    StandardRequestLifecycleService,
};
use fleet_renewal_core::domain::clock::FixedClock;
use fleet_renewal_core::domain::config::{LifecycleConfig, PricingConfig};
use fleet_renewal_core::domain::device::{Coordinates, Device, DeviceId, Location};
use fleet_renewal_core::domain::gateway::PaymentGateway;
use fleet_renewal_core::domain::organization::{Billing, OrgId, Organization};
use fleet_renewal_core::domain::repository::{
    DeviceRegistry, OrganizationRepository, RenewalRequestRepository, RepositoryError,
};
use fleet_renewal_core::domain::request::{RenewalRequest, RequestId, RequestStatus};
use fleet_renewal_core::infrastructure::event_bus::EventBus;
use fleet_renewal_core::infrastructure::geocoder::StaticGeocoder;
use fleet_renewal_core::infrastructure::payment::RecordingPaymentGateway;
use fleet_renewal_core::infrastructure::renderer::PlainTextQuoteRenderer;
use fleet_renewal_core::infrastructure::repositories::{
    InMemoryDeviceRegistry, InMemoryOrganizationRepository, InMemoryRenewalLedger,
    InMemoryRenewalRequestRepository,
};
use fleet_renewal_core::presentation::api::{self, AppState};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// The day every fixture clock starts on
pub fn today() -> NaiveDate {
    date(2024, 1, 2)
}

/// In-memory request store that hands control back to the runtime first
#[derive(Default)]
pub struct YieldingRequests {
    inner: InMemoryRenewalRequestRepository,
}

#[async_trait]
impl RenewalRequestRepository for YieldingRequests {
    async fn insert(&self, request: &RenewalRequest) -> Result<(), RepositoryError> {
        tokio::task::yield_now().await;
        self.inner.insert(request).await
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<RenewalRequest>, RepositoryError> {
        tokio::task::yield_now().await;
        self.inner.find_by_id(id).await
    }

    async fn compare_and_set(
        &self,
        request: &RenewalRequest,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError> {
        tokio::task::yield_now().await;
        self.inner.compare_and_set(request, expected).await
    }

    async fn list_by_requesters(
        &self,
        requesters: &[OrgId],
    ) -> Result<Vec<RenewalRequest>, RepositoryError> {
        tokio::task::yield_now().await;
        self.inner.list_by_requesters(requesters).await
    }

    async fn list_addressed_to(&self, org: OrgId) -> Result<Vec<RenewalRequest>, RepositoryError> {
        tokio::task::yield_now().await;
        self.inner.list_addressed_to(org).await
    }

    async fn pending_for_devices(
        &self,
        devices: &[DeviceId],
    ) -> Result<Vec<RenewalRequest>, RepositoryError> {
        tokio::task::yield_now().await;
        self.inner.pending_for_devices(devices).await
    }
}

pub struct World {
    pub clock: Arc<FixedClock>,
    pub organizations: Arc<InMemoryOrganizationRepository>,
    pub registry: Arc<InMemoryDeviceRegistry>,
    pub requests: Arc<YieldingRequests>,
    pub ledger: Arc<InMemoryRenewalLedger>,
    pub gateway: Arc<RecordingPaymentGateway>,
    pub event_bus: Arc<EventBus>,
    pub lifecycle: Arc<StandardRequestLifecycleService>,
    pub quotes: Arc<QuoteCoordinator>,
    pub renewals: Arc<BulkRenewalOrchestrator>,
    pub fleet: Arc<StandardFleetService>,
    pub reseller: Organization,
    pub direct: Organization,
    pub direct_child: Organization,
    pub routed: Organization,
    pub routed_child: Organization,
}

impl World {
    pub async fn new() -> Self {
        Self::with_gateway(|recording| recording as Arc<dyn PaymentGateway>).await
    }

    /// Fixture whose orchestrator charges through `wrap(recording gateway)`
    pub async fn with_gateway<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<RecordingPaymentGateway>) -> Arc<dyn PaymentGateway>,
    {
        let clock = Arc::new(FixedClock::on(today()));
        let organizations = Arc::new(InMemoryOrganizationRepository::new());
        let registry = Arc::new(InMemoryDeviceRegistry::new());
        let requests = Arc::new(YieldingRequests::default());
        let ledger = Arc::new(InMemoryRenewalLedger::new());
        let gateway = Arc::new(RecordingPaymentGateway::new());
        let event_bus = Arc::new(EventBus::new(256));

        let reseller = Organization::reseller("Global Signs Partners Ltd");
        let direct = Organization::parent("Acme Retail", Billing::Direct);
        let direct_child = Organization::child("Acme Retail North", direct.id);
        let routed = Organization::parent(
            "Borealis Transit",
            Billing::ResellerOnly {
                reseller: reseller.id,
            },
        );
        let routed_child = Organization::child("Borealis Transit East", routed.id);
        for org in [&reseller, &direct, &direct_child, &routed, &routed_child] {
            organizations.save(org).await.unwrap();
        }

        let context = FleetContext::new(
            organizations.clone(),
            registry.clone(),
            requests.clone(),
            ledger.clone(),
            clock.clone(),
        );
        let retry = RetryPolicy::immediate(3);
        let pricing = PricingConfig::default();
        let lifecycle_config = LifecycleConfig::default();

        let lifecycle = Arc::new(StandardRequestLifecycleService::new(
            context.clone(),
            event_bus.clone(),
        ));
        let quotes = Arc::new(QuoteCoordinator::new(
            context.clone(),
            lifecycle.clone(),
            Arc::new(PlainTextQuoteRenderer::new()),
            pricing.clone(),
            retry,
        ));
        let renewals = Arc::new(BulkRenewalOrchestrator::new(
            context.clone(),
            wrap(gateway.clone()),
            event_bus.clone(),
            pricing,
            lifecycle_config.max_term_years,
            retry,
        ));
        let geocoder = StaticGeocoder::new().with_place(
            "Edinburgh",
            Coordinates {
                latitude: 55.9533,
                longitude: -3.1883,
            },
        );
        let fleet = Arc::new(StandardFleetService::new(
            context,
            Arc::new(geocoder),
            event_bus.clone(),
            lifecycle_config.grace_period_days,
            retry,
        ));

        Self {
            clock,
            organizations,
            registry,
            requests,
            ledger,
            gateway,
            event_bus,
            lifecycle,
            quotes,
            renewals,
            fleet,
            reseller,
            direct,
            direct_child,
            routed,
            routed_child,
        }
    }

    /// Register a device for `owner` expiring on `expiry`
    pub async fn device(&self, owner: &Organization, serial: &str, expiry: NaiveDate) -> Device {
        let device = Device::new(owner.id, format!("Screen {}", serial), serial, expiry);
        self.registry.insert(&device).await.unwrap();
        device
    }

    pub async fn located_device(
        &self,
        owner: &Organization,
        serial: &str,
        expiry: NaiveDate,
        location: Location,
    ) -> Device {
        let device =
            Device::new(owner.id, format!("Screen {}", serial), serial, expiry).with_location(location);
        self.registry.insert(&device).await.unwrap();
        device
    }

    /// Move the fixture clock to noon UTC on `day`
    pub fn advance_to(&self, day: NaiveDate) {
        if let Some(noon) = day.and_hms_opt(12, 0, 0) {
            self.clock.set(noon.and_utc());
        }
    }

    pub async fn reload(&self, device: &Device) -> Device {
        self.registry.find_by_id(device.id).await.unwrap().unwrap()
    }

    pub fn router(&self) -> axum::Router {
        api::app(AppState {
            organizations: self.organizations.clone(),
            fleet: self.fleet.clone(),
            requests: self.lifecycle.clone(),
            quotes: self.quotes.clone(),
            renewals: self.renewals.clone(),
            start_time: Instant::now(),
        })
    }
}
