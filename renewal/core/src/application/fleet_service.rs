// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fleet Application Service
//!
//! Device-facing operations: listings, grace tokens, removal, statistics and
//! map lookups. Every call re-reads the registry; status is resolved against
//! the injected clock at call time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::fleet_context::FleetContext;
use crate::application::retry::RetryPolicy;
use crate::domain::device::{Coordinates, Device, DeviceId, DeviceStatus};
use crate::domain::error::RenewalError;
use crate::domain::events::DeviceEvent;
use crate::domain::gateway::Geocoder;
use crate::domain::organization::{OrgId, OrgKind, OrgType, Organization};
use crate::domain::policy::{Action, NextStep, Target};
use crate::infrastructure::event_bus::EventBus;

/// A device as shown in fleet listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device: Device,
    pub status: DeviceStatus,
    pub in_grace_period: bool,
    pub has_pending_request: bool,
    pub organization_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStats {
    pub total: usize,
    pub active: usize,
    pub expiring_soon: usize,
    pub expired: usize,
    pub suspended: usize,
    pub in_grace: usize,
}

impl FleetStats {
    fn record(&mut self, status: DeviceStatus, in_grace_period: bool) {
        self.total += 1;
        match status {
            DeviceStatus::Active => self.active += 1,
            DeviceStatus::ExpiringSoon => self.expiring_soon += 1,
            DeviceStatus::Expired => self.expired += 1,
            DeviceStatus::Suspended => self.suspended += 1,
        }
        if in_grace_period {
            self.in_grace += 1;
        }
    }
}

/// Per-client figures for a reseller's or parent's overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub org_id: OrgId,
    pub name: String,
    pub total_devices: usize,
    pub at_risk: usize,
}

#[async_trait]
pub trait FleetService: Send + Sync {
    /// Devices visible to `actor`, optionally narrowed to one managed client
    async fn list_devices(
        &self,
        actor: &Organization,
        client: Option<OrgId>,
    ) -> Result<Vec<DeviceSummary>, RenewalError>;

    /// The renewal step open to `actor` for the given devices
    async fn plan_renewal(
        &self,
        actor: &Organization,
        device_ids: &[DeviceId],
    ) -> Result<NextStep, RenewalError>;

    async fn issue_grace(
        &self,
        actor: &Organization,
        device_id: DeviceId,
    ) -> Result<Device, RenewalError>;

    /// Conflict while a captured renewal payment for the device is unapplied
    async fn remove_device(
        &self,
        actor: &Organization,
        device_id: DeviceId,
    ) -> Result<(), RenewalError>;

    async fn fleet_stats(
        &self,
        actor: &Organization,
        client: Option<OrgId>,
    ) -> Result<FleetStats, RenewalError>;

    async fn client_stats(&self, actor: &Organization) -> Result<Vec<ClientStats>, RenewalError>;

    async fn locate(&self, actor: &Organization, query: &str) -> Result<Coordinates, RenewalError>;

    async fn register_device(&self, device: Device) -> Result<Device, RenewalError>;
}

pub struct StandardFleetService {
    context: FleetContext,
    geocoder: Arc<dyn Geocoder>,
    event_bus: Arc<EventBus>,
    grace_period_days: u32,
    retry: RetryPolicy,
}

impl StandardFleetService {
    pub fn new(
        context: FleetContext,
        geocoder: Arc<dyn Geocoder>,
        event_bus: Arc<EventBus>,
        grace_period_days: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            context,
            geocoder,
            event_bus,
            grace_period_days,
            retry,
        }
    }

    async fn visible_devices(
        &self,
        actor: &Organization,
        client: Option<OrgId>,
    ) -> Result<(Vec<Organization>, Vec<Device>), RenewalError> {
        let orgs = self.context.scope_orgs(actor, client).await?;
        let ids: Vec<OrgId> = orgs.iter().map(|org| org.id).collect();
        let devices = self.context.registry.list_by_orgs(&ids).await?;
        Ok((orgs, devices))
    }
}

#[async_trait]
impl FleetService for StandardFleetService {
    async fn list_devices(
        &self,
        actor: &Organization,
        client: Option<OrgId>,
    ) -> Result<Vec<DeviceSummary>, RenewalError> {
        let (orgs, mut devices) = self.visible_devices(actor, client).await?;
        devices.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then_with(|| a.serial_number.cmp(&b.serial_number))
        });

        let names: HashMap<OrgId, String> =
            orgs.into_iter().map(|org| (org.id, org.name)).collect();
        let views = self
            .context
            .device_views(&devices, self.context.today())
            .await?;

        let summaries: Vec<DeviceSummary> = devices
            .into_iter()
            .zip(views)
            .map(|(device, view)| DeviceSummary {
                organization_name: names.get(&device.org_id).cloned().unwrap_or_default(),
                status: view.state.status,
                in_grace_period: view.state.in_grace_period,
                has_pending_request: view.has_pending_request,
                device,
            })
            .collect();

        debug!(actor = %actor.id, count = summaries.len(), "Listed devices");
        Ok(summaries)
    }

    async fn plan_renewal(
        &self,
        actor: &Organization,
        device_ids: &[DeviceId],
    ) -> Result<NextStep, RenewalError> {
        let action = self.context.policy.renewal_action(actor)?;
        let devices = self.context.devices(device_ids).await?;
        let views = self
            .context
            .device_views(&devices, self.context.today())
            .await?;
        let target = if views.is_empty() {
            Target::Fleet
        } else {
            Target::Devices(views)
        };
        Ok(self
            .context
            .policy
            .decide(actor, action, &target)
            .into_result()?)
    }

    async fn issue_grace(
        &self,
        actor: &Organization,
        device_id: DeviceId,
    ) -> Result<Device, RenewalError> {
        let mut device = self.context.device(device_id).await?;
        let today = self.context.today();
        let view = self.context.device_view(&device, today).await?;
        self.context
            .policy
            .decide(actor, Action::IssueGrace, &Target::Device(view))
            .into_result()?;

        let grace_until = device.grant_grace(today, self.grace_period_days)?;
        let stored = self.context.registry.update(&device).await?;

        info!(
            device_id = %device_id,
            org_id = %actor.id,
            grace_until = %grace_until,
            "Grace token issued"
        );
        metrics::counter!("fleet_renewal_grace_tokens_issued_total").increment(1);
        self.event_bus.publish_device_event(DeviceEvent::GraceIssued {
            device_id,
            issued_by: actor.id,
            grace_until,
            issued_at: self.context.clock.now(),
        });
        Ok(stored)
    }

    async fn remove_device(
        &self,
        actor: &Organization,
        device_id: DeviceId,
    ) -> Result<(), RenewalError> {
        // Waits out any bulk renewal currently holding the device
        let _held = self.context.device_locks.lock(device_id).await;

        let device = self.context.device(device_id).await?;
        let view = self.context.device_view(&device, self.context.today()).await?;
        let last_status = view.state.status;
        self.context
            .policy
            .decide(actor, Action::RemoveDevice, &Target::Device(view))
            .into_result()?;

        if let Some(token) = self.context.ledger.charged_covering(device_id).await?.first() {
            return Err(RenewalError::Conflict(format!(
                "device {} has a captured renewal payment ({}) still to be applied",
                device_id, token
            )));
        }

        self.context.registry.delete(device_id).await?;

        info!(device_id = %device_id, org_id = %actor.id, %last_status, "Device removed");
        self.event_bus.publish_device_event(DeviceEvent::DeviceRemoved {
            device_id,
            removed_by: actor.id,
            last_status,
            removed_at: self.context.clock.now(),
        });
        Ok(())
    }

    async fn fleet_stats(
        &self,
        actor: &Organization,
        client: Option<OrgId>,
    ) -> Result<FleetStats, RenewalError> {
        let (_, devices) = self.visible_devices(actor, client).await?;
        let today = self.context.today();
        let mut stats = FleetStats::default();
        for device in &devices {
            let state = device.resolve(today);
            stats.record(state.status, state.in_grace_period);
        }
        Ok(stats)
    }

    async fn client_stats(&self, actor: &Organization) -> Result<Vec<ClientStats>, RenewalError> {
        let clients = match actor.kind {
            OrgKind::Reseller => self.context.organizations.list_clients(actor.id).await?,
            OrgKind::Parent { .. } => self.context.organizations.list_children(actor.id).await?,
            OrgKind::Child { .. } => {
                return Err(RenewalError::Authorization(
                    "child organizations have no managed clients".to_string(),
                ))
            }
        };

        let today = self.context.today();
        let mut stats = Vec::with_capacity(clients.len());
        for client in clients {
            let mut orgs = vec![client.id];
            if client.org_type() == OrgType::Parent {
                orgs.extend(
                    self.context
                        .organizations
                        .list_children(client.id)
                        .await?
                        .into_iter()
                        .map(|child| child.id),
                );
            }
            let devices = self.context.registry.list_by_orgs(&orgs).await?;
            let at_risk = devices
                .iter()
                .filter(|device| device.status(today).is_at_risk())
                .count();
            stats.push(ClientStats {
                org_id: client.id,
                name: client.name,
                total_devices: devices.len(),
                at_risk,
            });
        }
        stats.sort_by(|a, b| b.at_risk.cmp(&a.at_risk).then_with(|| a.name.cmp(&b.name)));
        Ok(stats)
    }

    async fn locate(&self, actor: &Organization, query: &str) -> Result<Coordinates, RenewalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RenewalError::Validation("location query is empty".to_string()));
        }

        let (_, devices) = self.visible_devices(actor, None).await?;
        let known = devices.iter().find_map(|device| {
            let hit = device.name.eq_ignore_ascii_case(query)
                || device.location.label.eq_ignore_ascii_case(query);
            if hit {
                device.location.coordinates
            } else {
                None
            }
        });
        if let Some(coordinates) = known {
            debug!(query, "Location resolved from device registry");
            return Ok(coordinates);
        }

        let geocoder = &self.geocoder;
        self.retry
            .run("geocoding", move || geocoder.geocode(query))
            .await
            .map_err(|e| RenewalError::external("geocoder", e))?
            .ok_or_else(|| RenewalError::NotFound(format!("location '{}'", query)))
    }

    async fn register_device(&self, device: Device) -> Result<Device, RenewalError> {
        let owner = self.context.organization(device.org_id).await?;
        device.validate_registration(owner.org_type())?;
        self.context.registry.insert(&device).await?;
        info!(device_id = %device.id, org_id = %owner.id, "Device registered");
        Ok(device)
    }
}
