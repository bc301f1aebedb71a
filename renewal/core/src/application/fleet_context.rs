// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared read-side context for the application services
//!
//! Loads actors, resolves ownership chains and turns freshly read device and
//! request records into the views the policy engine decides on. Nothing is
//! cached between calls.
//!
//! `device_locks` is shared by every clone of the context. Bulk renewal holds
//! them from authorization until the expiry write; removal takes the same
//! lock, so a device cannot disappear under a captured payment.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::application::keyed_locks::KeyedLocks;
use crate::domain::clock::Clock;
use crate::domain::device::{Device, DeviceId};
use crate::domain::error::RenewalError;
use crate::domain::organization::{OrgId, OrgKind, Organization};
use crate::domain::policy::{DeviceView, PolicyEngine};
use crate::domain::repository::{
    DeviceRegistry, OrganizationRepository, RenewalLedger, RenewalRequestRepository,
};

/// Owner's parent and servicing reseller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ownership {
    pub parent: Option<OrgId>,
    pub reseller: Option<OrgId>,
}

#[derive(Clone)]
pub struct FleetContext {
    pub organizations: Arc<dyn OrganizationRepository>,
    pub registry: Arc<dyn DeviceRegistry>,
    pub requests: Arc<dyn RenewalRequestRepository>,
    pub ledger: Arc<dyn RenewalLedger>,
    pub clock: Arc<dyn Clock>,
    pub policy: PolicyEngine,
    pub device_locks: KeyedLocks<DeviceId>,
}

impl FleetContext {
    pub fn new(
        organizations: Arc<dyn OrganizationRepository>,
        registry: Arc<dyn DeviceRegistry>,
        requests: Arc<dyn RenewalRequestRepository>,
        ledger: Arc<dyn RenewalLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            organizations,
            registry,
            requests,
            ledger,
            clock,
            policy: PolicyEngine::new(),
            device_locks: KeyedLocks::new(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn organization(&self, id: OrgId) -> Result<Organization, RenewalError> {
        self.organizations
            .find_by_id(id)
            .await?
            .ok_or_else(|| RenewalError::NotFound(format!("organization {}", id)))
    }

    pub async fn device(&self, id: DeviceId) -> Result<Device, RenewalError> {
        self.registry
            .find_by_id(id)
            .await?
            .ok_or_else(|| RenewalError::NotFound(format!("device {}", id)))
    }

    /// Load every device or fail on the first missing id
    pub async fn devices(&self, ids: &[DeviceId]) -> Result<Vec<Device>, RenewalError> {
        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            devices.push(self.device(*id).await?);
        }
        Ok(devices)
    }

    pub async fn ownership(&self, owner: OrgId) -> Result<Ownership, RenewalError> {
        let org = self.organization(owner).await?;
        let ownership = match org.kind {
            OrgKind::Child { parent } => {
                let parent_org = self.organization(parent).await?;
                Ownership {
                    parent: Some(parent),
                    reseller: parent_org.managing_reseller(),
                }
            }
            OrgKind::Parent { .. } => Ownership {
                parent: None,
                reseller: org.managing_reseller(),
            },
            OrgKind::Reseller => Ownership::default(),
        };
        Ok(ownership)
    }

    /// Organizations whose devices `actor` may see, the actor first
    pub async fn managed_orgs(&self, actor: &Organization) -> Result<Vec<Organization>, RenewalError> {
        let mut orgs = vec![actor.clone()];
        match actor.kind {
            OrgKind::Parent { .. } => {
                orgs.extend(self.organizations.list_children(actor.id).await?);
            }
            OrgKind::Reseller => {
                for client in self.organizations.list_clients(actor.id).await? {
                    let children = self.organizations.list_children(client.id).await?;
                    orgs.push(client);
                    orgs.extend(children);
                }
            }
            OrgKind::Child { .. } => {}
        }
        Ok(orgs)
    }

    /// Managed organizations, optionally narrowed to one client and its
    /// children. A client outside the actor's reach is reported as missing.
    pub async fn scope_orgs(
        &self,
        actor: &Organization,
        client: Option<OrgId>,
    ) -> Result<Vec<Organization>, RenewalError> {
        let managed = self.managed_orgs(actor).await?;
        let Some(client_id) = client else {
            return Ok(managed);
        };
        let Some(client_org) = managed.iter().find(|org| org.id == client_id).cloned() else {
            return Err(RenewalError::NotFound(format!("organization {}", client_id)));
        };
        let mut scoped = vec![client_org];
        scoped.extend(
            managed
                .into_iter()
                .filter(|org| org.parent_ref() == Some(client_id)),
        );
        Ok(scoped)
    }

    pub async fn device_view(&self, device: &Device, today: NaiveDate) -> Result<DeviceView, RenewalError> {
        let mut views = self.device_views(std::slice::from_ref(device), today).await?;
        views
            .pop()
            .ok_or_else(|| RenewalError::NotFound(format!("device {}", device.id)))
    }

    /// Views for a batch of devices, sharing ownership and pending lookups
    pub async fn device_views(
        &self,
        devices: &[Device],
        today: NaiveDate,
    ) -> Result<Vec<DeviceView>, RenewalError> {
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();
        let pending: HashSet<DeviceId> = self
            .requests
            .pending_for_devices(&ids)
            .await?
            .into_iter()
            .flat_map(|request| request.device_ids)
            .collect();

        let mut ownerships: HashMap<OrgId, Ownership> = HashMap::new();
        let mut views = Vec::with_capacity(devices.len());
        for device in devices {
            let ownership = match ownerships.get(&device.org_id) {
                Some(ownership) => *ownership,
                None => {
                    let ownership = self.ownership(device.org_id).await?;
                    ownerships.insert(device.org_id, ownership);
                    ownership
                }
            };
            views.push(DeviceView::new(
                device,
                ownership.parent,
                ownership.reseller,
                device.resolve(today),
                pending.contains(&device.id),
            ));
        }
        Ok(views)
    }
}
