// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! In-memory implementations of the repository abstractions defined in the
//! domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryOrganizationRepository** - organization hierarchy
//! - **InMemoryDeviceRegistry** - device records with per-device versions
//! - **InMemoryRenewalRequestRepository** - requests with status compare-and-set
//! - **InMemoryRenewalLedger** - bulk renewal entries keyed by payment token
//!
//! Conditional writes take the write lock once, check, then mutate, so a
//! check and its write are never separated by another writer.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::device::{Device, DeviceId};
use crate::domain::organization::{OrgId, OrgKind, Organization};
use crate::domain::renewal::{ExpiryUpdate, LedgerEntry, PaymentToken};
use crate::domain::repository::{
    DeviceRegistry, OrganizationRepository, RenewalLedger, RenewalRequestRepository,
    RepositoryError,
};
use crate::domain::request::{RenewalRequest, RequestId, RequestStatus};

// ============================================================================
// Organizations
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryOrganizationRepository {
    orgs: Arc<RwLock<HashMap<OrgId, Organization>>>,
}

impl InMemoryOrganizationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationRepository for InMemoryOrganizationRepository {
    async fn save(&self, org: &Organization) -> Result<(), RepositoryError> {
        self.orgs.write().insert(org.id, org.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: OrgId) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.orgs.read().get(&id).cloned())
    }

    async fn list_children(&self, parent: OrgId) -> Result<Vec<Organization>, RepositoryError> {
        let mut children: Vec<Organization> = self
            .orgs
            .read()
            .values()
            .filter(|org| matches!(org.kind, OrgKind::Child { parent: p } if p == parent))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn list_clients(&self, reseller: OrgId) -> Result<Vec<Organization>, RepositoryError> {
        let mut clients: Vec<Organization> = self
            .orgs
            .read()
            .values()
            .filter(|org| org.managing_reseller() == Some(reseller))
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clients)
    }
}

// ============================================================================
// Devices
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryDeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceId, Device>>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn insert(&self, device: &Device) -> Result<(), RepositoryError> {
        let mut devices = self.devices.write();
        if devices.contains_key(&device.id) {
            return Err(RepositoryError::AlreadyExists(format!("device {}", device.id)));
        }
        devices.insert(device.id, device.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: DeviceId) -> Result<Option<Device>, RepositoryError> {
        Ok(self.devices.read().get(&id).cloned())
    }

    async fn list_by_orgs(&self, orgs: &[OrgId]) -> Result<Vec<Device>, RepositoryError> {
        Ok(self
            .devices
            .read()
            .values()
            .filter(|device| orgs.contains(&device.org_id))
            .cloned()
            .collect())
    }

    async fn update(&self, device: &Device) -> Result<Device, RepositoryError> {
        let mut devices = self.devices.write();
        let stored = devices
            .get_mut(&device.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("device {}", device.id)))?;
        if stored.version != device.version {
            return Err(RepositoryError::VersionConflict(format!(
                "device {} is at version {}, update was based on {}",
                device.id, stored.version, device.version
            )));
        }
        let mut updated = device.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: DeviceId) -> Result<(), RepositoryError> {
        self.devices
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("device {}", id)))
    }

    async fn apply_expiry_batch(
        &self,
        updates: &[ExpiryUpdate],
    ) -> Result<Vec<Device>, RepositoryError> {
        let mut devices = self.devices.write();

        // Validate the whole batch before touching anything
        for update in updates {
            let stored = devices
                .get(&update.device_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("device {}", update.device_id)))?;
            if stored.version != update.expected_version {
                return Err(RepositoryError::VersionConflict(format!(
                    "device {} is at version {}, batch expected {}",
                    update.device_id, stored.version, update.expected_version
                )));
            }
        }

        let mut applied = Vec::with_capacity(updates.len());
        for update in updates {
            if let Some(stored) = devices.get_mut(&update.device_id) {
                stored.apply_renewal(update.new_expiry);
                stored.version += 1;
                applied.push(stored.clone());
            }
        }
        Ok(applied)
    }
}

// ============================================================================
// Renewal Requests
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryRenewalRequestRepository {
    requests: Arc<RwLock<HashMap<RequestId, RenewalRequest>>>,
}

impl InMemoryRenewalRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, predicate: F) -> Vec<RenewalRequest>
    where
        F: Fn(&RenewalRequest) -> bool,
    {
        let mut found: Vec<RenewalRequest> = self
            .requests
            .read()
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }
}

#[async_trait]
impl RenewalRequestRepository for InMemoryRenewalRequestRepository {
    async fn insert(&self, request: &RenewalRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write();
        if requests.contains_key(&request.id) {
            return Err(RepositoryError::AlreadyExists(format!("request {}", request.id)));
        }
        let covering = requests.values().find_map(|existing| {
            if existing.status != RequestStatus::Pending {
                return None;
            }
            request
                .device_ids
                .iter()
                .find(|d| existing.device_ids.contains(d))
                .map(|d| (existing.id, *d))
        });
        if let Some((pending, device)) = covering {
            return Err(RepositoryError::AlreadyCovered(format!(
                "device {} is already in pending request {}",
                device, pending
            )));
        }
        requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<RenewalRequest>, RepositoryError> {
        Ok(self.requests.read().get(&id).cloned())
    }

    async fn compare_and_set(
        &self,
        request: &RenewalRequest,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write();
        let stored = requests
            .get_mut(&request.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("request {}", request.id)))?;
        if stored.status != expected {
            return Err(RepositoryError::StatusConflict(format!(
                "request {} is {}, expected {}",
                request.id, stored.status, expected
            )));
        }
        *stored = request.clone();
        Ok(())
    }

    async fn list_by_requesters(
        &self,
        requesters: &[OrgId],
    ) -> Result<Vec<RenewalRequest>, RepositoryError> {
        Ok(self.collect(|r| requesters.contains(&r.requester_org_id)))
    }

    async fn list_addressed_to(&self, org: OrgId) -> Result<Vec<RenewalRequest>, RepositoryError> {
        Ok(self.collect(|r| r.addressed_to == org))
    }

    async fn pending_for_devices(
        &self,
        devices: &[DeviceId],
    ) -> Result<Vec<RenewalRequest>, RepositoryError> {
        Ok(self.collect(|r| {
            r.status == RequestStatus::Pending && r.device_ids.iter().any(|d| devices.contains(d))
        }))
    }
}

// ============================================================================
// Renewal Ledger
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryRenewalLedger {
    entries: Arc<RwLock<HashMap<PaymentToken, LedgerEntry>>>,
}

impl InMemoryRenewalLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RenewalLedger for InMemoryRenewalLedger {
    async fn find(&self, token: &PaymentToken) -> Result<Option<LedgerEntry>, RepositoryError> {
        Ok(self.entries.read().get(token).cloned())
    }

    async fn record(&self, token: &PaymentToken, entry: LedgerEntry) -> Result<(), RepositoryError> {
        self.entries.write().insert(token.clone(), entry);
        Ok(())
    }

    async fn charged_covering(&self, device: DeviceId) -> Result<Vec<PaymentToken>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.holds_charge_for(device))
            .map(|(token, _)| token.clone())
            .collect())
    }
}
