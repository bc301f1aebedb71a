// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root, one repository per
//! aggregate, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `OrganizationRepository` | `Organization` | `InMemoryOrganizationRepository` |
//! | `DeviceRegistry` | `Device` | `InMemoryDeviceRegistry` |
//! | `RenewalRequestRepository` | `RenewalRequest` | `InMemoryRenewalRequestRepository` |
//! | `RenewalLedger` | `LedgerEntry` | `InMemoryRenewalLedger` |
//!
//! ## Write Guards
//!
//! Two writes are conditional and must be atomic in every backend:
//!
//! - `RenewalRequestRepository::compare_and_set` only replaces a request whose
//!   stored status equals the expected status.
//! - `RenewalRequestRepository::insert` refuses a request naming a device that
//!   a PENDING request already covers.
//! - `DeviceRegistry::apply_expiry_batch` checks every device's version and
//!   applies all updates or none.

use async_trait::async_trait;

use crate::domain::device::{Device, DeviceId};
use crate::domain::organization::{OrgId, Organization};
use crate::domain::renewal::{ExpiryUpdate, LedgerEntry, PaymentToken};
use crate::domain::request::{RenewalRequest, RequestId, RequestStatus};

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Save organization (create or update)
    async fn save(&self, org: &Organization) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: OrgId) -> Result<Option<Organization>, RepositoryError>;

    /// CHILD organizations under `parent`
    async fn list_children(&self, parent: OrgId) -> Result<Vec<Organization>, RepositoryError>;

    /// PARENT organizations billed through `reseller`
    async fn list_clients(&self, reseller: OrgId) -> Result<Vec<Organization>, RepositoryError>;
}

/// Device Registry, the sole owner of device records
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Register a new device; fails if the id is taken
    async fn insert(&self, device: &Device) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: DeviceId) -> Result<Option<Device>, RepositoryError>;

    async fn list_by_orgs(&self, orgs: &[OrgId]) -> Result<Vec<Device>, RepositoryError>;

    /// Replace a device if its stored version still equals `device.version`.
    /// The stored copy gets `version + 1`.
    async fn update(&self, device: &Device) -> Result<Device, RepositoryError>;

    async fn delete(&self, id: DeviceId) -> Result<(), RepositoryError>;

    /// Write every expiry update or none of them
    async fn apply_expiry_batch(
        &self,
        updates: &[ExpiryUpdate],
    ) -> Result<Vec<Device>, RepositoryError>;
}

#[async_trait]
pub trait RenewalRequestRepository: Send + Sync {
    /// Store a freshly created request. Fails with `AlreadyCovered` when any
    /// of its devices is named by a PENDING request, checked in the same write.
    async fn insert(&self, request: &RenewalRequest) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: RequestId) -> Result<Option<RenewalRequest>, RepositoryError>;

    /// Replace the stored request only if its status is still `expected`
    async fn compare_and_set(
        &self,
        request: &RenewalRequest,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError>;

    async fn list_by_requesters(
        &self,
        requesters: &[OrgId],
    ) -> Result<Vec<RenewalRequest>, RepositoryError>;

    async fn list_addressed_to(&self, org: OrgId) -> Result<Vec<RenewalRequest>, RepositoryError>;

    /// PENDING requests covering any of the given devices
    async fn pending_for_devices(
        &self,
        devices: &[DeviceId],
    ) -> Result<Vec<RenewalRequest>, RepositoryError>;
}

/// Per-token record of bulk renewals
#[async_trait]
pub trait RenewalLedger: Send + Sync {
    async fn find(&self, token: &PaymentToken) -> Result<Option<LedgerEntry>, RepositoryError>;

    async fn record(&self, token: &PaymentToken, entry: LedgerEntry) -> Result<(), RepositoryError>;

    /// Tokens whose payment is captured but not yet applied to `device`
    async fn charged_covering(&self, device: DeviceId) -> Result<Vec<PaymentToken>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Status conflict: {0}")]
    StatusConflict(String),

    #[error("Already covered by a pending request: {0}")]
    AlreadyCovered(String),

    #[error("Database error: {0}")]
    Database(String),
}
