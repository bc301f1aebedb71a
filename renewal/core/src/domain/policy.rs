// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Renewal authorization policy
//!
//! Every entry point (device listings, map actions, bulk actions, request
//! resolution) asks [`PolicyEngine::decide`] whether an action is allowed and
//! what to do next. The engine only reads the snapshot it is handed; callers
//! build [`DeviceView`]/[`RequestView`] from freshly loaded records.
//!
//! ## Renewal path by actor
//!
//! | Actor                     | Action           | Next step                              |
//! |---------------------------|------------------|----------------------------------------|
//! | CHILD                     | `RequestRenewal` | PENDING RENEWAL request to its PARENT  |
//! | PARENT, `Direct`          | `DirectRenew`    | bulk renewal, no request entity        |
//! | PARENT, `ResellerOnly`    | `RequestQuote`   | PENDING QUOTE request to its RESELLER  |
//! | RESELLER                  | none             | processes requests routed to it        |
//!
//! ## Denial precedence
//!
//! 1. actor class (`Authorization`)
//! 2. target shape (`Validation`)
//! 3. visibility (`NotFound`)
//! 4. current state (`Conflict` for requests, `Validation` for devices)
//!
//! Request actions check visibility before actor class so that requests
//! addressed elsewhere are indistinguishable from missing ones.

use serde::{Deserialize, Serialize};

use crate::domain::device::{Device, DeviceId, DeviceStatus, ResolvedState};
use crate::domain::organization::{Billing, OrgId, OrgKind, OrgType, Organization};
use crate::domain::request::{RenewalRequest, RequestId, RequestStatus, RequestType};

// ============================================================================
// Decision Inputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RequestRenewal,
    DirectRenew,
    RequestQuote,
    ApproveRequest,
    RejectRequest,
    ProcessQuote,
    IssueGrace,
    RemoveDevice,
    BulkRenew,
}

/// Snapshot of a device and its ownership chain
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceView {
    pub device_id: DeviceId,
    pub owner: OrgId,
    /// Owner's parent, when the owner is a CHILD
    pub owner_parent: Option<OrgId>,
    /// Reseller servicing the owner's billing root
    pub owner_reseller: Option<OrgId>,
    pub state: ResolvedState,
    pub has_pending_request: bool,
}

impl DeviceView {
    pub fn new(
        device: &Device,
        owner_parent: Option<OrgId>,
        owner_reseller: Option<OrgId>,
        state: ResolvedState,
        has_pending_request: bool,
    ) -> Self {
        Self {
            device_id: device.id,
            owner: device.org_id,
            owner_parent,
            owner_reseller,
            state,
            has_pending_request,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestView {
    pub request_id: RequestId,
    pub requester_org_type: OrgType,
    pub addressed_to: OrgId,
    pub request_type: RequestType,
    pub status: RequestStatus,
}

impl From<&RenewalRequest> for RequestView {
    fn from(request: &RenewalRequest) -> Self {
        Self {
            request_id: request.id,
            requester_org_type: request.requester_org_type,
            addressed_to: request.addressed_to,
            request_type: request.request_type,
            status: request.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// No specific device, e.g. a general request with notes only
    Fleet,
    Device(DeviceView),
    Devices(Vec<DeviceView>),
    Request(RequestView),
}

// ============================================================================
// Decision Outputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum NextStep {
    CreateRequest {
        request_type: RequestType,
        addressed_to: OrgId,
    },
    ProceedToBulkRenewal,
    IssueGraceToken,
    RemoveDevice,
    ResolveRequest { to: RequestStatus },
    SendQuote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    Validation,
    Authorization,
    Conflict,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub kind: DenialKind,
    pub reason: String,
}

impl Denial {
    pub fn new(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed(NextStep),
    Denied(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed(_))
    }

    pub fn denial_kind(&self) -> Option<DenialKind> {
        match self {
            Decision::Denied(denial) => Some(denial.kind),
            Decision::Allowed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<NextStep, Denial> {
        match self {
            Decision::Allowed(step) => Ok(step),
            Decision::Denied(denial) => Err(denial),
        }
    }
}

impl From<Result<NextStep, Denial>> for Decision {
    fn from(result: Result<NextStep, Denial>) -> Self {
        match result {
            Ok(step) => Decision::Allowed(step),
            Err(denial) => Decision::Denied(denial),
        }
    }
}

fn deny<T>(kind: DenialKind, reason: impl Into<String>) -> Result<T, Denial> {
    Err(Denial::new(kind, reason))
}

// ============================================================================
// Policy Engine
// ============================================================================

/// Stateless decision function; safe to share and call concurrently
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// The renewal action the decision table assigns to `actor`
    pub fn renewal_action(&self, actor: &Organization) -> Result<Action, Denial> {
        match actor.kind {
            OrgKind::Child { .. } => Ok(Action::RequestRenewal),
            OrgKind::Parent {
                billing: Billing::Direct,
            } => Ok(Action::DirectRenew),
            OrgKind::Parent {
                billing: Billing::ResellerOnly { .. },
            } => Ok(Action::RequestQuote),
            OrgKind::Reseller => deny(
                DenialKind::Authorization,
                "resellers have no fleet of their own to renew",
            ),
        }
    }

    pub fn decide(&self, actor: &Organization, action: Action, target: &Target) -> Decision {
        let outcome = match action {
            Action::RequestRenewal => self.request_renewal(actor, target),
            Action::RequestQuote => self.request_quote(actor, target),
            Action::DirectRenew => self.direct_renew(actor, target, false),
            Action::BulkRenew => self.direct_renew(actor, target, true),
            Action::IssueGrace => self.issue_grace(actor, target),
            Action::RemoveDevice => self.remove_device(actor, target),
            Action::ApproveRequest => self.resolve_request(actor, target, RequestStatus::Approved),
            Action::RejectRequest => self.resolve_request(actor, target, RequestStatus::Rejected),
            Action::ProcessQuote => self.process_quote(actor, target),
        };
        outcome.into()
    }

    fn request_renewal(&self, actor: &Organization, target: &Target) -> Result<NextStep, Denial> {
        let parent = match actor.kind {
            OrgKind::Child { parent } => parent,
            _ => {
                return deny(
                    DenialKind::Authorization,
                    format!(
                        "{} organizations cannot request renewals from a parent",
                        actor.org_type()
                    ),
                )
            }
        };
        let devices = device_targets(target)?;
        ensure_manages(actor, &devices)?;
        ensure_no_pending(&devices)?;
        Ok(NextStep::CreateRequest {
            request_type: RequestType::Renewal,
            addressed_to: parent,
        })
    }

    fn request_quote(&self, actor: &Organization, target: &Target) -> Result<NextStep, Denial> {
        let reseller = match actor.managing_reseller() {
            Some(reseller) => reseller,
            None => {
                return deny(
                    DenialKind::Authorization,
                    "only parents billed through a reseller request quotes",
                )
            }
        };
        let devices = device_targets(target)?;
        ensure_manages(actor, &devices)?;
        ensure_no_pending(&devices)?;
        Ok(NextStep::CreateRequest {
            request_type: RequestType::Quote,
            addressed_to: reseller,
        })
    }

    fn direct_renew(
        &self,
        actor: &Organization,
        target: &Target,
        bulk: bool,
    ) -> Result<NextStep, Denial> {
        if !actor.is_direct_parent() {
            return deny(
                DenialKind::Authorization,
                format!(
                    "direct renewal requires a parent with direct billing, actor is {}",
                    describe(actor)
                ),
            );
        }
        let devices = device_targets(target)?;
        if bulk && devices.is_empty() {
            return deny(DenialKind::Validation, "bulk renewal needs at least one device");
        }
        ensure_manages(actor, &devices)?;
        Ok(NextStep::ProceedToBulkRenewal)
    }

    fn issue_grace(&self, actor: &Organization, target: &Target) -> Result<NextStep, Denial> {
        if actor.org_type() != OrgType::Parent {
            return deny(
                DenialKind::Authorization,
                "only parent organizations issue grace tokens",
            );
        }
        let device = single_device(target, "grace tokens are issued one device at a time")?;
        ensure_manages(actor, &[device])?;
        if device.state.status != DeviceStatus::Expired {
            return deny(
                DenialKind::Validation,
                format!(
                    "grace tokens require an EXPIRED device, device {} is {}",
                    device.device_id, device.state.status
                ),
            );
        }
        if device.state.in_grace_period {
            return deny(
                DenialKind::Validation,
                format!("device {} already has an active grace token", device.device_id),
            );
        }
        Ok(NextStep::IssueGraceToken)
    }

    fn remove_device(&self, actor: &Organization, target: &Target) -> Result<NextStep, Denial> {
        if actor.org_type() == OrgType::Reseller {
            return deny(DenialKind::Authorization, "resellers cannot remove devices");
        }
        let device = single_device(target, "devices are removed one at a time")?;
        ensure_manages(actor, &[device])?;
        if !device.state.status.is_removable() {
            return deny(
                DenialKind::Validation,
                format!(
                    "only EXPIRED or SUSPENDED devices can be removed, device {} is {}",
                    device.device_id, device.state.status
                ),
            );
        }
        Ok(NextStep::RemoveDevice)
    }

    fn resolve_request(
        &self,
        actor: &Organization,
        target: &Target,
        to: RequestStatus,
    ) -> Result<NextStep, Denial> {
        let request = request_target(actor, target)?;
        if actor.org_type() != OrgType::Parent {
            return deny(
                DenialKind::Authorization,
                "only parent organizations approve or reject requests",
            );
        }
        if request.requester_org_type != OrgType::Child {
            return deny(
                DenialKind::Authorization,
                "only requests raised by child organizations can be approved or rejected",
            );
        }
        ensure_pending(request)?;
        if to == RequestStatus::Approved && request.request_type != RequestType::Renewal {
            return deny(
                DenialKind::Validation,
                format!("request {} is a quote request and cannot be approved", request.request_id),
            );
        }
        Ok(NextStep::ResolveRequest { to })
    }

    /// Quote processing against a request, or a proactive quote for devices
    fn process_quote(&self, actor: &Organization, target: &Target) -> Result<NextStep, Denial> {
        let eligible = match actor.kind {
            OrgKind::Reseller => true,
            OrgKind::Parent {
                billing: Billing::ResellerOnly { .. },
            } => true,
            _ => false,
        };

        if let Target::Request(_) = target {
            let request = request_target(actor, target)?;
            if !eligible {
                return deny(
                    DenialKind::Authorization,
                    format!("{} cannot process quotes", describe(actor)),
                );
            }
            ensure_pending(request)?;
            return Ok(NextStep::SendQuote);
        }

        if !eligible {
            return deny(
                DenialKind::Authorization,
                format!("{} cannot process quotes", describe(actor)),
            );
        }
        let devices = device_targets(target)?;
        if devices.is_empty() {
            return deny(DenialKind::Validation, "a quote needs at least one device");
        }
        ensure_manages(actor, &devices)?;
        Ok(NextStep::SendQuote)
    }
}

// ============================================================================
// Guards
// ============================================================================

fn describe(actor: &Organization) -> String {
    match actor.billing_mode() {
        Some(mode) => format!("{} ({:?} billing)", actor.org_type(), mode),
        None => actor.org_type().to_string(),
    }
}

fn device_targets(target: &Target) -> Result<Vec<&DeviceView>, Denial> {
    match target {
        Target::Fleet => Ok(Vec::new()),
        Target::Device(view) => Ok(vec![view]),
        Target::Devices(views) => Ok(views.iter().collect()),
        Target::Request(_) => deny(DenialKind::Validation, "this action targets devices, not requests"),
    }
}

fn single_device<'a>(target: &'a Target, bulk_reason: &str) -> Result<&'a DeviceView, Denial> {
    match target {
        Target::Device(view) => Ok(view),
        Target::Devices(views) if views.len() == 1 => Ok(&views[0]),
        Target::Devices(_) | Target::Fleet => deny(DenialKind::Validation, bulk_reason),
        Target::Request(_) => deny(DenialKind::Validation, "this action targets a device"),
    }
}

fn request_target<'a>(actor: &Organization, target: &'a Target) -> Result<&'a RequestView, Denial> {
    match target {
        Target::Request(view) if view.addressed_to == actor.id => Ok(view),
        Target::Request(view) => deny(
            DenialKind::NotFound,
            format!("request {} not found", view.request_id),
        ),
        _ => deny(DenialKind::Validation, "this action targets a request"),
    }
}

fn ensure_manages(actor: &Organization, devices: &[&DeviceView]) -> Result<(), Denial> {
    for device in devices {
        if !actor.manages(device.owner, device.owner_parent, device.owner_reseller) {
            return deny(
                DenialKind::NotFound,
                format!("device {} not found", device.device_id),
            );
        }
    }
    Ok(())
}

fn ensure_no_pending(devices: &[&DeviceView]) -> Result<(), Denial> {
    match devices.iter().find(|d| d.has_pending_request) {
        Some(device) => deny(
            DenialKind::Validation,
            format!("device {} already has a pending request", device.device_id),
        ),
        None => Ok(()),
    }
}

fn ensure_pending(request: &RequestView) -> Result<(), Denial> {
    if request.status != RequestStatus::Pending {
        return deny(
            DenialKind::Conflict,
            format!("request {} is already {}", request.request_id, request.status),
        );
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
