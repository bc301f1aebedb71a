// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Renewal Request aggregate
//!
//! A request is created PENDING and resolved exactly once into one of the
//! terminal states APPROVED, REJECTED or QUOTED. Resolved requests are never
//! re-opened or deleted.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::device::DeviceId;
use crate::domain::organization::{OrgId, OrgType};
use crate::domain::quote::QuoteArtifact;

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Renewal,
    Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Quoted,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Quoted => "quoted",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

// ============================================================================
// Aggregate Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalRequest {
    pub id: RequestId,
    pub requester_org_id: OrgId,
    pub requester_org_type: OrgType,
    /// Organization expected to resolve the request
    pub addressed_to: OrgId,
    pub device_ids: Vec<DeviceId>,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub notes: String,
    pub response_message: Option<String>,
    /// SHA-256 of the attached artifact, set only when QUOTED
    pub quote_artifact_ref: Option<String>,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub quote_artifact: Option<QuoteArtifact>,
    pub resolved_by: Option<OrgId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RenewalRequest {
    pub fn new(
        requester_org_id: OrgId,
        requester_org_type: OrgType,
        addressed_to: OrgId,
        device_ids: Vec<DeviceId>,
        request_type: RequestType,
        notes: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            requester_org_id,
            requester_org_type,
            addressed_to,
            device_ids,
            request_type,
            status: RequestStatus::Pending,
            notes: notes.into(),
            response_message: None,
            quote_artifact_ref: None,
            quote_artifact: None,
            resolved_by: None,
            resolved_at: None,
            created_at,
        }
    }

    pub fn covers(&self, device_id: &DeviceId) -> bool {
        self.device_ids.contains(device_id)
    }

    // ========================================================================
    // Aggregate Commands (State Mutations)
    // ========================================================================

    pub fn approve(&mut self, actor: OrgId, at: DateTime<Utc>) -> Result<(), RequestError> {
        if self.request_type != RequestType::Renewal {
            return Err(RequestError::NotApprovable(self.request_type));
        }
        self.resolve(RequestStatus::Approved, actor, at)
    }

    pub fn reject(
        &mut self,
        actor: OrgId,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RequestError> {
        self.resolve(RequestStatus::Rejected, actor, at)?;
        self.response_message = message;
        Ok(())
    }

    /// Attach a quote; the artifact and message land with the status change
    pub fn mark_quoted(
        &mut self,
        actor: OrgId,
        artifact: QuoteArtifact,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RequestError> {
        self.resolve(RequestStatus::Quoted, actor, at)?;
        self.quote_artifact_ref = Some(artifact.checksum.clone());
        self.quote_artifact = Some(artifact);
        self.response_message = Some(message.into());
        Ok(())
    }

    fn resolve(
        &mut self,
        to: RequestStatus,
        actor: OrgId,
        at: DateTime<Utc>,
    ) -> Result<(), RequestError> {
        if self.status != RequestStatus::Pending {
            return Err(RequestError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.resolved_by = Some(actor);
        self.resolved_at = Some(at);
        Ok(())
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("Invalid request state transition from {from} to {to}")]
    InvalidStateTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("{0:?} requests cannot be approved")]
    NotApprovable(RequestType),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(request_type: RequestType) -> RenewalRequest {
        RenewalRequest::new(
            OrgId::new(),
            OrgType::Child,
            OrgId::new(),
            vec![DeviceId::new()],
            request_type,
            "please renew",
            Utc::now(),
        )
    }

    #[test]
    fn test_approve_is_terminal() {
        let mut request = pending(RequestType::Renewal);
        let actor = request.addressed_to;
        request.approve(actor, Utc::now()).unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.resolved_by, Some(actor));

        let err = request.reject(actor, None, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            RequestError::InvalidStateTransition {
                from: RequestStatus::Approved,
                to: RequestStatus::Rejected,
            }
        );
        assert_eq!(request.status, RequestStatus::Approved);
    }

    #[test]
    fn test_quote_request_cannot_be_approved() {
        let mut request = pending(RequestType::Quote);
        let err = request.approve(request.addressed_to, Utc::now()).unwrap_err();
        assert_eq!(err, RequestError::NotApprovable(RequestType::Quote));
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[test]
    fn test_reject_keeps_message() {
        let mut request = pending(RequestType::Quote);
        request
            .reject(request.addressed_to, Some("out of budget".into()), Utc::now())
            .unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);
        assert_eq!(request.response_message.as_deref(), Some("out of budget"));
    }
}
