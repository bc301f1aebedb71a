// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy surfaced by every renewal operation
//!
//! Validation, authorization and conflict errors are returned verbatim and
//! never retried. External service errors have already been through the
//! bounded retry policy by the time they reach a caller.

use thiserror::Error;

use crate::domain::device::DeviceError;
use crate::domain::gateway::CollaboratorError;
use crate::domain::policy::{Denial, DenialKind};
use crate::domain::quote::QuoteError;
use crate::domain::repository::RepositoryError;
use crate::domain::request::RequestError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenewalError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{service} failed: {message}")]
    ExternalService { service: String, message: String },
}

impl RenewalError {
    pub fn external(service: impl Into<String>, error: CollaboratorError) -> Self {
        RenewalError::ExternalService {
            service: service.into(),
            message: error.to_string(),
        }
    }

    /// Stable machine-readable code
    pub fn kind(&self) -> &'static str {
        match self {
            RenewalError::Validation(_) => "validation_error",
            RenewalError::Authorization(_) => "authorization_error",
            RenewalError::Conflict(_) => "conflict_error",
            RenewalError::NotFound(_) => "not_found_error",
            RenewalError::ExternalService { .. } => "external_service_error",
        }
    }
}

impl From<Denial> for RenewalError {
    fn from(denial: Denial) -> Self {
        match denial.kind {
            DenialKind::Validation => RenewalError::Validation(denial.reason),
            DenialKind::Authorization => RenewalError::Authorization(denial.reason),
            DenialKind::Conflict => RenewalError::Conflict(denial.reason),
            DenialKind::NotFound => RenewalError::NotFound(denial.reason),
        }
    }
}

impl From<RepositoryError> for RenewalError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => RenewalError::NotFound(what),
            RepositoryError::AlreadyCovered(what) => RenewalError::Validation(what),
            RepositoryError::AlreadyExists(what)
            | RepositoryError::VersionConflict(what)
            | RepositoryError::StatusConflict(what) => RenewalError::Conflict(what),
            RepositoryError::Database(message) => RenewalError::ExternalService {
                service: "storage".to_string(),
                message,
            },
        }
    }
}

impl From<RequestError> for RenewalError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::InvalidStateTransition { .. } => RenewalError::Conflict(error.to_string()),
            RequestError::NotApprovable(_) => RenewalError::Validation(error.to_string()),
        }
    }
}

impl From<DeviceError> for RenewalError {
    fn from(error: DeviceError) -> Self {
        RenewalError::Validation(error.to_string())
    }
}

impl From<QuoteError> for RenewalError {
    fn from(error: QuoteError) -> Self {
        RenewalError::Validation(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denials_map_onto_taxonomy() {
        let err: RenewalError = Denial::new(DenialKind::Authorization, "resellers cannot renew").into();
        assert_eq!(err.kind(), "authorization_error");
        assert!(err.to_string().contains("resellers cannot renew"));
    }

    #[test]
    fn test_repository_conflicts_become_conflicts() {
        let err: RenewalError = RepositoryError::StatusConflict("request x".into()).into();
        assert!(matches!(err, RenewalError::Conflict(_)));
        let err: RenewalError = RepositoryError::AlreadyCovered("device d".into()).into();
        assert!(matches!(err, RenewalError::Validation(_)));
        let err: RenewalError = RepositoryError::Database("disk full".into()).into();
        assert_eq!(err.kind(), "external_service_error");
    }
}
