// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway
//!
//! Contracts for the payment, rendering and geocoding collaborators.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Ports implemented by adapters in `infrastructure`

// External Collaborator Interfaces (Anti-Corruption Layer)
//
// Payment capture, document rendering and geocoding are owned by outside
// services. The core consumes these contracts only; adapters live in
// infrastructure/.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::device::Coordinates;
use crate::domain::quote::PricedQuote;
use crate::domain::renewal::PaymentToken;

/// Confirms charges against payment confirmation tokens
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Capture `amount_minor` against `token`
    async fn capture(
        &self,
        token: &PaymentToken,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentCapture, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCapture {
    pub token: PaymentToken,
    pub amount_minor: i64,
    pub reference: String,
}

/// Turns a priced quote into an opaque document
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, quote: &PricedQuote) -> Result<RenderedDocument, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Resolves a free-text place name to coordinates
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>, CollaboratorError>;
}

/// Failure reported by an external collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Network failure or timeout; safe to retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// Definitive refusal (e.g. card declined); never retried
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}
