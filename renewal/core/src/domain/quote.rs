// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Quote pricing and artifacts
//!
//! Amounts are integer minor units of the configured currency. A priced quote
//! is rendered once into a [`QuoteArtifact`]; the artifact is the financial
//! record and is never recomputed from live pricing afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::device::{Device, DeviceId};
use crate::domain::organization::OrgId;

pub const MAX_MARGIN_PERCENT: u32 = 1000;

/// Reseller margin as a whole percentage over base price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MarginPercent(u32);

impl MarginPercent {
    pub fn new(percent: u32) -> Result<Self, QuoteError> {
        if percent > MAX_MARGIN_PERCENT {
            return Err(QuoteError::MarginOutOfRange(percent));
        }
        Ok(Self(percent))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// `base * (1 + margin/100)`, rounded half up to the nearest minor unit
    pub fn apply(&self, base_minor: i64) -> i64 {
        let scaled = base_minor * (100 + i64::from(self.0));
        (scaled + 50).div_euclid(100)
    }
}

impl TryFrom<u32> for MarginPercent {
    type Error = QuoteError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MarginPercent> for u32 {
    fn from(value: MarginPercent) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLineItem {
    pub device_id: DeviceId,
    pub device_name: String,
    pub serial_number: String,
    pub base_price_minor: i64,
    pub line_total_minor: i64,
}

/// Priced device set, ready for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedQuote {
    pub client_org_id: OrgId,
    pub client_name: String,
    pub issuer_name: String,
    pub currency: String,
    pub margin: MarginPercent,
    pub line_items: Vec<QuoteLineItem>,
    pub grand_total_minor: i64,
    pub priced_at: DateTime<Utc>,
}

impl PricedQuote {
    pub fn price(
        client_org_id: OrgId,
        client_name: impl Into<String>,
        issuer_name: impl Into<String>,
        currency: impl Into<String>,
        devices: &[Device],
        base_price_minor: i64,
        margin: MarginPercent,
        priced_at: DateTime<Utc>,
    ) -> Result<Self, QuoteError> {
        if devices.is_empty() {
            return Err(QuoteError::EmptyDeviceSet);
        }
        if base_price_minor < 0 {
            return Err(QuoteError::NegativeBasePrice(base_price_minor));
        }

        let line_items: Vec<QuoteLineItem> = devices
            .iter()
            .map(|device| QuoteLineItem {
                device_id: device.id,
                device_name: device.name.clone(),
                serial_number: device.serial_number.clone(),
                base_price_minor,
                line_total_minor: margin.apply(base_price_minor),
            })
            .collect();
        let grand_total_minor = line_items.iter().map(|item| item.line_total_minor).sum();

        Ok(Self {
            client_org_id,
            client_name: client_name.into(),
            issuer_name: issuer_name.into(),
            currency: currency.into(),
            margin,
            line_items,
            grand_total_minor,
            priced_at,
        })
    }
}

/// Rendered quote document as attached to a QUOTED request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteArtifact {
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub currency: String,
    pub margin: MarginPercent,
    pub grand_total_minor: i64,
    pub generated_at: DateTime<Utc>,
    /// Hex SHA-256 of `bytes`
    pub checksum: String,
}

impl QuoteArtifact {
    pub fn new(
        content_type: impl Into<String>,
        bytes: Vec<u8>,
        quote: &PricedQuote,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let checksum = hex::encode(Sha256::digest(&bytes));
        Self {
            content_type: content_type.into(),
            bytes,
            currency: quote.currency.clone(),
            margin: quote.margin,
            grand_total_minor: quote.grand_total_minor,
            generated_at,
            checksum,
        }
    }
}

/// Format minor units as a decimal amount, e.g. `12000` -> `120.00`
pub fn format_minor(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[derive(Debug, Error, PartialEq)]
pub enum QuoteError {
    #[error("Margin {0}% is outside the accepted range 0-1000%")]
    MarginOutOfRange(u32),

    #[error("A quote needs at least one device")]
    EmptyDeviceSet,

    #[error("Base price cannot be negative: {0}")]
    NegativeBasePrice(i64),
}
