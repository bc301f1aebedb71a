// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bulk renewal value objects
//!
//! A bulk renewal is keyed by the payment confirmation token that funds it.
//! The ledger entry for a token moves from `Charged` to `Applied`; replays of
//! the same token read that entry instead of charging or extending again.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::device::DeviceId;
use crate::domain::organization::OrgId;

/// Payment confirmation token issued by the payment gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentToken(pub String);

impl PaymentToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRenewalCommand {
    pub device_ids: Vec<DeviceId>,
    pub years: u32,
    pub payment_token: PaymentToken,
}

/// Expiry write for one device, guarded by the version it was read at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryUpdate {
    pub device_id: DeviceId,
    pub expected_version: u64,
    pub new_expiry: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewedDevice {
    pub device_id: DeviceId,
    pub previous_expiry: NaiveDate,
    pub new_expiry: NaiveDate,
}

/// Outcome of an applied bulk renewal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRenewalReceipt {
    pub payment_token: PaymentToken,
    pub org_id: OrgId,
    pub years: u32,
    pub devices: Vec<RenewedDevice>,
    /// Paid-for devices that were gone from the registry when the charge was
    /// settled; their share needs refunding outside the engine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_devices: Vec<DeviceId>,
    pub amount_minor: i64,
    pub currency: String,
    pub applied_at: DateTime<Utc>,
}

impl BulkRenewalReceipt {
    /// Every device the payment covered, renewed or missing
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices
            .iter()
            .map(|d| d.device_id)
            .chain(self.missing_devices.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    /// Payment captured, expiry not yet written
    Charged {
        org_id: OrgId,
        device_ids: Vec<DeviceId>,
        years: u32,
        amount_minor: i64,
        charged_at: DateTime<Utc>,
    },
    Applied(BulkRenewalReceipt),
}

impl LedgerEntry {
    /// Captured but not yet applied, covering `device`
    pub fn holds_charge_for(&self, device: DeviceId) -> bool {
        matches!(self, LedgerEntry::Charged { device_ids, .. } if device_ids.contains(&device))
    }

    /// Whether this entry was recorded for the same device set and term
    pub fn matches(&self, device_ids: &[DeviceId], years: u32) -> bool {
        let (recorded, recorded_years) = match self {
            LedgerEntry::Charged {
                device_ids, years, ..
            } => (device_ids.clone(), *years),
            LedgerEntry::Applied(receipt) => (receipt.device_ids(), receipt.years),
        };
        same_set(&recorded, device_ids) && recorded_years == years
    }
}

fn same_set(a: &[DeviceId], b: &[DeviceId]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_match_ignores_order() {
        let d1 = DeviceId::new();
        let d2 = DeviceId::new();
        let entry = LedgerEntry::Charged {
            org_id: OrgId::new(),
            device_ids: vec![d1, d2],
            years: 1,
            amount_minor: 40_000,
            charged_at: Utc::now(),
        };
        assert!(entry.matches(&[d2, d1], 1));
        assert!(!entry.matches(&[d1], 1));
        assert!(!entry.matches(&[d1, d2], 2));
        assert!(entry.holds_charge_for(d2));
    }

    #[test]
    fn test_settled_receipt_still_matches_missing_devices() {
        let renewed = DeviceId::new();
        let gone = DeviceId::new();
        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let entry = LedgerEntry::Applied(BulkRenewalReceipt {
            payment_token: PaymentToken::new("tok_1"),
            org_id: OrgId::new(),
            years: 1,
            devices: vec![RenewedDevice {
                device_id: renewed,
                previous_expiry: today,
                new_expiry: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            }],
            missing_devices: vec![gone],
            amount_minor: 40_000,
            currency: "GBP".to_string(),
            applied_at: Utc::now(),
        });
        assert!(entry.matches(&[gone, renewed], 1));
        assert!(!entry.holds_charge_for(renewed));
    }
}
