// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Device records and status resolution
//!
//! Status is never stored. It is derived from the underlying expiry date on
//! each read:
//!
//! | Condition                                   | Status          |
//! |---------------------------------------------|-----------------|
//! | `today < expiry - 30 days`                  | `ACTIVE`        |
//! | `expiry - 30 days <= today < expiry`        | `EXPIRING_SOON` |
//! | `today >= expiry`                           | `EXPIRED`       |
//! | registry `suspended` flag set               | `SUSPENDED`     |
//!
//! The grace period is an overlay reported alongside the status; it never
//! replaces it. All comparisons happen on calendar days in UTC.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::organization::{OrgId, OrgType};

/// Days before expiry at which a device starts reporting `EXPIRING_SOON`
pub const EXPIRING_SOON_WINDOW_DAYS: u64 = 30;

// ============================================================================
// Value Objects
// ============================================================================

/// Unique identifier for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Where a device is installed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Free-text label (site, street, city)
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Active,
    ExpiringSoon,
    Expired,
    Suspended,
}

impl DeviceStatus {
    /// Whether the device counts towards "at risk" client figures
    pub fn is_at_risk(&self) -> bool {
        !matches!(self, DeviceStatus::Active)
    }

    pub fn is_removable(&self) -> bool {
        matches!(self, DeviceStatus::Expired | DeviceStatus::Suspended)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Active => "ACTIVE",
            DeviceStatus::ExpiringSoon => "EXPIRING_SOON",
            DeviceStatus::Expired => "EXPIRED",
            DeviceStatus::Suspended => "SUSPENDED",
        };
        write!(f, "{}", s)
    }
}

/// Status plus grace overlay for a device on a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedState {
    pub status: DeviceStatus,
    pub in_grace_period: bool,
}

// ============================================================================
// Status Resolution
// ============================================================================

/// Date-derived status of a licence expiring on `expiry_date`.
///
/// The grace token is accepted for signature symmetry but does not influence
/// the result. `SUSPENDED` is never produced here.
pub fn resolve_status(
    expiry_date: NaiveDate,
    _grace_token_expiry: Option<NaiveDate>,
    today: NaiveDate,
) -> DeviceStatus {
    if today >= expiry_date {
        return DeviceStatus::Expired;
    }
    let window_start = expiry_date
        .checked_sub_days(Days::new(EXPIRING_SOON_WINDOW_DAYS))
        .unwrap_or(NaiveDate::MIN);
    if today >= window_start {
        DeviceStatus::ExpiringSoon
    } else {
        DeviceStatus::Active
    }
}

pub fn in_grace_period(grace_token_expiry: Option<NaiveDate>, today: NaiveDate) -> bool {
    matches!(grace_token_expiry, Some(grace) if grace > today)
}

// ============================================================================
// Aggregate Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub org_id: OrgId,
    pub name: String,
    pub serial_number: String,
    #[serde(default)]
    pub location: Location,
    pub expiry_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_token_expiry: Option<NaiveDate>,
    /// Externally-set override from the registry
    #[serde(default)]
    pub suspended: bool,
    /// Optimistic concurrency counter, bumped on every stored mutation
    #[serde(default)]
    pub version: u64,
}

impl Device {
    pub fn new(
        org_id: OrgId,
        name: impl Into<String>,
        serial_number: impl Into<String>,
        expiry_date: NaiveDate,
    ) -> Self {
        Self {
            id: DeviceId::new(),
            org_id,
            name: name.into(),
            serial_number: serial_number.into(),
            location: Location::default(),
            expiry_date,
            grace_token_expiry: None,
            suspended: false,
            version: 0,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    // ========================================================================
    // Aggregate Queries
    // ========================================================================

    pub fn resolve(&self, today: NaiveDate) -> ResolvedState {
        let status = if self.suspended {
            DeviceStatus::Suspended
        } else {
            resolve_status(self.expiry_date, self.grace_token_expiry, today)
        };
        ResolvedState {
            status,
            in_grace_period: in_grace_period(self.grace_token_expiry, today),
        }
    }

    pub fn status(&self, today: NaiveDate) -> DeviceStatus {
        self.resolve(today).status
    }

    /// Expiry date after renewing for `years`, measured from the current expiry
    pub fn renewed_expiry(&self, years: u32) -> Result<NaiveDate, DeviceError> {
        years
            .checked_mul(12)
            .and_then(|months| self.expiry_date.checked_add_months(Months::new(months)))
            .ok_or(DeviceError::ExpiryOverflow {
                expiry: self.expiry_date,
                years,
            })
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.serial_number.trim().is_empty() {
            return Err(DeviceError::MissingSerial);
        }
        if let Some(grace) = self.grace_token_expiry {
            if grace <= self.expiry_date {
                return Err(DeviceError::GraceNotAfterExpiry {
                    grace,
                    expiry: self.expiry_date,
                });
            }
        }
        Ok(())
    }

    /// Checks a new record must pass before it enters the registry
    pub fn validate_registration(&self, owner: OrgType) -> Result<(), DeviceError> {
        if owner == OrgType::Reseller {
            return Err(DeviceError::ResellerOwned {
                serial: self.serial_number.clone(),
            });
        }
        self.validate()
    }

    // ========================================================================
    // Aggregate Commands (State Mutations)
    // ========================================================================

    /// Attach a grace token running `days` from `today`
    pub fn grant_grace(&mut self, today: NaiveDate, days: u32) -> Result<NaiveDate, DeviceError> {
        if in_grace_period(self.grace_token_expiry, today) {
            return Err(DeviceError::GraceAlreadyActive {
                until: self.grace_token_expiry.unwrap_or(today),
            });
        }
        let until = today
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or(DeviceError::GraceOverflow { from: today, days })?;
        if until <= self.expiry_date {
            return Err(DeviceError::GraceNotAfterExpiry {
                grace: until,
                expiry: self.expiry_date,
            });
        }
        self.grace_token_expiry = Some(until);
        Ok(until)
    }

    /// Move the expiry forward; a renewal supersedes any outstanding grace
    pub fn apply_renewal(&mut self, new_expiry: NaiveDate) {
        self.expiry_date = new_expiry;
        self.grace_token_expiry = None;
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum DeviceError {
    #[error("Device serial number cannot be empty")]
    MissingSerial,

    #[error("Grace token expiry {grace} must be later than expiry date {expiry}")]
    GraceNotAfterExpiry { grace: NaiveDate, expiry: NaiveDate },

    #[error("A grace token is already active until {until}")]
    GraceAlreadyActive { until: NaiveDate },

    #[error("Renewing {years} year(s) from {expiry} overflows the calendar")]
    ExpiryOverflow { expiry: NaiveDate, years: u32 },

    #[error("A {days}-day grace token from {from} overflows the calendar")]
    GraceOverflow { from: NaiveDate, days: u32 },

    #[error("Device {serial} cannot be owned by a reseller")]
    ResellerOwned { serial: String },
}

// ============================================================================
// Tests
// ============================================================================
