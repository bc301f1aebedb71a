// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::device::{DeviceId, DeviceStatus};
use crate::domain::organization::OrgId;
use crate::domain::renewal::PaymentToken;
use crate::domain::request::{RequestId, RequestType};

/// Renewal request lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestEvent {
    RequestCreated {
        request_id: RequestId,
        requester: OrgId,
        addressed_to: OrgId,
        request_type: RequestType,
        device_count: usize,
        created_at: DateTime<Utc>,
    },
    RequestApproved {
        request_id: RequestId,
        approved_by: OrgId,
        approved_at: DateTime<Utc>,
    },
    RequestRejected {
        request_id: RequestId,
        rejected_by: OrgId,
        rejected_at: DateTime<Utc>,
    },
    RequestQuoted {
        request_id: RequestId,
        quoted_by: OrgId,
        artifact_ref: String,
        grand_total_minor: i64,
        quoted_at: DateTime<Utc>,
    },
}

impl RequestEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::RequestCreated { request_id, .. }
            | Self::RequestApproved { request_id, .. }
            | Self::RequestRejected { request_id, .. }
            | Self::RequestQuoted { request_id, .. } => *request_id,
        }
    }
}

/// Device registry mutations made by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceEvent {
    GraceIssued {
        device_id: DeviceId,
        issued_by: OrgId,
        grace_until: NaiveDate,
        issued_at: DateTime<Utc>,
    },
    DeviceRemoved {
        device_id: DeviceId,
        removed_by: OrgId,
        last_status: DeviceStatus,
        removed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RenewalEvent {
    PaymentCaptured {
        payment_token: PaymentToken,
        org_id: OrgId,
        amount_minor: i64,
        captured_at: DateTime<Utc>,
    },
    BulkRenewalApplied {
        payment_token: PaymentToken,
        org_id: OrgId,
        device_count: usize,
        years: u32,
        applied_at: DateTime<Utc>,
    },
    BulkRenewalReplayed {
        payment_token: PaymentToken,
        replayed_at: DateTime<Utc>,
    },
}
