// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Renewal Request Lifecycle Application Service
//!
//! Owns every write to a request's status. Each transition:
//! 1. re-reads the request,
//! 2. asks the policy engine for a decision,
//! 3. applies the aggregate command,
//! 4. persists with a compare-and-set on `PENDING`.
//!
//! Two racing resolutions of one request therefore produce exactly one
//! success; the loser gets a `Conflict`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::fleet_context::FleetContext;
use crate::domain::device::DeviceId;
use crate::domain::error::RenewalError;
use crate::domain::events::RequestEvent;
use crate::domain::organization::{OrgKind, Organization};
use crate::domain::policy::{Action, NextStep, RequestView, Target};
use crate::domain::quote::QuoteArtifact;
use crate::domain::request::{RenewalRequest, RequestId, RequestStatus, RequestType};
use crate::infrastructure::event_bus::EventBus;

// ============================================================================
// Commands & Queries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequestCommand {
    pub request_type: RequestType,
    #[serde(default)]
    pub device_ids: Vec<DeviceId>,
    #[serde(default)]
    pub notes: String,
}

/// Which side of a request the caller is looking from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestScope {
    /// Requests raised by the caller (and, for a parent, by its children)
    #[default]
    Owner,
    /// Requests routed to the caller for resolution
    Processor,
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait RequestLifecycleService: Send + Sync {
    async fn create(
        &self,
        actor: &Organization,
        command: CreateRequestCommand,
    ) -> Result<RenewalRequest, RenewalError>;

    async fn approve(
        &self,
        request_id: RequestId,
        actor: &Organization,
    ) -> Result<RenewalRequest, RenewalError>;

    async fn reject(
        &self,
        request_id: RequestId,
        actor: &Organization,
        message: Option<String>,
    ) -> Result<RenewalRequest, RenewalError>;

    async fn respond_with_quote(
        &self,
        request_id: RequestId,
        actor: &Organization,
        artifact: QuoteArtifact,
        message: String,
    ) -> Result<RenewalRequest, RenewalError>;

    async fn get(
        &self,
        request_id: RequestId,
        actor: &Organization,
    ) -> Result<RenewalRequest, RenewalError>;

    async fn list(
        &self,
        actor: &Organization,
        scope: RequestScope,
    ) -> Result<Vec<RenewalRequest>, RenewalError>;

    /// The artifact stored when the request was quoted
    async fn fetch_quote(
        &self,
        request_id: RequestId,
        actor: &Organization,
    ) -> Result<QuoteArtifact, RenewalError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardRequestLifecycleService {
    context: FleetContext,
    event_bus: Arc<EventBus>,
}

impl StandardRequestLifecycleService {
    pub fn new(context: FleetContext, event_bus: Arc<EventBus>) -> Self {
        Self { context, event_bus }
    }

    async fn load(&self, request_id: RequestId) -> Result<RenewalRequest, RenewalError> {
        self.context
            .requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| RenewalError::NotFound(format!("request {}", request_id)))
    }

    /// Re-read the request and check the policy for `action`
    async fn authorize(
        &self,
        request_id: RequestId,
        actor: &Organization,
        action: Action,
    ) -> Result<RenewalRequest, RenewalError> {
        let request = self.load(request_id).await?;
        let target = Target::Request(RequestView::from(&request));
        self.context
            .policy
            .decide(actor, action, &target)
            .into_result()
            .map_err(|denial| {
                debug!(request_id = %request_id, actor = %actor.id, ?action, reason = %denial.reason, "Request action denied");
                RenewalError::from(denial)
            })?;
        Ok(request)
    }

    async fn commit(&self, request: &RenewalRequest) -> Result<(), RenewalError> {
        self.context
            .requests
            .compare_and_set(request, RequestStatus::Pending)
            .await
            .map_err(|e| {
                warn!(request_id = %request.id, "Request resolution lost a race: {}", e);
                RenewalError::from(e)
            })?;
        metrics::counter!(
            "fleet_renewal_requests_resolved_total",
            "outcome" => request.status.as_str()
        )
        .increment(1);
        Ok(())
    }

    async fn can_view(&self, actor: &Organization, request: &RenewalRequest) -> Result<bool, RenewalError> {
        if request.requester_org_id == actor.id || request.addressed_to == actor.id {
            return Ok(true);
        }
        if let OrgKind::Parent { .. } = actor.kind {
            let requester = self.context.organization(request.requester_org_id).await?;
            return Ok(requester.parent_ref() == Some(actor.id));
        }
        Ok(false)
    }
}

#[async_trait]
impl RequestLifecycleService for StandardRequestLifecycleService {
    async fn create(
        &self,
        actor: &Organization,
        command: CreateRequestCommand,
    ) -> Result<RenewalRequest, RenewalError> {
        let unique: HashSet<DeviceId> = command.device_ids.iter().copied().collect();
        if unique.len() != command.device_ids.len() {
            return Err(RenewalError::Validation(
                "device ids must not repeat within a request".to_string(),
            ));
        }

        let action = match command.request_type {
            RequestType::Renewal => Action::RequestRenewal,
            RequestType::Quote => Action::RequestQuote,
        };

        let today = self.context.today();
        let devices = self.context.devices(&command.device_ids).await?;
        let views = self.context.device_views(&devices, today).await?;
        let target = if views.is_empty() {
            Target::Fleet
        } else {
            Target::Devices(views)
        };

        let step = self.context.policy.decide(actor, action, &target).into_result()?;
        let NextStep::CreateRequest {
            request_type,
            addressed_to,
        } = step
        else {
            return Err(RenewalError::Validation(format!(
                "{:?} does not create a request",
                action
            )));
        };

        let request = RenewalRequest::new(
            actor.id,
            actor.org_type(),
            addressed_to,
            command.device_ids,
            request_type,
            command.notes,
            self.context.clock.now(),
        );
        self.context.requests.insert(&request).await?;

        info!(
            request_id = %request.id,
            requester = %actor.id,
            addressed_to = %addressed_to,
            request_type = ?request_type,
            devices = request.device_ids.len(),
            "Renewal request created"
        );
        metrics::counter!("fleet_renewal_requests_created_total").increment(1);
        self.event_bus.publish_request_event(RequestEvent::RequestCreated {
            request_id: request.id,
            requester: actor.id,
            addressed_to,
            request_type,
            device_count: request.device_ids.len(),
            created_at: request.created_at,
        });

        Ok(request)
    }

    async fn approve(
        &self,
        request_id: RequestId,
        actor: &Organization,
    ) -> Result<RenewalRequest, RenewalError> {
        let mut request = self
            .authorize(request_id, actor, Action::ApproveRequest)
            .await?;
        let now = self.context.clock.now();
        request.approve(actor.id, now)?;
        self.commit(&request).await?;

        info!(request_id = %request_id, approved_by = %actor.id, "Renewal request approved");
        self.event_bus.publish_request_event(RequestEvent::RequestApproved {
            request_id,
            approved_by: actor.id,
            approved_at: now,
        });
        Ok(request)
    }

    async fn reject(
        &self,
        request_id: RequestId,
        actor: &Organization,
        message: Option<String>,
    ) -> Result<RenewalRequest, RenewalError> {
        let mut request = self
            .authorize(request_id, actor, Action::RejectRequest)
            .await?;
        let now = self.context.clock.now();
        request.reject(actor.id, message, now)?;
        self.commit(&request).await?;

        info!(request_id = %request_id, rejected_by = %actor.id, "Renewal request rejected");
        self.event_bus.publish_request_event(RequestEvent::RequestRejected {
            request_id,
            rejected_by: actor.id,
            rejected_at: now,
        });
        Ok(request)
    }

    async fn respond_with_quote(
        &self,
        request_id: RequestId,
        actor: &Organization,
        artifact: QuoteArtifact,
        message: String,
    ) -> Result<RenewalRequest, RenewalError> {
        let mut request = self
            .authorize(request_id, actor, Action::ProcessQuote)
            .await?;
        let now = self.context.clock.now();
        let artifact_ref = artifact.checksum.clone();
        let grand_total_minor = artifact.grand_total_minor;
        request.mark_quoted(actor.id, artifact, message, now)?;
        self.commit(&request).await?;

        info!(
            request_id = %request_id,
            quoted_by = %actor.id,
            artifact_ref = %artifact_ref,
            grand_total_minor,
            "Renewal request quoted"
        );
        self.event_bus.publish_request_event(RequestEvent::RequestQuoted {
            request_id,
            quoted_by: actor.id,
            artifact_ref,
            grand_total_minor,
            quoted_at: now,
        });
        Ok(request)
    }

    async fn get(
        &self,
        request_id: RequestId,
        actor: &Organization,
    ) -> Result<RenewalRequest, RenewalError> {
        let request = self.load(request_id).await?;
        if !self.can_view(actor, &request).await? {
            return Err(RenewalError::NotFound(format!("request {}", request_id)));
        }
        Ok(request)
    }

    async fn list(
        &self,
        actor: &Organization,
        scope: RequestScope,
    ) -> Result<Vec<RenewalRequest>, RenewalError> {
        let requests = match scope {
            RequestScope::Owner => {
                let mut requesters = vec![actor.id];
                if let OrgKind::Parent { .. } = actor.kind {
                    requesters.extend(
                        self.context
                            .organizations
                            .list_children(actor.id)
                            .await?
                            .into_iter()
                            .map(|child| child.id),
                    );
                }
                self.context.requests.list_by_requesters(&requesters).await?
            }
            RequestScope::Processor => self.context.requests.list_addressed_to(actor.id).await?,
        };
        debug!(actor = %actor.id, ?scope, count = requests.len(), "Listed renewal requests");
        Ok(requests)
    }

    async fn fetch_quote(
        &self,
        request_id: RequestId,
        actor: &Organization,
    ) -> Result<QuoteArtifact, RenewalError> {
        let request = self.get(request_id, actor).await?;
        request
            .quote_artifact
            .ok_or_else(|| RenewalError::NotFound(format!("quote for request {}", request_id)))
    }
}
