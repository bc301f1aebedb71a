// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Quote Generation Coordinator
//!
//! Prices a device set, renders it through the [`DocumentRenderer`] and, on
//! send, hands the artifact to the lifecycle service in the same call that
//! moves the request to QUOTED. After that the stored artifact is the record;
//! margin or price changes made later never touch it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::fleet_context::FleetContext;
use crate::application::request_lifecycle::RequestLifecycleService;
use crate::application::retry::RetryPolicy;
use crate::domain::config::PricingConfig;
use crate::domain::device::{Device, DeviceId};
use crate::domain::error::RenewalError;
use crate::domain::gateway::DocumentRenderer;
use crate::domain::organization::{OrgId, OrgKind, Organization};
use crate::domain::policy::{Action, Target};
use crate::domain::quote::{MarginPercent, PricedQuote, QuoteArtifact};
use crate::domain::request::{RenewalRequest, RequestId};

/// Message attached when the caller does not supply one
pub const DEFAULT_QUOTE_MESSAGE: &str = "Here is your renewal quote.";

pub struct QuoteCoordinator {
    context: FleetContext,
    lifecycle: Arc<dyn RequestLifecycleService>,
    renderer: Arc<dyn DocumentRenderer>,
    pricing: PricingConfig,
    retry: RetryPolicy,
    default_margins: RwLock<HashMap<OrgId, MarginPercent>>,
}

impl QuoteCoordinator {
    pub fn new(
        context: FleetContext,
        lifecycle: Arc<dyn RequestLifecycleService>,
        renderer: Arc<dyn DocumentRenderer>,
        pricing: PricingConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            context,
            lifecycle,
            renderer,
            pricing,
            retry,
            default_margins: RwLock::new(HashMap::new()),
        }
    }

    /// Margin applied when a caller does not pass one explicitly
    pub fn default_margin(&self, org: OrgId) -> Result<MarginPercent, RenewalError> {
        if let Some(margin) = self.default_margins.read().get(&org) {
            return Ok(*margin);
        }
        Ok(MarginPercent::new(self.pricing.default_margin_percent)?)
    }

    /// Change the caller's default margin for future quotes
    pub fn set_default_margin(
        &self,
        actor: &Organization,
        margin: MarginPercent,
    ) -> Result<(), RenewalError> {
        let issues_quotes =
            matches!(actor.kind, OrgKind::Reseller) || actor.is_reseller_only_parent();
        if !issues_quotes {
            return Err(RenewalError::Authorization(format!(
                "{} does not issue quotes",
                actor.org_type()
            )));
        }
        self.default_margins.write().insert(actor.id, margin);
        info!(org_id = %actor.id, margin = margin.value(), "Default quote margin updated");
        Ok(())
    }

    /// Price and render a quote for `request_id`, then resolve the request as QUOTED
    pub async fn send(
        &self,
        actor: &Organization,
        request_id: RequestId,
        margin: Option<MarginPercent>,
        message: Option<String>,
    ) -> Result<RenewalRequest, RenewalError> {
        // Early check so nothing is rendered for a request the actor cannot quote;
        // the lifecycle service repeats it under compare-and-set.
        let request = self.lifecycle.get(request_id, actor).await?;
        let target = Target::Request((&request).into());
        self.context
            .policy
            .decide(actor, Action::ProcessQuote, &target)
            .into_result()?;

        let devices = if request.device_ids.is_empty() {
            let mut devices = self
                .context
                .registry
                .list_by_orgs(&[request.requester_org_id])
                .await?;
            devices.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
            devices
        } else {
            self.context.devices(&request.device_ids).await?
        };
        let client = self.context.organization(request.requester_org_id).await?;

        let artifact = self.generate(actor, &client, &devices, margin).await?;
        let message = message.unwrap_or_else(|| DEFAULT_QUOTE_MESSAGE.to_string());
        self.lifecycle
            .respond_with_quote(request_id, actor, artifact, message)
            .await
    }

    /// Render a quote for a client's devices without attaching it to a request
    pub async fn preview(
        &self,
        actor: &Organization,
        client_id: OrgId,
        device_ids: &[DeviceId],
        margin: Option<MarginPercent>,
    ) -> Result<QuoteArtifact, RenewalError> {
        let scope = self.context.scope_orgs(actor, Some(client_id)).await?;
        let client = scope
            .first()
            .cloned()
            .ok_or_else(|| RenewalError::NotFound(format!("organization {}", client_id)))?;

        let devices = self.context.devices(device_ids).await?;
        let views = self.context.device_views(&devices, self.context.today()).await?;
        if devices.iter().any(|d| !scope.iter().any(|org| org.id == d.org_id)) {
            return Err(RenewalError::Validation(format!(
                "every device must belong to client {}",
                client_id
            )));
        }
        self.context
            .policy
            .decide(actor, Action::ProcessQuote, &Target::Devices(views))
            .into_result()?;

        self.generate(actor, &client, &devices, margin).await
    }

    async fn generate(
        &self,
        actor: &Organization,
        client: &Organization,
        devices: &[Device],
        margin: Option<MarginPercent>,
    ) -> Result<QuoteArtifact, RenewalError> {
        let margin = match margin {
            Some(margin) => margin,
            None => self.default_margin(actor.id)?,
        };
        let now = self.context.clock.now();
        let priced = PricedQuote::price(
            client.id,
            client.name.clone(),
            self.pricing.issuer_name.clone(),
            self.pricing.currency.clone(),
            devices,
            self.pricing.quote_base_price_minor,
            margin,
            now,
        )?;

        let renderer = &self.renderer;
        let quote = &priced;
        let document = self
            .retry
            .run("quote rendering", move || renderer.render(quote))
            .await
            .map_err(|e| RenewalError::external("document renderer", e))?;

        debug!(
            client = %client.id,
            devices = priced.line_items.len(),
            margin = margin.value(),
            grand_total_minor = priced.grand_total_minor,
            "Quote rendered"
        );
        Ok(QuoteArtifact::new(
            document.content_type,
            document.bytes,
            &priced,
            now,
        ))
    }
}
