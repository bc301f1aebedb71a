// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP server bootstrap
//!
//! Wires the in-memory stores, collaborators and application services from a
//! [`RenewalConfigManifest`], then serves the API until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use fleet_renewal_core::{
    application::{
        BulkRenewalOrchestrator, FleetContext, QuoteCoordinator, RetryPolicy,
        StandardFleetService, StandardRequestLifecycleService,
    },
    domain::{
        clock::{Clock, SystemClock},
        config::RenewalConfigManifest,
        gateway::Geocoder,
    },
    infrastructure::{
        event_bus::{EventBus, EventBusError},
        geocoder::NominatimGeocoder,
        payment::RecordingPaymentGateway,
        renderer::PlainTextQuoteRenderer,
        repositories::{
            InMemoryDeviceRegistry, InMemoryOrganizationRepository, InMemoryRenewalLedger,
            InMemoryRenewalRequestRepository,
        },
        seed::FleetSeed,
    },
    presentation::api::{self, AppState},
};

pub struct ServeOptions {
    pub config_path: Option<PathBuf>,
    pub seed_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub async fn serve(options: ServeOptions) -> Result<()> {
    let mut config = RenewalConfigManifest::load_or_default(options.config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    if let Some(seed) = options.seed_path {
        config.spec.seed_path = Some(seed);
    }
    info!("Configuration loaded: {}", config.metadata.name);

    if let Some(port) = config.spec.observability.metrics_port {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let geocoder = Arc::new(
        NominatimGeocoder::new(&config.spec.geocoder)
            .context("Failed to initialize geocoder")?,
    );
    let event_bus = Arc::new(EventBus::with_default_capacity());
    spawn_event_logger(&event_bus);

    let app = build_app(&config, Arc::new(SystemClock), geocoder, event_bus).await?;

    let host = options
        .host
        .unwrap_or_else(|| config.spec.api.bind_address.clone());
    let port = options.port.unwrap_or(config.spec.api.port);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Fleet renewal API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Fleet renewal API shutting down");

    Ok(())
}

/// Build the router over fresh in-memory stores, loading the configured seed
pub async fn build_app(
    config: &RenewalConfigManifest,
    clock: Arc<dyn Clock>,
    geocoder: Arc<dyn Geocoder>,
    event_bus: Arc<EventBus>,
) -> Result<Router> {
    let spec = &config.spec;
    let organizations = Arc::new(InMemoryOrganizationRepository::new());
    let registry = Arc::new(InMemoryDeviceRegistry::new());
    let requests = Arc::new(InMemoryRenewalRequestRepository::new());

    if let Some(path) = &spec.seed_path {
        let seed = FleetSeed::from_yaml_file(path)?;
        seed.load_into(organizations.as_ref(), registry.as_ref())
            .await
            .context("Failed to load fleet seed")?;
    } else {
        warn!("No seed_path configured; starting with an empty fleet");
    }

    let context = FleetContext::new(
        organizations.clone(),
        registry,
        requests,
        Arc::new(InMemoryRenewalLedger::new()),
        clock,
    );
    let retry = RetryPolicy::from(&spec.retry);

    let lifecycle = Arc::new(StandardRequestLifecycleService::new(
        context.clone(),
        event_bus.clone(),
    ));
    let fleet = Arc::new(StandardFleetService::new(
        context.clone(),
        geocoder,
        event_bus.clone(),
        spec.lifecycle.grace_period_days,
        retry,
    ));
    let quotes = Arc::new(QuoteCoordinator::new(
        context.clone(),
        lifecycle.clone(),
        Arc::new(PlainTextQuoteRenderer::new()),
        spec.pricing.clone(),
        retry,
    ));
    let renewals = Arc::new(BulkRenewalOrchestrator::new(
        context,
        Arc::new(RecordingPaymentGateway::new()),
        event_bus,
        spec.pricing.clone(),
        spec.lifecycle.max_term_years,
        retry,
    ));

    Ok(api::app(AppState {
        organizations,
        fleet,
        requests: lifecycle,
        quotes,
        renewals,
        start_time: Instant::now(),
    }))
}

/// Mirror every domain event into the log
fn spawn_event_logger(event_bus: &EventBus) {
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => debug!(?event, "Domain event"),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fleet_renewal_core::infrastructure::geocoder::StaticGeocoder;
    use tower::ServiceExt;

    const SEED: &str = r#"
organizations:
  - id: 7b0f5a52-8d0c-4a41-9a0e-3f3c1f5d6a01
    name: Acme
    kind: { type: PARENT, billing: { mode: DIRECT } }
devices:
  - id: 2f6f5c1e-0a7d-4f3e-9c55-5a9d0b1e7c02
    org_id: 7b0f5a52-8d0c-4a41-9a0e-3f3c1f5d6a01
    name: Lobby screen
    serial_number: SN-0001
    expiry_date: 2030-01-31
"#;

    #[tokio::test]
    async fn test_build_app_loads_seed() {
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seed.yaml");
        std::fs::write(&seed_path, SEED).unwrap();

        let mut config = RenewalConfigManifest::default();
        config.spec.seed_path = Some(seed_path);

        let app = build_app(
            &config,
            Arc::new(SystemClock),
            Arc::new(StaticGeocoder::new()),
            Arc::new(EventBus::new(16)),
        )
        .await
        .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices")
                    .header("x-org-id", "7b0f5a52-8d0c-4a41-9a0e-3f3c1f5d6a01")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let devices: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(devices.as_array().map(Vec::len), Some(1));
        assert_eq!(devices[0]["organization_name"], "Acme");
    }

    #[tokio::test]
    async fn test_missing_seed_file_fails() {
        let mut config = RenewalConfigManifest::default();
        config.spec.seed_path = Some(PathBuf::from("/nonexistent/seed.yaml"));
        let result = build_app(
            &config,
            Arc::new(SystemClock),
            Arc::new(StaticGeocoder::new()),
            Arc::new(EventBus::new(16)),
        )
        .await;
        assert!(result.is_err());
    }
}
