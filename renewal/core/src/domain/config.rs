// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Renewal Engine Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) covering:
// - Pricing for direct renewals and reseller quotes
// - Lifecycle knobs (grace period length, maximum renewal term)
// - Retry policy for payment and rendering collaborators
// - API binding, observability and geocoder endpoint

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "fleet-renewal/v1";
pub const KIND: &str = "RenewalConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfigManifest {
    /// API version (must be "fleet-renewal/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "RenewalConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: RenewalConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewalConfigSpec {
    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub geocoder: GeocoderConfig,

    /// YAML file with organizations and devices loaded at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// ISO 4217 currency code for all amounts
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Direct renewal price per device per year, in minor units
    #[serde(default = "default_renewal_price")]
    pub renewal_price_minor: i64,

    /// Reseller base price per device before margin, in minor units
    #[serde(default = "default_quote_base_price")]
    pub quote_base_price_minor: i64,

    #[serde(default = "default_margin")]
    pub default_margin_percent: u32,

    /// Name printed at the top of rendered quotes
    #[serde(default = "default_issuer")]
    pub issuer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_grace_days")]
    pub grace_period_days: u32,

    #[serde(default = "default_max_term")]
    pub max_term_years: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds, doubled after each attempt
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter port; disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_currency() -> String {
    "GBP".to_string()
}

fn default_renewal_price() -> i64 {
    20_000
}

fn default_quote_base_price() -> i64 {
    10_000
}

fn default_margin() -> u32 {
    20
}

fn default_issuer() -> String {
    "Global Signs Partners Ltd".to_string()
}

fn default_grace_days() -> u32 {
    7
}

fn default_max_term() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    200
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_geocoder_endpoint() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    format!("fleet-renewal/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            renewal_price_minor: default_renewal_price(),
            quote_base_price_minor: default_quote_base_price(),
            default_margin_percent: default_margin(),
            issuer_name: default_issuer(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_days(),
            max_term_years: default_max_term(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geocoder_endpoint(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RenewalConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "fleet-renewal".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: RenewalConfigSpec::default(),
        }
    }
}

impl RenewalConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// First existing file among `$FLEET_RENEWAL_CONFIG_PATH`,
    /// `./fleet-renewal.yaml`, `~/.fleet-renewal/config.yaml` and
    /// `/etc/fleet-renewal/config.yaml`.
    pub fn discover_config() -> Option<PathBuf> {
        let from_env = std::env::var_os("FLEET_RENEWAL_CONFIG_PATH").map(PathBuf::from);
        let user = dirs::home_dir().map(|home| home.join(".fleet-renewal").join("config.yaml"));

        from_env
            .into_iter()
            .chain(std::iter::once(PathBuf::from("./fleet-renewal.yaml")))
            .chain(user)
            .chain(std::iter::once(PathBuf::from("/etc/fleet-renewal/config.yaml")))
            .find(|candidate| candidate.is_file())
    }

    /// An explicit path must load; otherwise the first discovered file wins
    /// and built-in defaults cover the rest. Environment overrides apply last.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = match cli_path.or_else(Self::discover_config) {
            Some(path) => {
                tracing::info!(path = %path.display(), "reading renewal config");
                Self::from_yaml_file(&path)
                    .map_err(|e| anyhow::anyhow!("cannot load {}: {}", path.display(), e))?
            }
            None => {
                tracing::warn!("no fleet-renewal.yaml found, running on built-in defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// `FLEET_RENEWAL_*` variables win over file values; unparsable ones are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FLEET_RENEWAL_GRACE_DAYS") {
            match val.parse::<u32>() {
                Ok(days) => {
                    tracing::info!("Environment override: FLEET_RENEWAL_GRACE_DAYS={}", days);
                    self.spec.lifecycle.grace_period_days = days;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for FLEET_RENEWAL_GRACE_DAYS: '{}'. Expected a day count. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("FLEET_RENEWAL_METRICS_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: FLEET_RENEWAL_METRICS_PORT={}", port);
                    self.spec.observability.metrics_port = Some(port);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for FLEET_RENEWAL_METRICS_PORT: '{}'. Ignoring.",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let pricing = &self.spec.pricing;
        if pricing.currency.len() != 3 || !pricing.currency.chars().all(|c| c.is_ascii_uppercase()) {
            anyhow::bail!("pricing.currency must be a three-letter ISO code, got '{}'", pricing.currency);
        }
        if pricing.renewal_price_minor <= 0 {
            anyhow::bail!("pricing.renewal_price_minor must be positive");
        }
        if pricing.quote_base_price_minor <= 0 {
            anyhow::bail!("pricing.quote_base_price_minor must be positive");
        }
        if pricing.default_margin_percent > crate::domain::quote::MAX_MARGIN_PERCENT {
            anyhow::bail!(
                "pricing.default_margin_percent {} exceeds {}",
                pricing.default_margin_percent,
                crate::domain::quote::MAX_MARGIN_PERCENT
            );
        }

        if self.spec.lifecycle.grace_period_days == 0 {
            anyhow::bail!("lifecycle.grace_period_days must be at least 1");
        }
        if self.spec.lifecycle.max_term_years == 0 {
            anyhow::bail!("lifecycle.max_term_years must be at least 1");
        }

        if self.spec.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        Ok(())
    }
}
