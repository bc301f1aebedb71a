// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `fleetctl config`: inspect, check and scaffold the renewal manifest

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use fleet_renewal_core::domain::config::RenewalConfigManifest;
use fleet_renewal_core::domain::quote::format_minor;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective settings after discovery and env overrides
    Show {
        /// Also list the locations searched, in order
        #[arg(long)]
        paths: bool,
    },

    /// Load a manifest and run its checks
    Validate {
        /// Manifest to check; discovered when omitted
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write a starter manifest
    Generate {
        /// Destination file
        #[arg(short, long, default_value = "./fleet-renewal.yaml")]
        output: PathBuf,

        /// Annotated variant with every section spelled out
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = RenewalConfigManifest::load_or_default(config_override.clone())
        .context("could not load renewal manifest")?;

    if show_paths {
        println!("{}", "Searched, highest precedence first:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. FLEET_RENEWAL_CONFIG_PATH: {}",
            std::env::var("FLEET_RENEWAL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./fleet-renewal.yaml");
        println!("  4. ~/.fleet-renewal/config.yaml");
        println!("  5. /etc/fleet-renewal/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Effective settings:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Pricing:".bold());
    println!("  Currency: {}", spec.pricing.currency);
    println!(
        "  Direct renewal: {} per device-year",
        format_minor(spec.pricing.renewal_price_minor)
    );
    println!(
        "  Quote base price: {} per device",
        format_minor(spec.pricing.quote_base_price_minor)
    );
    println!("  Default margin: {}%", spec.pricing.default_margin_percent);
    println!("  Issuer: {}", spec.pricing.issuer_name);
    println!();

    println!("{}", "Lifecycle:".bold());
    println!("  Grace period: {} days", spec.lifecycle.grace_period_days);
    println!("  Maximum term: {} years", spec.lifecycle.max_term_years);
    println!(
        "  Retry: {} attempts, {}ms base delay",
        spec.retry.max_attempts, spec.retry.base_delay_ms
    );
    println!();

    println!("{}", "Serving:".bold());
    println!("  API: {}:{}", spec.api.bind_address, spec.api.port);
    match spec.observability.metrics_port {
        Some(port) => println!("  Metrics: :{}", port),
        None => println!("  Metrics: {}", "(disabled)".dimmed()),
    }
    println!("  Geocoder: {}", spec.geocoder.endpoint);
    match &spec.seed_path {
        Some(path) => println!("  Seed: {}", path.display()),
        None => println!("  Seed: {}", "(none)".dimmed()),
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    let config = RenewalConfigManifest::load_or_default(config_path)
        .context("could not load renewal manifest")?;

    config
        .validate()
        .context("renewal manifest is invalid")?;

    println!("{}", "✓ Manifest OK".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = template(with_examples);

    std::fs::write(&output, sample)
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "{}",
        format!("✓ Wrote {}", output.display()).green()
    );

    Ok(())
}

fn template(with_examples: bool) -> &'static str {
    if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid_manifests() {
        for with_examples in [false, true] {
            let config = RenewalConfigManifest::from_yaml_str(template(with_examples)).unwrap();
            config.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_generate_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("fleet-renewal.yaml");
        generate(output.clone(), false).await.unwrap();

        let config = RenewalConfigManifest::from_yaml_file(&output).unwrap();
        assert_eq!(config.kind, "RenewalConfig");
        validate(Some(output)).await.unwrap();
    }
}
