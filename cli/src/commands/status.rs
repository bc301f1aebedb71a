// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Offline status resolution
//!
//! Runs the same resolver the API uses, without loading any fleet data.

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::Args;
use colored::Colorize;

use fleet_renewal_core::domain::device::{in_grace_period, resolve_status, DeviceStatus};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Licence expiry date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub expiry: NaiveDate,

    /// Grace token expiry date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub grace: Option<NaiveDate>,

    /// Evaluation date in UTC (default: today)
    #[arg(long, value_name = "DATE")]
    pub today: Option<NaiveDate>,

    /// Device is suspended by the registry
    #[arg(long)]
    pub suspended: bool,
}

pub fn handle_command(args: StatusArgs) -> Result<()> {
    let today = args.today.unwrap_or_else(|| Utc::now().date_naive());
    let (status, in_grace) = evaluate(&args, today)?;

    let label = match status {
        DeviceStatus::Active => status.to_string().green(),
        DeviceStatus::ExpiringSoon => status.to_string().yellow(),
        DeviceStatus::Expired | DeviceStatus::Suspended => status.to_string().red(),
    };
    println!("{} {}", "Status:".bold(), label);
    println!("  Evaluated on: {}", today);
    println!("  Expiry: {}", args.expiry);
    if let Some(grace) = args.grace {
        let note = if in_grace { "active" } else { "lapsed" };
        println!("  Grace token: {} ({})", grace, note);
    }
    Ok(())
}

fn evaluate(args: &StatusArgs, today: NaiveDate) -> Result<(DeviceStatus, bool)> {
    if let Some(grace) = args.grace {
        if grace <= args.expiry {
            bail!("grace token expiry {} must be later than expiry {}", grace, args.expiry);
        }
    }
    let status = if args.suspended {
        DeviceStatus::Suspended
    } else {
        resolve_status(args.expiry, args.grace, today)
    };
    Ok((status, in_grace_period(args.grace, today)))
}
