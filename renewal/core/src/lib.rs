// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet Renewal Core
//!
//! Renewal authorization and lifecycle engine for device fleets owned by
//! PARENT / CHILD organizations and serviced by RESELLER intermediaries.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Hosts the domain model, application services, infrastructure
//!   adapters and the HTTP presentation layer

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
