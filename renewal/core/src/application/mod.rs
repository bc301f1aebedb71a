// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application services
//!
//! Orchestrate the domain model: each service re-reads state, asks the
//! policy engine and commits through a conditional write.

pub mod bulk_renewal;
pub mod fleet_context;
pub mod fleet_service;
pub mod keyed_locks;
pub mod quote_coordinator;
pub mod request_lifecycle;
pub mod retry;

pub use bulk_renewal::BulkRenewalOrchestrator;
pub use fleet_context::FleetContext;
pub use fleet_service::{FleetService, StandardFleetService};
pub use keyed_locks::KeyedLocks;
pub use quote_coordinator::QuoteCoordinator;
pub use request_lifecycle::{RequestLifecycleService, StandardRequestLifecycleService};
pub use retry::RetryPolicy;
