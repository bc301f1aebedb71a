// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model
//!
//! Organizations, devices, renewal requests and quotes, plus the policy
//! engine that decides which of them an actor may act on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and rules; persistence and collaborators are traits

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod gateway;
pub mod organization;
pub mod policy;
pub mod quote;
pub mod renewal;
pub mod repository;
pub mod request;
