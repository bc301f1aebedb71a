// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer
//!
//! HTTP surface translating requests into application service calls. No
//! business logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | JSON endpoints for devices, requests, quotes and statistics |

pub mod api;
