// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod geocoder;
pub mod payment;
pub mod renderer;
pub mod repositories;
pub mod seed;

pub use event_bus::{DomainEvent, EventBus};
