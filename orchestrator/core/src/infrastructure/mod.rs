// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cloud;
pub mod event_bus;
pub mod telemetry;

pub use telemetry::init_logging;
