// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, ports and pure rules of AMLFS volume provisioning.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and invariants shared by the application services

pub mod cloud;
pub mod context;
pub mod errors;
pub mod events;
pub mod operation;
pub mod provisioner_config;
pub mod provisioning;
pub mod sku;
pub mod volume;
