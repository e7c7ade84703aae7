// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod admission;
pub mod dynamic_provisioner;
pub mod volume_locks;
pub mod volume_manager;

// Re-export use cases for convenience
pub use admission::{AdmissionController, SubnetAdmissionResult};
pub use dynamic_provisioner::DynamicProvisioner;
pub use volume_locks::{VolumeLockGuard, VolumeLockRegistry};
pub use volume_manager::{CreateVolumeRequest, CreatedVolume, StandardVolumeService, VolumeService};
