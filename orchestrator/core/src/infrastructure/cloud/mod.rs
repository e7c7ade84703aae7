// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cloud Infrastructure Module
//!
//! Concrete implementations of the cloud ports in `domain::cloud`:
//! live Azure Resource Manager adapters and an in-memory fake.

pub mod amlfs;
pub mod arm;
pub mod fake;
pub mod management;
pub mod network;

pub use amlfs::AmlFilesystemsClient;
pub use arm::ArmClient;
pub use fake::InMemoryCloud;
pub use management::StorageCacheManagementClient;
pub use network::VirtualNetworksClient;

use crate::domain::cloud::CloudClients;
use crate::domain::provisioner_config::ProvisionerConfigManifest;
use std::sync::Arc;
use tracing::{info, warn};

/// Cloud backend selection
#[derive(Debug, Clone)]
pub enum CloudBackend {
    /// Azure Resource Manager (production)
    Azure {
        endpoint: String,
        subscription_id: String,
        /// Subscription owning the virtual network
        network_subscription_id: String,
        token: Option<String>,
    },

    /// In-memory fake (development/testing)
    InMemory(Arc<InMemoryCloud>),

    /// No clients; dynamic provisioning fails with `Internal`
    Unconfigured,
}

impl CloudBackend {
    /// Pick a backend from the loaded configuration.
    pub fn from_config(config: &ProvisionerConfigManifest) -> anyhow::Result<Self> {
        if config.spec.provisioning.mock_dynamic_provisioning {
            return Ok(CloudBackend::Unconfigured);
        }

        let cloud = &config.spec.cloud;
        if !cloud.has_credentials() {
            warn!("no subscription configured, dynamic provisioning is disabled");
            return Ok(CloudBackend::Unconfigured);
        }

        Ok(CloudBackend::Azure {
            endpoint: cloud.arm_endpoint.clone(),
            subscription_id: cloud.subscription_id.clone(),
            network_subscription_id: cloud.network_subscription().to_string(),
            token: cloud.resolve_access_token()?,
        })
    }
}

/// Factory function to create cloud clients from a backend selection
pub fn create_cloud_clients(backend: CloudBackend) -> CloudClients {
    match backend {
        CloudBackend::Azure {
            endpoint,
            subscription_id,
            network_subscription_id,
            token,
        } => {
            info!(%endpoint, %subscription_id, "using Azure Resource Manager backend");
            let arm = ArmClient::new(endpoint, subscription_id, token);
            let network_arm = arm.for_subscription(network_subscription_id);
            let management = Arc::new(StorageCacheManagementClient::new(arm.clone()));

            CloudClients {
                filesystems: Some(Arc::new(AmlFilesystemsClient::new(arm))),
                sizing: Some(management.clone()),
                usages: Some(Arc::new(VirtualNetworksClient::new(network_arm))),
                skus: Some(management),
            }
        }
        CloudBackend::InMemory(cloud) => CloudClients {
            filesystems: Some(cloud.clone()),
            sizing: Some(cloud.clone()),
            usages: Some(cloud.clone()),
            skus: Some(cloud),
        },
        CloudBackend::Unconfigured => CloudClients::unconfigured(),
    }
}
