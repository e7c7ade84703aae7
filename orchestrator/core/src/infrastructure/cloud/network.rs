// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Virtual network usage listing (`Microsoft.Network/virtualNetworks/{vnet}/usages`).

use super::arm::ArmClient;
use crate::domain::cloud::{Page, SubnetUsage, SubnetUsageProvider};
use crate::domain::errors::CloudError;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

pub const NETWORK_API_VERSION: &str = "2024-05-01";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageResource {
    #[serde(default)]
    id: String,
    #[serde(default, deserialize_with = "address_count")]
    current_value: i64,
    #[serde(default, deserialize_with = "address_count")]
    limit: i64,
}

/// Usage counts arrive as JSON numbers that may carry a `.0` suffix.
/// Anything that is not a whole number in `i64` range is rejected.
fn address_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value.fract() != 0.0 || value.abs() >= i64::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "address count {} is not a whole number",
            value
        )));
    }
    Ok(value as i64)
}

impl From<UsageResource> for SubnetUsage {
    fn from(usage: UsageResource) -> Self {
        Self {
            id: usage.id,
            current_value: usage.current_value,
            limit: usage.limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VirtualNetworksClient {
    arm: ArmClient,
}

impl VirtualNetworksClient {
    /// `arm` must target the subscription that owns the virtual network.
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }
}

#[async_trait]
impl SubnetUsageProvider for VirtualNetworksClient {
    async fn list_usage_page(
        &self,
        vnet_resource_group: &str,
        vnet_name: &str,
        continuation: Option<&str>,
    ) -> Result<Page<SubnetUsage>, CloudError> {
        let url = self.arm.subscription_url(&format!(
            "/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/usages",
            vnet_resource_group, vnet_name
        ));
        let page = self
            .arm
            .list_page::<UsageResource>(&url, NETWORK_API_VERSION, continuation)
            .await?;

        Ok(Page {
            items: page.value.into_iter().map(SubnetUsage::from).collect(),
            continuation: page.next_link.filter(|link| !link.is_empty()),
        })
    }
}
