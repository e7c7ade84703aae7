// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Subscription-level StorageCache endpoints: subnet sizing and the SKU catalog.

use super::amlfs::AMLFS_API_VERSION;
use super::arm::{decode_json, ArmClient};
use crate::domain::cloud::{
    CatalogSku, Page, SkuCapability, SkuCatalogProvider, SubnetSizingProvider,
};
use crate::domain::errors::CloudError;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubnetSizeRequest<'a> {
    sku: SkuRef<'a>,
    #[serde(rename = "storageCapacityTiB")]
    storage_capacity_tib: f64,
}

#[derive(Debug, Serialize)]
struct SkuRef<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetSizeResponse {
    #[serde(default)]
    filesystem_subnet_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSku {
    #[serde(default)]
    name: String,
    #[serde(default)]
    resource_type: String,
    #[serde(default)]
    locations: Vec<String>,
    #[serde(default)]
    capabilities: Vec<ResourceSkuCapability>,
}

#[derive(Debug, Deserialize)]
struct ResourceSkuCapability {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

impl From<ResourceSku> for CatalogSku {
    fn from(sku: ResourceSku) -> Self {
        Self {
            name: sku.name,
            resource_type: sku.resource_type,
            locations: sku.locations,
            capabilities: sku
                .capabilities
                .into_iter()
                .map(|c| SkuCapability {
                    name: c.name,
                    value: c.value,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageCacheManagementClient {
    arm: ArmClient,
}

impl StorageCacheManagementClient {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }
}

#[async_trait]
impl SubnetSizingProvider for StorageCacheManagementClient {
    async fn required_address_count(
        &self,
        sku_name: &str,
        storage_capacity_tib: f64,
    ) -> Result<i64, CloudError> {
        let url = self
            .arm
            .subscription_url("/providers/Microsoft.StorageCache/getRequiredAmlFSSubnetsSize");
        let builder = self
            .arm
            .request(Method::POST, &url)
            .query(&[("api-version", AMLFS_API_VERSION)])
            .json(&SubnetSizeRequest {
                sku: SkuRef { name: sku_name },
                storage_capacity_tib,
            });
        let response = self.arm.send(builder).await?;
        let size: SubnetSizeResponse = decode_json(response).await?;

        size.filesystem_subnet_size.ok_or_else(|| {
            CloudError::Decode("subnet size response is missing filesystemSubnetSize".to_string())
        })
    }
}

#[async_trait]
impl SkuCatalogProvider for StorageCacheManagementClient {
    async fn list_sku_page(
        &self,
        continuation: Option<&str>,
    ) -> Result<Page<CatalogSku>, CloudError> {
        let url = self
            .arm
            .subscription_url("/providers/Microsoft.StorageCache/skus");
        let page = self
            .arm
            .list_page::<ResourceSku>(&url, AMLFS_API_VERSION, continuation)
            .await?;

        Ok(Page {
            items: page.value.into_iter().map(CatalogSku::from).collect(),
            continuation: page.next_link.filter(|link| !link.is_empty()),
        })
    }
}
