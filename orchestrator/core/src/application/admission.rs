// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Admission Controller
//!
//! Creating an AMLFS cluster takes a long time and fails late when the
//! target subnet is too small. Before submitting a create, the controller
//! asks the backend how many addresses the cluster will need and compares
//! that against the free addresses in the subnet.

use crate::domain::cloud::{SubnetSizingProvider, SubnetUsageProvider};
use crate::domain::context::RequestContext;
use crate::domain::errors::ProvisioningError;
use crate::domain::provisioning::SubnetReference;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetAdmissionResult {
    pub required: i64,
    pub available: i64,
    pub admitted: bool,
}

#[derive(Clone, Default)]
pub struct AdmissionController {
    sizing: Option<Arc<dyn SubnetSizingProvider>>,
    usages: Option<Arc<dyn SubnetUsageProvider>>,
}

impl AdmissionController {
    pub fn new(
        sizing: Option<Arc<dyn SubnetSizingProvider>>,
        usages: Option<Arc<dyn SubnetUsageProvider>>,
    ) -> Self {
        Self { sizing, usages }
    }

    pub async fn check_capacity(
        &self,
        ctx: &RequestContext,
        subnet: &SubnetReference,
        sku_name: &str,
        storage_capacity_tib: f64,
    ) -> Result<SubnetAdmissionResult, ProvisioningError> {
        let required = self
            .required_address_count(ctx, sku_name, storage_capacity_tib)
            .await?;
        let available = self.available_addresses(ctx, subnet).await?;
        let admitted = available >= required;

        info!(
            subnet_id = %subnet.subnet_id,
            sku = sku_name,
            capacity_tib = storage_capacity_tib,
            required,
            available,
            admitted,
            "subnet admission check"
        );

        Ok(SubnetAdmissionResult {
            required,
            available,
            admitted,
        })
    }

    async fn required_address_count(
        &self,
        ctx: &RequestContext,
        sku_name: &str,
        storage_capacity_tib: f64,
    ) -> Result<i64, ProvisioningError> {
        let sizing = self.sizing.as_ref().ok_or_else(|| {
            ProvisioningError::internal("storage management client is not configured")
        })?;

        let required = ctx
            .run(sizing.required_address_count(sku_name, storage_capacity_tib))
            .await?;
        debug!(sku = sku_name, required, "required subnet size");
        Ok(required)
    }

    async fn available_addresses(
        &self,
        ctx: &RequestContext,
        subnet: &SubnetReference,
    ) -> Result<i64, ProvisioningError> {
        let usages = self.usages.as_ref().ok_or_else(|| {
            ProvisioningError::internal("virtual network client is not configured")
        })?;

        let mut continuation: Option<String> = None;
        loop {
            let page = ctx
                .run(usages.list_usage_page(
                    &subnet.vnet_resource_group,
                    &subnet.vnet_name,
                    continuation.as_deref(),
                ))
                .await
                .map_err(ProvisioningError::from)?;

            if let Some(usage) = page.items.iter().find(|u| u.id == subnet.subnet_id) {
                debug!(
                    subnet_id = %usage.id,
                    current = usage.current_value,
                    limit = usage.limit,
                    "found subnet usage"
                );
                return Ok(usage.limit - usage.current_value);
            }

            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        Err(ProvisioningError::failed_precondition(format!(
            "subnet {} not found in vnet {}, resource group {}",
            subnet.subnet_id, subnet.vnet_name, subnet.vnet_resource_group
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::Code;
    use crate::infrastructure::cloud::fake::InMemoryCloud;

    const SUBNET_ID: &str =
        "/subscriptions/sub/resourceGroups/net-rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/amlfs";

    fn subnet() -> SubnetReference {
        SubnetReference {
            vnet_resource_group: "net-rg".to_string(),
            vnet_name: "vnet".to_string(),
            subnet_name: "amlfs".to_string(),
            subnet_id: SUBNET_ID.to_string(),
        }
    }

    fn controller(cloud: &InMemoryCloud) -> AdmissionController {
        let cloud = Arc::new(cloud.clone());
        AdmissionController::new(Some(cloud.clone()), Some(cloud))
    }

    #[tokio::test]
    async fn test_admission_verdicts_around_required_count() {
        for (limit, expected) in [(30, true), (24, true), (23, false)] {
            let cloud = InMemoryCloud::new();
            cloud.set_required_addresses(24);
            cloud.add_subnet_usage("/some/other/subnet", 0, 1000);
            cloud.add_subnet_usage(SUBNET_ID, 0, limit);

            let result = controller(&cloud)
                .check_capacity(&RequestContext::new(), &subnet(), "AMLFS-Durable-Premium-125", 16.0)
                .await
                .unwrap();

            assert_eq!(result.required, 24);
            assert_eq!(result.available, limit);
            assert_eq!(result.admitted, expected, "limit {}", limit);
        }
    }

    #[tokio::test]
    async fn test_available_subtracts_current_usage() {
        let cloud = InMemoryCloud::new();
        cloud.set_required_addresses(24);
        cloud.add_subnet_usage(SUBNET_ID, 10, 30);

        let result = controller(&cloud)
            .check_capacity(&RequestContext::new(), &subnet(), "sku", 4.0)
            .await
            .unwrap();
        assert_eq!(result.available, 20);
        assert!(!result.admitted);
    }

    #[tokio::test]
    async fn test_subnet_found_on_later_page() {
        let cloud = InMemoryCloud::new();
        cloud.set_usage_page_size(1);
        cloud.set_required_addresses(24);
        cloud.add_subnet_usage("/a", 0, 1);
        cloud.add_subnet_usage("/b", 0, 1);
        cloud.add_subnet_usage(SUBNET_ID, 0, 64);

        let result = controller(&cloud)
            .check_capacity(&RequestContext::new(), &subnet(), "sku", 4.0)
            .await
            .unwrap();
        assert!(result.admitted);
    }

    #[tokio::test]
    async fn test_missing_subnet_is_failed_precondition() {
        let cloud = InMemoryCloud::new();
        cloud.set_usage_page_size(1);
        cloud.add_subnet_usage("/a", 0, 1);
        cloud.add_subnet_usage("/b", 0, 1);

        let err = controller(&cloud)
            .check_capacity(&RequestContext::new(), &subnet(), "sku", 4.0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert!(err.message().contains(SUBNET_ID));
        assert!(err.message().contains("vnet vnet"));
        assert!(err.message().contains("resource group net-rg"));
    }

    #[tokio::test]
    async fn test_invalid_sku_is_invalid_argument() {
        let cloud = InMemoryCloud::new();
        cloud.reject_sku("AMLFS-Bogus");
        cloud.add_subnet_usage(SUBNET_ID, 0, 64);

        let err = controller(&cloud)
            .check_capacity(&RequestContext::new(), &subnet(), "AMLFS-Bogus", 4.0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unconfigured_clients_are_internal() {
        let err = AdmissionController::default()
            .check_capacity(&RequestContext::new(), &subnet(), "sku", 4.0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }
}
