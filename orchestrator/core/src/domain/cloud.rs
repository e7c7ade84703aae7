// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cloud Ports - Anti-Corruption Layer for the AMLFS management plane
//!
//! The orchestrator never talks to Azure Resource Manager directly. It goes
//! through the traits below, which have a live HTTP implementation and an
//! in-memory fake (see `infrastructure::cloud`). Every method returns a raw
//! [`CloudError`]; translation into the provisioning taxonomy happens in the
//! application layer, at the call site.

use crate::domain::errors::CloudError;
use crate::domain::provisioning::{MaintenanceWindow, RootSquashPolicy, SquashMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One page of a paged listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque token for the next page; `None` on the last page
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }
}

/// Result of a single poll of a long-running operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    InProgress,
    Succeeded(T),
}

/// Handle to a submitted long-running operation.
///
/// A poll that returns `Err` is terminal: the operation failed remotely or
/// could not be observed.
#[async_trait]
pub trait OperationHandle<T>: Send {
    async fn poll(&mut self) -> Result<PollStatus<T>, CloudError>;
}

pub type BoxedOperation<T> = Box<dyn OperationHandle<T>>;

// ============================================================================
// Filesystem resources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemIdentity {
    /// ARM ids of user-assigned managed identities
    pub user_assigned: Vec<String>,
}

/// Root squash block as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSquashSettings {
    pub mode: SquashMode,
    pub no_squash_nid_lists: Option<String>,
    pub squash_uid: Option<u32>,
    pub squash_gid: Option<u32>,
}

impl From<&RootSquashPolicy> for RootSquashSettings {
    fn from(policy: &RootSquashPolicy) -> Self {
        if policy.mode == SquashMode::None {
            return Self {
                mode: SquashMode::None,
                no_squash_nid_lists: None,
                squash_uid: None,
                squash_gid: None,
            };
        }
        Self {
            mode: policy.mode,
            no_squash_nid_lists: policy.no_squash_nid_lists.clone(),
            squash_uid: policy.squash_uid,
            squash_gid: policy.squash_gid,
        }
    }
}

/// Desired state submitted with a create-or-update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmlFilesystemSpec {
    pub location: String,
    pub tags: BTreeMap<String, String>,
    pub subnet_id: String,
    pub maintenance_window: MaintenanceWindow,
    pub storage_capacity_tib: f64,
    pub zones: Vec<String>,
    pub sku_name: String,
    pub identity: Option<FilesystemIdentity>,
    pub root_squash: Option<RootSquashSettings>,
}

/// Observed state of an existing filesystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmlFilesystem {
    pub name: String,
    pub location: String,
    pub sku_name: String,
    pub storage_capacity_tib: f64,
    pub zones: Vec<String>,
    pub provisioning_state: Option<String>,
    pub mgs_address: Option<String>,
}

impl AmlFilesystem {
    /// Fields where the existing filesystem differs from `desired`.
    pub fn drift_from(&self, desired: &AmlFilesystemSpec) -> Vec<String> {
        let mut drift = Vec::new();
        if !self.sku_name.is_empty() && self.sku_name != desired.sku_name {
            drift.push(format!("sku: {} -> {}", self.sku_name, desired.sku_name));
        }
        if self.storage_capacity_tib > 0.0
            && (self.storage_capacity_tib - desired.storage_capacity_tib).abs() > f64::EPSILON
        {
            drift.push(format!(
                "capacity: {} TiB -> {} TiB",
                self.storage_capacity_tib, desired.storage_capacity_tib
            ));
        }
        if !self.location.is_empty() && !self.location.eq_ignore_ascii_case(&desired.location) {
            drift.push(format!("location: {} -> {}", self.location, desired.location));
        }
        if !self.zones.is_empty() && self.zones != desired.zones {
            drift.push(format!("zones: {:?} -> {:?}", self.zones, desired.zones));
        }
        drift
    }
}

#[async_trait]
pub trait FilesystemStore: Send + Sync {
    /// `Ok(None)` when the filesystem does not exist.
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<AmlFilesystem>, CloudError>;

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        spec: &AmlFilesystemSpec,
    ) -> Result<BoxedOperation<AmlFilesystem>, CloudError>;

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<BoxedOperation<()>, CloudError>;
}

// ============================================================================
// Networking & catalog
// ============================================================================

/// IP usage of one subnet, as reported by the virtual network usage listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetUsage {
    pub id: String,
    pub current_value: i64,
    pub limit: i64,
}

#[async_trait]
pub trait SubnetUsageProvider: Send + Sync {
    async fn list_usage_page(
        &self,
        vnet_resource_group: &str,
        vnet_name: &str,
        continuation: Option<&str>,
    ) -> Result<Page<SubnetUsage>, CloudError>;
}

#[async_trait]
pub trait SubnetSizingProvider: Send + Sync {
    /// Number of subnet addresses a filesystem of this SKU and size needs.
    async fn required_address_count(
        &self,
        sku_name: &str,
        storage_capacity_tib: f64,
    ) -> Result<i64, CloudError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuCapability {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSku {
    pub name: String,
    pub resource_type: String,
    pub locations: Vec<String>,
    pub capabilities: Vec<SkuCapability>,
}

impl CatalogSku {
    pub fn capability(&self, name: &str) -> Option<&str> {
        self.capabilities
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }
}

#[async_trait]
pub trait SkuCatalogProvider: Send + Sync {
    async fn list_sku_page(
        &self,
        continuation: Option<&str>,
    ) -> Result<Page<CatalogSku>, CloudError>;
}

/// The set of remote collaborators handed to the provisioner.
///
/// Any of them may be absent (mock dynamic provisioning); operations that
/// need an absent client fail with `Internal` before touching the network.
#[derive(Clone, Default)]
pub struct CloudClients {
    pub filesystems: Option<Arc<dyn FilesystemStore>>,
    pub sizing: Option<Arc<dyn SubnetSizingProvider>>,
    pub usages: Option<Arc<dyn SubnetUsageProvider>>,
    pub skus: Option<Arc<dyn SkuCatalogProvider>>,
}

impl CloudClients {
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.filesystems.is_some() && self.sizing.is_some() && self.usages.is_some()
    }
}

impl std::fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClients")
            .field("filesystems", &self.filesystems.is_some())
            .field("sizing", &self.sizing.is_some())
            .field("usages", &self.usages.is_some())
            .field("skus", &self.skus.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provisioning::DayOfWeek;

    fn spec() -> AmlFilesystemSpec {
        AmlFilesystemSpec {
            location: "eastus".to_string(),
            tags: BTreeMap::new(),
            subnet_id: "subnet".to_string(),
            maintenance_window: MaintenanceWindow {
                day_of_week: DayOfWeek::Sunday,
                time_of_day_utc: "02:00".to_string(),
            },
            storage_capacity_tib: 16.0,
            zones: vec!["1".to_string()],
            sku_name: "AMLFS-Durable-Premium-125".to_string(),
            identity: None,
            root_squash: None,
        }
    }

    #[test]
    fn test_drift_lists_changed_fields() {
        let existing = AmlFilesystem {
            name: "fs".to_string(),
            location: "EastUS".to_string(),
            sku_name: "AMLFS-Durable-Premium-250".to_string(),
            storage_capacity_tib: 8.0,
            zones: vec!["1".to_string()],
            ..Default::default()
        };
        let drift = existing.drift_from(&spec());
        assert_eq!(drift.len(), 2);
        assert!(drift[0].starts_with("sku"));
        assert!(drift[1].starts_with("capacity"));
    }

    #[test]
    fn test_root_squash_none_carries_mode_only() {
        let policy = RootSquashPolicy {
            mode: SquashMode::None,
            no_squash_nid_lists: Some("10.0.0.1@tcp".to_string()),
            squash_uid: Some(1),
            squash_gid: Some(1),
        };
        let settings = RootSquashSettings::from(&policy);
        assert_eq!(settings.mode, SquashMode::None);
        assert!(settings.no_squash_nid_lists.is_none());
        assert!(settings.squash_uid.is_none());
    }
}
