// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Manager Application Service
//!
//! Entry points for the plugin-protocol layer, coordinating:
//! - Domain layer: parameter parsing, SKU rounding, volume identifiers
//! - Dynamic provisioner: AMLFS cluster create/delete
//! - Lock registry: one in-flight operation per volume
//! - Event bus: publishing ProvisioningEvents for observability

use crate::application::dynamic_provisioner::DynamicProvisioner;
use crate::application::volume_locks::VolumeLockRegistry;
use crate::domain::context::RequestContext;
use crate::domain::errors::{Code, ProvisioningError};
use crate::domain::events::{ProvisioningEvent, VolumeOperation};
use crate::domain::provisioner_config::{CloudConfig, ProvisionerConfigManifest};
use crate::domain::provisioning::{
    parse_provisioning_parameters, validate_and_prepend_volume_name, PARAM_AMLFS_NAME,
    PARAM_FS_NAME, PARAM_MGS_IP_ADDRESS, PARAM_RESOURCE_GROUP, PARAM_SUB_DIR,
};
use crate::domain::cloud::CloudClients;
use crate::domain::sku::{bytes_to_tib, SkuCapacityTable};
use crate::domain::volume::VolumeIdentifier;
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lustre filesystem name of every AMLFS cluster
pub const DEFAULT_LUSTRE_FS_NAME: &str = "lustrefs";

const OPERATION_IN_PROGRESS: &str = "An operation with the given Volume ID";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    /// 0 means "use the default size"
    pub required_bytes: i64,
    /// 0 means "no limit"
    pub limit_bytes: i64,
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedVolume {
    pub volume_id: String,
    pub capacity_bytes: i64,
    /// Request parameters plus the values resolved during provisioning
    pub volume_context: HashMap<String, String>,
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait VolumeService: Send + Sync {
    async fn create_volume(
        &self,
        ctx: &RequestContext,
        request: CreateVolumeRequest,
    ) -> Result<CreatedVolume, ProvisioningError>;

    /// Deleting a volume that owns no AMLFS cluster is a no-op.
    async fn delete_volume(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
    ) -> Result<(), ProvisioningError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardVolumeService {
    provisioner: Arc<DynamicProvisioner>,
    locks: Arc<VolumeLockRegistry>,
    event_bus: Arc<EventBus>,
    cloud: CloudConfig,
    dynamic_sku_lookup: bool,
    sku_tables: DashMap<String, SkuCapacityTable>,
}

impl StandardVolumeService {
    pub fn new(
        provisioner: Arc<DynamicProvisioner>,
        locks: Arc<VolumeLockRegistry>,
        event_bus: Arc<EventBus>,
        cloud: CloudConfig,
    ) -> Self {
        Self {
            provisioner,
            locks,
            event_bus,
            cloud,
            dynamic_sku_lookup: false,
            sku_tables: DashMap::new(),
        }
    }

    /// Refresh SKU values from the catalog (once per location) before rounding.
    pub fn with_dynamic_sku_lookup(mut self, enabled: bool) -> Self {
        self.dynamic_sku_lookup = enabled;
        self
    }

    /// Wire a service from a loaded configuration manifest.
    pub fn from_config(
        config: &ProvisionerConfigManifest,
        clients: CloudClients,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let provisioning = &config.spec.provisioning;
        let clients = if provisioning.mock_dynamic_provisioning {
            warn!("mock dynamic provisioning is enabled, AMLFS clusters cannot be created");
            CloudClients::unconfigured()
        } else {
            clients
        };

        let provisioner = DynamicProvisioner::new(
            clients,
            provisioning.sku_table(),
            provisioning.poll_frequency,
        )
        .with_event_bus(event_bus.as_ref().clone());

        Self::new(
            Arc::new(provisioner),
            VolumeLockRegistry::shared(),
            event_bus,
            config.spec.cloud.clone(),
        )
        .with_dynamic_sku_lookup(provisioning.dynamic_sku_lookup)
    }

    pub fn locks(&self) -> &Arc<VolumeLockRegistry> {
        &self.locks
    }

    async fn sku_table_for(&self, ctx: &RequestContext, location: &str) -> SkuCapacityTable {
        if !self.dynamic_sku_lookup {
            return self.provisioner.default_skus().clone();
        }

        let key = location.to_lowercase();
        if let Some(table) = self.sku_tables.get(&key) {
            return table.clone();
        }

        match self.provisioner.sku_values_for_location(ctx, location).await {
            Some(table) => {
                self.sku_tables.insert(key, table.clone());
                table
            }
            // Not cached, so the catalog is retried on the next request.
            None => self.provisioner.default_skus().clone(),
        }
    }

    async fn create_locked(
        &self,
        ctx: &RequestContext,
        request: CreateVolumeRequest,
    ) -> Result<CreatedVolume, ProvisioningError> {
        let volume_name = request.name;
        let mut parameters = request.parameters;

        let mut provisioning = parse_provisioning_parameters(&parameters)?;
        let dynamic = provisioning.is_dynamic();

        if dynamic && provisioning.location.is_empty() {
            provisioning.location = self.cloud.location.clone();
        }

        let sku_table = if dynamic {
            self.sku_table_for(ctx, &provisioning.location).await
        } else {
            self.provisioner.default_skus().clone()
        };
        let capacity_bytes =
            sku_table.round_up_to_increment(request.required_bytes, &provisioning.sku_name)?;
        debug!(volume = %volume_name, capacity_bytes, "rounded requested capacity");

        if request.limit_bytes != 0 && capacity_bytes > request.limit_bytes {
            return Err(ProvisioningError::invalid_argument(format!(
                "CreateVolume required capacity {} is greater than capacity limit {}",
                capacity_bytes, request.limit_bytes
            )));
        }

        if dynamic {
            if provisioning.resource_group.is_empty() {
                provisioning.resource_group = self.cloud.resource_group.clone();
            }
            self.cloud.populate_subnet(&mut provisioning.subnet);
            provisioning.storage_capacity_tib = bytes_to_tib(capacity_bytes);

            let amlfs_name = validate_and_prepend_volume_name(&provisioning.amlfs_name, &volume_name);
            if !amlfs_name.contains(&volume_name) {
                return Err(ProvisioningError::invalid_argument(format!(
                    "CreateVolume invalid volume name {}, cannot create valid AMLFS name. Check length and characters",
                    volume_name
                )));
            }
            provisioning.amlfs_name = amlfs_name;

            info!(
                volume = %volume_name,
                amlfs_name = %provisioning.amlfs_name,
                resource_group = %provisioning.resource_group,
                capacity_tib = provisioning.storage_capacity_tib,
                "beginning to create AMLFS cluster"
            );

            let mgs_address = self
                .provisioner
                .create_filesystem(ctx, &provisioning)
                .await
                .map_err(|e| {
                    with_operation_context(
                        e,
                        format!("CreateVolume error when creating AMLFS {}", provisioning.amlfs_name),
                    )
                })?;

            set_parameter(&mut parameters, PARAM_AMLFS_NAME, &provisioning.amlfs_name);
            set_parameter(&mut parameters, PARAM_RESOURCE_GROUP, &provisioning.resource_group);
            set_parameter(&mut parameters, PARAM_MGS_IP_ADDRESS, &mgs_address);
            set_parameter(&mut parameters, PARAM_FS_NAME, DEFAULT_LUSTRE_FS_NAME);
        }

        let identifier = volume_identifier_from_parameters(&volume_name, &parameters)?;
        let volume_id = identifier
            .encode()
            .map_err(|e| ProvisioningError::invalid_argument(e.to_string()))?;

        self.event_bus
            .publish_provisioning_event(ProvisioningEvent::VolumeCreated {
                volume_id: volume_id.clone(),
                capacity_bytes,
                amlfs_name: identifier.is_dynamic().then(|| identifier.amlfs_name.clone()),
                mgs_address: identifier.mgs_address.clone(),
                created_at: Utc::now(),
            });

        info!(volume = %volume_name, %volume_id, capacity_bytes, "created volume");

        Ok(CreatedVolume {
            volume_id,
            capacity_bytes,
            volume_context: parameters,
        })
    }

    async fn delete_locked(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
    ) -> Result<(), ProvisioningError> {
        let identifier = match VolumeIdentifier::decode(volume_id) {
            Ok(identifier) => identifier,
            Err(e) => {
                error!(%volume_id, "error parsing volume ID, nothing to delete: {}", e);
                return Ok(());
            }
        };

        info!(%volume_id, "deleting volume");

        if identifier.is_dynamic() {
            self.provisioner
                .delete_filesystem(ctx, &identifier.resource_group, &identifier.amlfs_name)
                .await
                .map_err(|e| {
                    with_operation_context(
                        e,
                        format!(
                            "DeleteVolume error when deleting AMLFS {} in resource group {}",
                            identifier.amlfs_name, identifier.resource_group
                        ),
                    )
                })?;
        }

        self.event_bus
            .publish_provisioning_event(ProvisioningEvent::VolumeDeleted {
                volume_id: volume_id.to_string(),
                amlfs_name: identifier.is_dynamic().then(|| identifier.amlfs_name.clone()),
                deleted_at: Utc::now(),
            });

        info!(%volume_id, "volume deleted");
        Ok(())
    }

    fn publish_failure(&self, volume: &str, operation: VolumeOperation, err: &ProvisioningError) {
        self.event_bus
            .publish_provisioning_event(ProvisioningEvent::VolumeOperationFailed {
                volume: volume.to_string(),
                operation,
                code: err.code(),
                reason: err.message().to_string(),
                failed_at: Utc::now(),
            });
    }
}

#[async_trait]
impl VolumeService for StandardVolumeService {
    async fn create_volume(
        &self,
        ctx: &RequestContext,
        request: CreateVolumeRequest,
    ) -> Result<CreatedVolume, ProvisioningError> {
        if request.name.is_empty() {
            return Err(ProvisioningError::invalid_argument(
                "CreateVolume Name must be provided",
            ));
        }

        let volume_name = request.name.clone();
        let Some(_guard) = self.locks.try_lock(&volume_name) else {
            return Err(ProvisioningError::aborted(format!(
                "{} {} already exists",
                OPERATION_IN_PROGRESS, volume_name
            )));
        };

        let result = self.create_locked(ctx, request).await;
        if let Err(e) = &result {
            warn!(volume = %volume_name, code = %e.code(), "CreateVolume failed: {}", e.message());
            self.publish_failure(&volume_name, VolumeOperation::Create, e);
        }
        result
    }

    async fn delete_volume(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
    ) -> Result<(), ProvisioningError> {
        if volume_id.is_empty() {
            return Err(ProvisioningError::invalid_argument(
                "Volume ID missing in request",
            ));
        }

        let Some(_guard) = self.locks.try_lock(volume_id) else {
            return Err(ProvisioningError::aborted(format!(
                "{} {} already exists",
                OPERATION_IN_PROGRESS, volume_id
            )));
        };

        let result = self.delete_locked(ctx, volume_id).await;
        if let Err(e) = &result {
            warn!(%volume_id, code = %e.code(), "DeleteVolume failed: {}", e.message());
            self.publish_failure(volume_id, VolumeOperation::Delete, e);
        }
        result
    }
}

/// Prefix `context` onto a provisioner error. Unclassified errors are passed
/// through untouched.
fn with_operation_context(err: ProvisioningError, context: String) -> ProvisioningError {
    if err.code() == Code::Unknown {
        error!("unknown error occurred: {}: {}", context, err.message());
        return err;
    }
    err.with_context(context)
}

/// Insert `key`, replacing any entry whose key matches case-insensitively.
fn set_parameter(parameters: &mut HashMap<String, String>, key: &str, value: &str) {
    parameters.retain(|k, _| !k.eq_ignore_ascii_case(key));
    parameters.insert(key.to_string(), value.to_string());
}

/// Build the identifier for `volume_name` from (resolved) parameters.
pub fn volume_identifier_from_parameters(
    volume_name: &str,
    parameters: &HashMap<String, String>,
) -> Result<VolumeIdentifier, ProvisioningError> {
    let mut mgs_address = String::new();
    let mut export_name = String::new();
    let mut amlfs_name = String::new();
    let mut resource_group = String::new();
    let mut sub_dir = String::new();

    for (key, value) in parameters {
        match key.to_lowercase().as_str() {
            PARAM_MGS_IP_ADDRESS => mgs_address = value.clone(),
            PARAM_FS_NAME => export_name = value.trim_matches('/').to_string(),
            PARAM_AMLFS_NAME => amlfs_name = value.clone(),
            PARAM_RESOURCE_GROUP => resource_group = value.clone(),
            PARAM_SUB_DIR => {
                sub_dir = value.trim_matches('/').to_string();
                if sub_dir.is_empty() {
                    return Err(ProvisioningError::invalid_argument(
                        "CreateVolume Parameter sub-dir must not be empty if provided",
                    ));
                }
            }
            _ => {}
        }
    }

    if export_name.is_empty() {
        return Err(ProvisioningError::invalid_argument(
            "CreateVolume Parameter fs-name must be provided",
        ));
    }

    let mut identifier = VolumeIdentifier::new(volume_name, export_name, mgs_address)
        .with_sub_dir(sub_dir);
    if !amlfs_name.is_empty() {
        identifier = identifier.with_dynamic_filesystem(amlfs_name, resource_group);
    }
    Ok(identifier)
}
