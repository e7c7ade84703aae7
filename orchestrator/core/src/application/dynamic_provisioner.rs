// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dynamic Provisioner
//!
//! Drives the create-or-update and delete workflows for AMLFS clusters:
//! existence check, subnet admission, submission of the long-running
//! operation and polling it to a terminal state. Remote failures are
//! translated here, where the remote API was invoked.

use crate::application::admission::AdmissionController;
use crate::domain::cloud::{
    AmlFilesystemSpec, CloudClients, FilesystemIdentity, FilesystemStore, RootSquashSettings,
};
use crate::domain::context::RequestContext;
use crate::domain::errors::ProvisioningError;
use crate::domain::events::ProvisioningEvent;
use crate::domain::operation::Poller;
use crate::domain::provisioning::ProvisioningRequest;
use crate::domain::sku::{
    SkuCapacityEntry, SkuCapacityTable, AMLFS_SKU_RESOURCE_TYPE,
    SKU_CAPACITY_INCREMENT_CAPABILITY, SKU_CAPACITY_MAXIMUM_CAPABILITY,
};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct DynamicProvisioner {
    clients: CloudClients,
    admission: AdmissionController,
    default_skus: SkuCapacityTable,
    poll_frequency: Duration,
    event_bus: Option<EventBus>,
}

impl DynamicProvisioner {
    pub fn new(
        clients: CloudClients,
        default_skus: SkuCapacityTable,
        poll_frequency: Duration,
    ) -> Self {
        let admission = AdmissionController::new(clients.sizing.clone(), clients.usages.clone());
        Self {
            clients,
            admission,
            default_skus,
            poll_frequency,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn poll_frequency(&self) -> Duration {
        self.poll_frequency
    }

    pub fn default_skus(&self) -> &SkuCapacityTable {
        &self.default_skus
    }

    fn filesystems(&self) -> Result<&Arc<dyn FilesystemStore>, ProvisioningError> {
        self.clients
            .filesystems
            .as_ref()
            .ok_or_else(|| ProvisioningError::internal("aml filesystem client is not configured"))
    }

    pub async fn filesystem_exists(
        &self,
        ctx: &RequestContext,
        resource_group: &str,
        name: &str,
    ) -> Result<bool, ProvisioningError> {
        let filesystems = self.filesystems()?;
        let existing = ctx.run(filesystems.get(resource_group, name)).await?;
        debug!(resource_group, name, exists = existing.is_some(), "aml filesystem lookup");
        Ok(existing.is_some())
    }

    /// Create (or update) the filesystem described by `request` and return
    /// its MGS address once the operation has completed.
    pub async fn create_filesystem(
        &self,
        ctx: &RequestContext,
        request: &ProvisioningRequest,
    ) -> Result<String, ProvisioningError> {
        let filesystems = self.filesystems()?;
        if !request.subnet.is_complete() {
            return Err(ProvisioningError::invalid_argument(
                "invalid subnet info, must have valid subnet ID, subnet name, vnet name, and vnet resource group",
            ));
        }

        let spec = build_filesystem_spec(request)?;
        let resource_group = request.resource_group.as_str();
        let name = request.amlfs_name.as_str();

        let existing = ctx.run(filesystems.get(resource_group, name)).await?;
        match existing {
            None => {
                let admission = self
                    .admission
                    .check_capacity(
                        ctx,
                        &request.subnet,
                        &request.sku_name,
                        request.storage_capacity_tib,
                    )
                    .await?;
                if !admission.admitted {
                    warn!(
                        subnet_id = %request.subnet.subnet_id,
                        sku = %request.sku_name,
                        required = admission.required,
                        available = admission.available,
                        "not enough room in subnet for AMLFS cluster"
                    );
                    self.publish(ProvisioningEvent::AdmissionRejected {
                        subnet_id: request.subnet.subnet_id.clone(),
                        sku_name: request.sku_name.clone(),
                        required_addresses: admission.required,
                        available_addresses: admission.available,
                        rejected_at: Utc::now(),
                    });
                    return Err(ProvisioningError::resource_exhausted(format!(
                        "cannot create AMLFS cluster {} in subnet {}, not enough IP addresses available: {} needed, {} available",
                        name, request.subnet.subnet_id, admission.required, admission.available
                    )));
                }
            }
            Some(existing) => {
                let drift = existing.drift_from(&spec);
                if drift.is_empty() {
                    info!(name, resource_group, "amlfs cluster already exists, submitting update");
                } else {
                    warn!(
                        name,
                        resource_group,
                        drift = %drift.join("; "),
                        "amlfs cluster already exists with a different configuration, submitting update"
                    );
                }
            }
        }

        let operation = ctx
            .run(filesystems.begin_create_or_update(resource_group, name, &spec))
            .await
            .map_err(|e| {
                error!(name, resource_group, "create-or-update was rejected: {}", e);
                ProvisioningError::from(e)
            })?;

        let mut poller = Poller::new(
            operation,
            self.poll_frequency,
            format!("create-or-update {}/{}", resource_group, name),
        );
        let filesystem = poller.poll_until_done(ctx).await.map_err(|e| {
            warn!(
                name,
                resource_group,
                attempts = poller.attempts(),
                "create-or-update failed while polling: {}",
                e
            );
            ProvisioningError::from(e)
        })?;

        let mgs_address = filesystem
            .mgs_address
            .filter(|address| !address.is_empty())
            .ok_or_else(|| {
                ProvisioningError::unknown(format!(
                    "aml filesystem {} was created without an MGS address",
                    name
                ))
            })?;

        info!(name, resource_group, %mgs_address, "aml filesystem is ready");
        Ok(mgs_address)
    }

    pub async fn delete_filesystem(
        &self,
        ctx: &RequestContext,
        resource_group: &str,
        name: &str,
    ) -> Result<(), ProvisioningError> {
        let filesystems = self.filesystems()?;

        let operation = ctx
            .run(filesystems.begin_delete(resource_group, name))
            .await
            .map_err(|e| {
                error!(name, resource_group, "delete was rejected: {}", e);
                ProvisioningError::from(e)
            })?;

        let mut poller = Poller::new(
            operation,
            self.poll_frequency,
            format!("delete {}/{}", resource_group, name),
        );
        poller.poll_until_done(ctx).await.map_err(|e| {
            warn!(
                name,
                resource_group,
                attempts = poller.attempts(),
                "delete failed while polling: {}",
                e
            );
            ProvisioningError::from(e)
        })?;

        info!(name, resource_group, "aml filesystem deleted");
        Ok(())
    }

    /// SKU increments and maxima the catalog lists for `location`.
    ///
    /// `None` when the catalog is unreachable or has nothing usable for the
    /// location; callers fall back to `default_skus`.
    pub async fn sku_values_for_location(
        &self,
        ctx: &RequestContext,
        location: &str,
    ) -> Option<SkuCapacityTable> {
        let Some(skus) = self.clients.skus.as_ref() else {
            warn!("sku catalog client is not configured, using defaults");
            return None;
        };

        let mut amlfs_skus = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = match ctx.run(skus.list_sku_page(continuation.as_deref())).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(location, "error getting SKUs, using defaults: {}", e);
                    return None;
                }
            };
            amlfs_skus.extend(
                page.items
                    .into_iter()
                    .filter(|sku| sku.resource_type == AMLFS_SKU_RESOURCE_TYPE),
            );
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        if amlfs_skus.is_empty() {
            warn!("no AMLFS SKUs found, using defaults");
            return None;
        }

        let mut table = SkuCapacityTable::default();
        for sku in amlfs_skus
            .iter()
            .filter(|sku| sku.locations.iter().any(|l| l.eq_ignore_ascii_case(location)))
        {
            let increment = parse_capability(sku.capability(SKU_CAPACITY_INCREMENT_CAPABILITY));
            let maximum = parse_capability(sku.capability(SKU_CAPACITY_MAXIMUM_CAPABILITY));
            match (increment, maximum) {
                (Some(increment_tib), Some(maximum_tib)) => {
                    debug!(sku = %sku.name, location, increment_tib, maximum_tib, "adding sku value");
                    table.insert(sku.name.clone(), SkuCapacityEntry::new(increment_tib, maximum_tib));
                }
                _ => warn!(sku = %sku.name, location, "skipping SKU with unusable capacity capabilities"),
            }
        }

        if table.is_empty() {
            warn!(location, "found no AMLFS SKUs for location, using defaults");
            return None;
        }

        info!(location, skus = ?table.sku_names(), "using SKU values from catalog");
        Some(table)
    }

    fn publish(&self, event: ProvisioningEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_provisioning_event(event);
        }
    }
}

fn parse_capability(value: Option<&str>) -> Option<i64> {
    let value = value?;
    match value.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 => Some(parsed),
        Ok(_) => None,
        Err(e) => {
            warn!(value, "failed to parse capability value: {}", e);
            None
        }
    }
}

/// Desired backend state for `request`.
pub fn build_filesystem_spec(
    request: &ProvisioningRequest,
) -> Result<AmlFilesystemSpec, ProvisioningError> {
    let maintenance_window = request.maintenance_window.clone().ok_or_else(|| {
        ProvisioningError::invalid_argument(format!(
            "maintenance window is required to create aml filesystem {}",
            request.amlfs_name
        ))
    })?;

    let identity = (!request.identities.is_empty()).then(|| FilesystemIdentity {
        user_assigned: request.identities.clone(),
    });

    Ok(AmlFilesystemSpec {
        location: request.location.clone(),
        tags: request.tags.clone(),
        subnet_id: request.subnet.subnet_id.clone(),
        maintenance_window,
        storage_capacity_tib: request.storage_capacity_tib,
        zones: request.zones.clone(),
        sku_name: request.sku_name.clone(),
        identity,
        root_squash: request.root_squash.as_ref().map(RootSquashSettings::from),
    })
}
