// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! AMLFS filesystem resources over ARM
//!
//! `Microsoft.StorageCache/amlFilesystems` get, create-or-update and delete.
//! Mutations are long-running: the returned [`ArmOperation`] follows the
//! `Azure-AsyncOperation` header, then `Location`, then the resource's own
//! `provisioningState`, in that order of preference.

use super::arm::{decode_json, header_value, ArmClient};
use crate::domain::cloud::{
    AmlFilesystem, AmlFilesystemSpec, BoxedOperation, FilesystemStore, OperationHandle,
    PollStatus, RootSquashSettings,
};
use crate::domain::errors::CloudError;
use crate::domain::provisioning::{DayOfWeek, SquashMode};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const AMLFS_API_VERSION: &str = "2024-07-01";

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const LOCATION_HEADER: &str = "location";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct SkuName {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AmlFilesystemBody<'a> {
    location: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a BTreeMap<String, String>>,
    sku: SkuName,
    #[serde(skip_serializing_if = "Option::is_none")]
    zones: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<IdentityBody>,
    properties: PropertiesBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityBody {
    #[serde(rename = "type")]
    kind: &'static str,
    user_assigned_identities: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PropertiesBody<'a> {
    filesystem_subnet: &'a str,
    #[serde(rename = "storageCapacityTiB")]
    storage_capacity_tib: f64,
    maintenance_window: MaintenanceWindowBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    root_squash_settings: Option<RootSquashBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MaintenanceWindowBody<'a> {
    day_of_week: DayOfWeek,
    #[serde(rename = "timeOfDayUTC")]
    time_of_day_utc: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RootSquashBody<'a> {
    mode: SquashMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_squash_nid_lists: Option<&'a str>,
    #[serde(rename = "squashUID", skip_serializing_if = "Option::is_none")]
    squash_uid: Option<u32>,
    #[serde(rename = "squashGID", skip_serializing_if = "Option::is_none")]
    squash_gid: Option<u32>,
}

impl<'a> From<&'a RootSquashSettings> for RootSquashBody<'a> {
    fn from(settings: &'a RootSquashSettings) -> Self {
        Self {
            mode: settings.mode,
            no_squash_nid_lists: settings.no_squash_nid_lists.as_deref(),
            squash_uid: settings.squash_uid,
            squash_gid: settings.squash_gid,
        }
    }
}

impl<'a> From<&'a AmlFilesystemSpec> for AmlFilesystemBody<'a> {
    fn from(spec: &'a AmlFilesystemSpec) -> Self {
        let identity = spec
            .identity
            .as_ref()
            .filter(|i| !i.user_assigned.is_empty())
            .map(|i| IdentityBody {
                kind: "UserAssigned",
                user_assigned_identities: i
                    .user_assigned
                    .iter()
                    .map(|id| (id.clone(), serde_json::Value::Object(Default::default())))
                    .collect(),
            });

        Self {
            location: &spec.location,
            tags: (!spec.tags.is_empty()).then_some(&spec.tags),
            sku: SkuName {
                name: spec.sku_name.clone(),
            },
            zones: (!spec.zones.is_empty()).then_some(spec.zones.as_slice()),
            identity,
            properties: PropertiesBody {
                filesystem_subnet: &spec.subnet_id,
                storage_capacity_tib: spec.storage_capacity_tib,
                maintenance_window: MaintenanceWindowBody {
                    day_of_week: spec.maintenance_window.day_of_week,
                    time_of_day_utc: &spec.maintenance_window.time_of_day_utc,
                },
                root_squash_settings: spec.root_squash.as_ref().map(RootSquashBody::from),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AmlFilesystemResource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    sku: Option<SkuName>,
    #[serde(default)]
    zones: Vec<String>,
    #[serde(default)]
    properties: Option<ResourceProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
    #[serde(rename = "storageCapacityTiB", default)]
    storage_capacity_tib: Option<f64>,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo {
    #[serde(default)]
    mgs_address: Option<String>,
}

impl From<AmlFilesystemResource> for AmlFilesystem {
    fn from(resource: AmlFilesystemResource) -> Self {
        let properties = resource.properties.unwrap_or_default();
        Self {
            name: resource.name,
            location: resource.location,
            sku_name: resource.sku.map(|s| s.name).unwrap_or_default(),
            storage_capacity_tib: properties.storage_capacity_tib.unwrap_or_default(),
            zones: resource.zones,
            provisioning_state: properties.provisioning_state,
            mgs_address: properties.client_info.and_then(|c| c.mgs_address),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AsyncOperationStatus {
    status: String,
    #[serde(default)]
    error: Option<OperationErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorBody {
    #[serde(default)]
    message: String,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct AmlFilesystemsClient {
    arm: ArmClient,
}

impl AmlFilesystemsClient {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    fn resource_url(&self, resource_group: &str, name: &str) -> String {
        self.arm.subscription_url(&format!(
            "/resourceGroups/{}/providers/Microsoft.StorageCache/amlFilesystems/{}",
            resource_group, name
        ))
    }
}

#[async_trait]
impl FilesystemStore for AmlFilesystemsClient {
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<AmlFilesystem>, CloudError> {
        get_resource(&self.arm, &self.resource_url(resource_group, name)).await
    }

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        spec: &AmlFilesystemSpec,
    ) -> Result<BoxedOperation<AmlFilesystem>, CloudError> {
        let url = self.resource_url(resource_group, name);
        let body = AmlFilesystemBody::from(spec);
        let builder = self
            .arm
            .request(Method::PUT, &url)
            .query(&[("api-version", AMLFS_API_VERSION)])
            .json(&body);
        let response = self.arm.send(builder).await?;
        debug!(status = response.status().as_u16(), %url, "submitted AMLFS create-or-update");

        let target = OperationTarget::from_headers(response.headers(), false);
        Ok(Box::new(CreateOperation(ArmOperation::new(
            self.arm.clone(),
            url,
            target,
        ))))
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<BoxedOperation<()>, CloudError> {
        let url = self.resource_url(resource_group, name);
        let builder = self
            .arm
            .request(Method::DELETE, &url)
            .query(&[("api-version", AMLFS_API_VERSION)]);
        let response = self.arm.send(builder).await?;
        debug!(status = response.status().as_u16(), %url, "submitted AMLFS delete");

        let accepted = response.status() == StatusCode::ACCEPTED;
        let target = OperationTarget::from_headers(response.headers(), !accepted);
        Ok(Box::new(DeleteOperation(ArmOperation::new(
            self.arm.clone(),
            url,
            target,
        ))))
    }
}

async fn get_resource(arm: &ArmClient, url: &str) -> Result<Option<AmlFilesystem>, CloudError> {
    let builder = arm
        .request(Method::GET, url)
        .query(&[("api-version", AMLFS_API_VERSION)]);
    match arm.send(builder).await {
        Ok(response) => {
            let resource: AmlFilesystemResource = decode_json(response).await?;
            Ok(Some(resource.into()))
        }
        Err(CloudError::Response { status: 404, .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Long-running operations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum OperationTarget {
    AsyncOperation(String),
    Location(String),
    Resource,
    Completed,
}

impl OperationTarget {
    fn from_headers(headers: &reqwest::header::HeaderMap, completed: bool) -> Self {
        if let Some(url) = header_value(headers, ASYNC_OPERATION_HEADER) {
            return OperationTarget::AsyncOperation(url);
        }
        if let Some(url) = header_value(headers, LOCATION_HEADER) {
            return OperationTarget::Location(url);
        }
        if completed {
            OperationTarget::Completed
        } else {
            OperationTarget::Resource
        }
    }
}

/// Tracks one ARM long-running operation.
#[derive(Debug)]
pub struct ArmOperation {
    arm: ArmClient,
    resource_url: String,
    target: OperationTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Create,
    Delete,
}

impl ArmOperation {
    fn new(arm: ArmClient, resource_url: String, target: OperationTarget) -> Self {
        Self {
            arm,
            resource_url,
            target,
        }
    }

    /// `Ok(true)` once the operation has succeeded.
    async fn poll_done(&mut self, kind: OperationKind) -> Result<bool, CloudError> {
        match self.target.clone() {
            OperationTarget::Completed => Ok(true),
            OperationTarget::AsyncOperation(url) => {
                let status: AsyncOperationStatus = self.arm.get_json(&url, None).await?;
                check_terminal_status(
                    &status.status,
                    status.error.map(|e| e.message).unwrap_or_default(),
                )
            }
            OperationTarget::Location(url) => {
                let builder = self.arm.request(Method::GET, &url);
                match self.arm.send(builder).await {
                    Ok(response) => Ok(response.status() != StatusCode::ACCEPTED),
                    Err(CloudError::Response { status: 404, .. }) if kind == OperationKind::Delete => {
                        Ok(true)
                    }
                    Err(e) => Err(e),
                }
            }
            OperationTarget::Resource => match get_resource(&self.arm, &self.resource_url).await? {
                None if kind == OperationKind::Delete => Ok(true),
                None => Err(CloudError::Decode(format!(
                    "resource {} disappeared while being created",
                    self.resource_url
                ))),
                Some(fs) => {
                    let state = fs.provisioning_state.unwrap_or_default();
                    let done = check_terminal_status(&state, String::new())?;
                    Ok(done && kind == OperationKind::Create)
                }
            },
        }
    }
}

fn check_terminal_status(status: &str, message: String) -> Result<bool, CloudError> {
    if status.eq_ignore_ascii_case("Succeeded") {
        return Ok(true);
    }
    if status.eq_ignore_ascii_case("Failed") || status.eq_ignore_ascii_case("Canceled") {
        let message = if message.is_empty() {
            format!("operation {}", status.to_lowercase())
        } else {
            message
        };
        return Err(CloudError::OperationFailed {
            status: status.to_string(),
            message,
        });
    }
    Ok(false)
}

struct CreateOperation(ArmOperation);

#[async_trait]
impl OperationHandle<AmlFilesystem> for CreateOperation {
    async fn poll(&mut self) -> Result<PollStatus<AmlFilesystem>, CloudError> {
        if !self.0.poll_done(OperationKind::Create).await? {
            return Ok(PollStatus::InProgress);
        }
        self.0.target = OperationTarget::Completed;
        match get_resource(&self.0.arm, &self.0.resource_url).await? {
            Some(fs) => Ok(PollStatus::Succeeded(fs)),
            None => Err(CloudError::Decode(format!(
                "resource {} not found after successful create",
                self.0.resource_url
            ))),
        }
    }
}

struct DeleteOperation(ArmOperation);

#[async_trait]
impl OperationHandle<()> for DeleteOperation {
    async fn poll(&mut self) -> Result<PollStatus<()>, CloudError> {
        if self.0.poll_done(OperationKind::Delete).await? {
            self.0.target = OperationTarget::Completed;
            Ok(PollStatus::Succeeded(()))
        } else {
            Ok(PollStatus::InProgress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cloud::FilesystemIdentity;
    use crate::domain::provisioning::MaintenanceWindow;
    use mockito::Matcher;

    const FS_PATH: &str =
        "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.StorageCache/amlFilesystems/pvc-1-fs";

    fn client(server: &mockito::Server) -> AmlFilesystemsClient {
        AmlFilesystemsClient::new(ArmClient::new(server.url(), "sub-1", Some("t".into())))
    }

    fn spec() -> AmlFilesystemSpec {
        AmlFilesystemSpec {
            location: "eastus".to_string(),
            tags: BTreeMap::from([("team".to_string(), "hpc".to_string())]),
            subnet_id: "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Network/virtualNetworks/vnet/subnets/amlfs".to_string(),
            maintenance_window: MaintenanceWindow {
                day_of_week: DayOfWeek::Monday,
                time_of_day_utc: "12:00".to_string(),
            },
            storage_capacity_tib: 8.0,
            zones: vec!["1".to_string()],
            sku_name: "AMLFS-Durable-Premium-40".to_string(),
            identity: Some(FilesystemIdentity {
                user_assigned: vec!["/id/one".to_string()],
            }),
            root_squash: Some(RootSquashSettings {
                mode: SquashMode::RootOnly,
                no_squash_nid_lists: Some("10.0.0.[5-6]@tcp".to_string()),
                squash_uid: Some(1000),
                squash_gid: Some(1000),
            }),
        }
    }

    const RESOURCE_BODY: &str = r#"{
        "name": "pvc-1-fs",
        "location": "eastus",
        "sku": {"name": "AMLFS-Durable-Premium-40"},
        "zones": ["1"],
        "properties": {
            "provisioningState": "Succeeded",
            "storageCapacityTiB": 8,
            "clientInfo": {"mgsAddress": "10.0.0.4"}
        }
    }"#;

    #[test]
    fn test_request_body_shape() {
        let spec = spec();
        let body = serde_json::to_value(AmlFilesystemBody::from(&spec)).unwrap();

        assert_eq!(body["sku"]["name"], "AMLFS-Durable-Premium-40");
        assert_eq!(body["identity"]["type"], "UserAssigned");
        assert!(body["identity"]["userAssignedIdentities"]["/id/one"].is_object());
        assert_eq!(body["properties"]["storageCapacityTiB"], 8.0);
        assert_eq!(body["properties"]["maintenanceWindow"]["dayOfWeek"], "Monday");
        assert_eq!(body["properties"]["maintenanceWindow"]["timeOfDayUTC"], "12:00");
        assert_eq!(body["properties"]["rootSquashSettings"]["mode"], "RootOnly");
        assert_eq!(body["properties"]["rootSquashSettings"]["squashUID"], 1000);
        assert_eq!(body["tags"]["team"], "hpc");
    }

    #[test]
    fn test_empty_optionals_are_omitted() {
        let mut spec = spec();
        spec.identity = None;
        spec.root_squash = None;
        spec.tags.clear();
        spec.zones.clear();
        let body = serde_json::to_value(AmlFilesystemBody::from(&spec)).unwrap();

        assert!(body.get("identity").is_none());
        assert!(body.get("tags").is_none());
        assert!(body.get("zones").is_none());
        assert!(body["properties"].get("rootSquashSettings").is_none());
    }

    #[tokio::test]
    async fn test_get_maps_resource_and_404() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", FS_PATH)
            .match_query(Matcher::UrlEncoded("api-version".into(), AMLFS_API_VERSION.into()))
            .with_status(200)
            .with_body(RESOURCE_BODY)
            .create_async()
            .await;
        server
            .mock("GET", "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.StorageCache/amlFilesystems/missing")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":{"code":"ResourceNotFound","message":"not found"}}"#)
            .create_async()
            .await;

        let client = client(&server);
        let fs = client.get("rg-1", "pvc-1-fs").await.unwrap().unwrap();
        assert_eq!(fs.mgs_address.as_deref(), Some("10.0.0.4"));
        assert_eq!(fs.sku_name, "AMLFS-Durable-Premium-40");
        assert_eq!(fs.storage_capacity_tib, 8.0);

        assert!(client.get("rg-1", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_follows_async_operation_header() {
        let mut server = mockito::Server::new_async().await;
        let status_url = format!("{}/operations/op-1?api-version={}", server.url(), AMLFS_API_VERSION);

        let put = server
            .mock("PUT", FS_PATH)
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJsonString(
                r#"{"properties":{"storageCapacityTiB":8.0}}"#.to_string(),
            ))
            .with_status(201)
            .with_header("Azure-AsyncOperation", &status_url)
            .with_body(r#"{"properties":{"provisioningState":"Creating"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/operations/op-1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"Succeeded"}"#)
            .create_async()
            .await;
        server
            .mock("GET", FS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(RESOURCE_BODY)
            .create_async()
            .await;

        let mut op = client(&server)
            .begin_create_or_update("rg-1", "pvc-1-fs", &spec())
            .await
            .unwrap();
        put.assert_async().await;

        match op.poll().await.unwrap() {
            PollStatus::Succeeded(fs) => assert_eq!(fs.mgs_address.as_deref(), Some("10.0.0.4")),
            PollStatus::InProgress => panic!("operation should be done"),
        }
    }

    #[tokio::test]
    async fn test_async_operation_in_progress_and_failed() {
        let mut server = mockito::Server::new_async().await;
        let running = format!("{}/operations/running", server.url());
        let failed = format!("{}/operations/failed", server.url());
        server
            .mock("GET", "/operations/running")
            .with_status(200)
            .with_body(r#"{"status":"InProgress"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/operations/failed")
            .with_status(200)
            .with_body(r#"{"status":"Failed","error":{"code":"QuotaExceeded","message":"Operation results in exceeding quota limits of resource type AmlFilesystem"}}"#)
            .create_async()
            .await;

        let arm = ArmClient::new(server.url(), "sub-1", None);
        let mut op = CreateOperation(ArmOperation::new(
            arm.clone(),
            format!("{}{}", server.url(), FS_PATH),
            OperationTarget::AsyncOperation(running),
        ));
        assert_eq!(op.poll().await.unwrap(), PollStatus::InProgress);

        let mut op = CreateOperation(ArmOperation::new(
            arm,
            format!("{}{}", server.url(), FS_PATH),
            OperationTarget::AsyncOperation(failed),
        ));
        match op.poll().await {
            Err(CloudError::OperationFailed { status, message }) => {
                assert_eq!(status, "Failed");
                assert!(message.contains("exceeding quota limits"));
            }
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_no_content_completes_immediately() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", FS_PATH)
            .match_query(Matcher::UrlEncoded("api-version".into(), AMLFS_API_VERSION.into()))
            .with_status(204)
            .create_async()
            .await;

        let mut op = client(&server).begin_delete("rg-1", "pvc-1-fs").await.unwrap();
        assert_eq!(op.poll().await.unwrap(), PollStatus::Succeeded(()));
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_accepted_follows_location() {
        let mut server = mockito::Server::new_async().await;
        let location = format!("{}/operationResults/del-1", server.url());
        server
            .mock("DELETE", FS_PATH)
            .match_query(Matcher::Any)
            .with_status(202)
            .with_header("Location", &location)
            .create_async()
            .await;
        server
            .mock("GET", "/operationResults/del-1")
            .with_status(202)
            .create_async()
            .await;

        let mut op = client(&server).begin_delete("rg-1", "pvc-1-fs").await.unwrap();
        assert_eq!(op.poll().await.unwrap(), PollStatus::InProgress);
    }

    #[tokio::test]
    async fn test_delete_without_headers_polls_resource_until_gone() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", FS_PATH)
            .match_query(Matcher::Any)
            .with_status(202)
            .create_async()
            .await;
        server
            .mock("GET", FS_PATH)
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let mut op = client(&server).begin_delete("rg-1", "pvc-1-fs").await.unwrap();
        assert_eq!(op.poll().await.unwrap(), PollStatus::Succeeded(()));
    }

    #[test]
    fn test_terminal_status_checks() {
        assert!(check_terminal_status("succeeded", String::new()).unwrap());
        assert!(!check_terminal_status("Updating", String::new()).unwrap());
        match check_terminal_status("Canceled", String::new()) {
            Err(CloudError::OperationFailed { message, .. }) => {
                assert_eq!(message, "operation canceled")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
