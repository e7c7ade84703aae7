// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory cloud backend
//!
//! Implements every cloud port against shared in-process state. Used for
//! local development (`CloudBackend::InMemory`) and throughout the tests.
//! Knobs let callers script failures, slow operations and subnet usage, and
//! every call is recorded so tests can assert what was (not) sent.

use crate::domain::cloud::{
    AmlFilesystem, AmlFilesystemSpec, BoxedOperation, CatalogSku, FilesystemStore,
    OperationHandle, Page, PollStatus, SkuCatalogProvider, SubnetSizingProvider,
    SubnetUsage, SubnetUsageProvider,
};
use crate::domain::errors::CloudError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A call received by the fake, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCall {
    GetFilesystem {
        resource_group: String,
        name: String,
    },
    CreateOrUpdate {
        resource_group: String,
        name: String,
        spec: AmlFilesystemSpec,
    },
    Delete {
        resource_group: String,
        name: String,
    },
    RequiredAddressCount {
        sku_name: String,
        storage_capacity_tib: f64,
    },
    ListUsages {
        vnet_resource_group: String,
        vnet_name: String,
    },
    ListSkus,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    status: u16,
    message: String,
}

impl ScriptedFailure {
    fn to_error(&self) -> CloudError {
        CloudError::response(self.status, self.message.clone())
    }
}

#[derive(Debug)]
struct FakeState {
    filesystems: HashMap<(String, String), AmlFilesystem>,
    usages: Vec<SubnetUsage>,
    usage_page_size: usize,
    required_addresses: i64,
    invalid_skus: HashSet<String>,
    catalog: Vec<CatalogSku>,
    catalog_failure: Option<ScriptedFailure>,
    get_failure: Option<ScriptedFailure>,
    submit_failure: Option<ScriptedFailure>,
    operation_failure: Option<String>,
    polls_before_done: u32,
    next_address: u32,
    calls: Vec<CloudCall>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            filesystems: HashMap::new(),
            usages: Vec::new(),
            usage_page_size: 50,
            required_addresses: 0,
            invalid_skus: HashSet::new(),
            catalog: Vec::new(),
            catalog_failure: None,
            get_failure: None,
            submit_failure: None,
            operation_failure: None,
            polls_before_done: 0,
            next_address: 4,
            calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCloud {
    state: Arc<Mutex<FakeState>>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }

    pub fn add_subnet_usage(&self, id: impl Into<String>, current_value: i64, limit: i64) {
        self.state().usages.push(SubnetUsage {
            id: id.into(),
            current_value,
            limit,
        });
    }

    /// Split the usage listing into pages of `size` entries.
    pub fn set_usage_page_size(&self, size: usize) {
        self.state().usage_page_size = size.max(1);
    }

    pub fn set_required_addresses(&self, count: i64) {
        self.state().required_addresses = count;
    }

    /// Make the sizing query reject `sku_name` with a 400.
    pub fn reject_sku(&self, sku_name: impl Into<String>) {
        self.state().invalid_skus.insert(sku_name.into());
    }

    pub fn set_catalog(&self, skus: Vec<CatalogSku>) {
        self.state().catalog = skus;
    }

    pub fn fail_catalog(&self, status: u16, message: impl Into<String>) {
        self.state().catalog_failure = Some(ScriptedFailure {
            status,
            message: message.into(),
        });
    }

    pub fn recover_catalog(&self) {
        self.state().catalog_failure = None;
    }

    pub fn fail_get(&self, status: u16, message: impl Into<String>) {
        self.state().get_failure = Some(ScriptedFailure {
            status,
            message: message.into(),
        });
    }

    /// Reject create-or-update and delete submissions.
    pub fn fail_submissions(&self, status: u16, message: impl Into<String>) {
        self.state().submit_failure = Some(ScriptedFailure {
            status,
            message: message.into(),
        });
    }

    /// Accept submissions but fail the operation when it completes.
    pub fn fail_operations(&self, message: impl Into<String>) {
        self.state().operation_failure = Some(message.into());
    }

    /// Number of in-progress polls before an operation completes.
    pub fn set_polls_before_done(&self, polls: u32) {
        self.state().polls_before_done = polls;
    }

    pub fn insert_filesystem(&self, resource_group: impl Into<String>, filesystem: AmlFilesystem) {
        self.state()
            .filesystems
            .insert((resource_group.into(), filesystem.name.clone()), filesystem);
    }

    pub fn filesystem(&self, resource_group: &str, name: &str) -> Option<AmlFilesystem> {
        self.state()
            .filesystems
            .get(&(resource_group.to_string(), name.to_string()))
            .cloned()
    }

    pub fn filesystem_count(&self) -> usize {
        self.state().filesystems.len()
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&CloudCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: CloudCall) {
        self.state().calls.push(call);
    }
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

enum PendingChange {
    Upsert {
        resource_group: String,
        filesystem: AmlFilesystem,
    },
    Remove {
        resource_group: String,
        name: String,
    },
}

struct FakeOperation {
    state: Arc<Mutex<FakeState>>,
    remaining_polls: u32,
    failure: Option<String>,
    change: PendingChange,
}

impl FakeOperation {
    fn step(&mut self) -> Result<bool, CloudError> {
        if self.remaining_polls > 0 {
            self.remaining_polls -= 1;
            return Ok(false);
        }
        if let Some(message) = self.failure.take() {
            return Err(CloudError::OperationFailed {
                status: "Failed".to_string(),
                message,
            });
        }
        Ok(true)
    }
}

#[async_trait]
impl OperationHandle<AmlFilesystem> for FakeOperation {
    async fn poll(&mut self) -> Result<PollStatus<AmlFilesystem>, CloudError> {
        if !self.step()? {
            return Ok(PollStatus::InProgress);
        }
        match &self.change {
            PendingChange::Upsert {
                resource_group,
                filesystem,
            } => {
                lock(&self.state).filesystems.insert(
                    (resource_group.clone(), filesystem.name.clone()),
                    filesystem.clone(),
                );
                Ok(PollStatus::Succeeded(filesystem.clone()))
            }
            PendingChange::Remove { .. } => Err(CloudError::Decode(
                "delete operation polled as create".to_string(),
            )),
        }
    }
}

#[async_trait]
impl OperationHandle<()> for FakeOperation {
    async fn poll(&mut self) -> Result<PollStatus<()>, CloudError> {
        if !self.step()? {
            return Ok(PollStatus::InProgress);
        }
        if let PendingChange::Remove {
            resource_group,
            name,
        } = &self.change
        {
            lock(&self.state)
                .filesystems
                .remove(&(resource_group.clone(), name.clone()));
        }
        Ok(PollStatus::Succeeded(()))
    }
}

#[async_trait]
impl FilesystemStore for InMemoryCloud {
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<AmlFilesystem>, CloudError> {
        self.record(CloudCall::GetFilesystem {
            resource_group: resource_group.to_string(),
            name: name.to_string(),
        });
        let state = self.state();
        if let Some(failure) = &state.get_failure {
            return Err(failure.to_error());
        }
        Ok(state
            .filesystems
            .get(&(resource_group.to_string(), name.to_string()))
            .cloned())
    }

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        spec: &AmlFilesystemSpec,
    ) -> Result<BoxedOperation<AmlFilesystem>, CloudError> {
        self.record(CloudCall::CreateOrUpdate {
            resource_group: resource_group.to_string(),
            name: name.to_string(),
            spec: spec.clone(),
        });

        let mut state = self.state();
        if let Some(failure) = &state.submit_failure {
            return Err(failure.to_error());
        }

        let key = (resource_group.to_string(), name.to_string());
        let mgs_address = match state.filesystems.get(&key).and_then(|fs| fs.mgs_address.clone()) {
            Some(existing) => existing,
            None => {
                let address = format!("10.0.0.{}", state.next_address);
                state.next_address += 1;
                address
            }
        };

        let filesystem = AmlFilesystem {
            name: name.to_string(),
            location: spec.location.clone(),
            sku_name: spec.sku_name.clone(),
            storage_capacity_tib: spec.storage_capacity_tib,
            zones: spec.zones.clone(),
            provisioning_state: Some("Succeeded".to_string()),
            mgs_address: Some(mgs_address),
        };

        Ok(Box::new(FakeOperation {
            state: self.state.clone(),
            remaining_polls: state.polls_before_done,
            failure: state.operation_failure.clone(),
            change: PendingChange::Upsert {
                resource_group: resource_group.to_string(),
                filesystem,
            },
        }))
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<BoxedOperation<()>, CloudError> {
        self.record(CloudCall::Delete {
            resource_group: resource_group.to_string(),
            name: name.to_string(),
        });

        let state = self.state();
        if let Some(failure) = &state.submit_failure {
            return Err(failure.to_error());
        }

        Ok(Box::new(FakeOperation {
            state: self.state.clone(),
            remaining_polls: state.polls_before_done,
            failure: state.operation_failure.clone(),
            change: PendingChange::Remove {
                resource_group: resource_group.to_string(),
                name: name.to_string(),
            },
        }))
    }
}

#[async_trait]
impl SubnetSizingProvider for InMemoryCloud {
    async fn required_address_count(
        &self,
        sku_name: &str,
        storage_capacity_tib: f64,
    ) -> Result<i64, CloudError> {
        self.record(CloudCall::RequiredAddressCount {
            sku_name: sku_name.to_string(),
            storage_capacity_tib,
        });
        let state = self.state();
        if state.invalid_skus.contains(sku_name) {
            return Err(CloudError::Response {
                status: 400,
                code: Some("InvalidParameter".to_string()),
                message: format!("SKU {} is not valid", sku_name),
            });
        }
        Ok(state.required_addresses)
    }
}

#[async_trait]
impl SubnetUsageProvider for InMemoryCloud {
    async fn list_usage_page(
        &self,
        vnet_resource_group: &str,
        vnet_name: &str,
        continuation: Option<&str>,
    ) -> Result<Page<SubnetUsage>, CloudError> {
        self.record(CloudCall::ListUsages {
            vnet_resource_group: vnet_resource_group.to_string(),
            vnet_name: vnet_name.to_string(),
        });

        let state = self.state();
        let start = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| CloudError::Decode(format!("bad continuation token {:?}", token)))?,
            None => 0,
        };
        let end = (start + state.usage_page_size).min(state.usages.len());
        let items = state.usages.get(start..end).unwrap_or_default().to_vec();
        let continuation = (end < state.usages.len()).then(|| end.to_string());

        Ok(Page {
            items,
            continuation,
        })
    }
}

#[async_trait]
impl SkuCatalogProvider for InMemoryCloud {
    async fn list_sku_page(
        &self,
        _continuation: Option<&str>,
    ) -> Result<Page<CatalogSku>, CloudError> {
        self.record(CloudCall::ListSkus);
        let state = self.state();
        if let Some(failure) = &state.catalog_failure {
            return Err(failure.to_error());
        }
        Ok(Page::last(state.catalog.clone()))
    }
}
