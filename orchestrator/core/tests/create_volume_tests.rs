// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CreateVolume end-to-end against the in-memory cloud.

use amlfs_orchestrator_core::application::{CreateVolumeRequest, StandardVolumeService, VolumeService};
use amlfs_orchestrator_core::domain::cloud::{AmlFilesystem, CatalogSku, SkuCapability};
use amlfs_orchestrator_core::domain::context::RequestContext;
use amlfs_orchestrator_core::domain::errors::Code;
use amlfs_orchestrator_core::domain::events::{ProvisioningEvent, VolumeOperation};
use amlfs_orchestrator_core::domain::provisioner_config::ProvisionerConfigManifest;
use amlfs_orchestrator_core::domain::provisioning::PVC_NAME_KEY;
use amlfs_orchestrator_core::domain::sku::{
    AMLFS_SKU_RESOURCE_TYPE, SKU_CAPACITY_INCREMENT_CAPABILITY, SKU_CAPACITY_MAXIMUM_CAPABILITY, TIB,
};
use amlfs_orchestrator_core::infrastructure::cloud::fake::CloudCall;
use amlfs_orchestrator_core::infrastructure::cloud::{create_cloud_clients, CloudBackend, InMemoryCloud};
use amlfs_orchestrator_core::infrastructure::event_bus::{DomainEvent, EventBus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SUBNET_ID: &str =
    "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Network/virtualNetworks/vnet-1/subnets/amlfs-subnet";

fn config() -> ProvisionerConfigManifest {
    let mut config = ProvisionerConfigManifest::default();
    config.spec.cloud.subscription_id = "sub-1".to_string();
    config.spec.cloud.resource_group = "rg-1".to_string();
    config.spec.cloud.location = "eastus".to_string();
    config.spec.cloud.vnet_name = "vnet-1".to_string();
    config.spec.cloud.subnet_name = "amlfs-subnet".to_string();
    config.spec.provisioning.poll_frequency = Duration::from_millis(5);
    config
}

fn service_with(
    config: &ProvisionerConfigManifest,
) -> (StandardVolumeService, Arc<InMemoryCloud>, Arc<EventBus>) {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.add_subnet_usage(SUBNET_ID, 0, 64);
    cloud.set_required_addresses(24);

    let bus = Arc::new(EventBus::with_default_capacity());
    let clients = create_cloud_clients(CloudBackend::InMemory(cloud.clone()));
    let service = StandardVolumeService::from_config(config, clients, bus.clone());
    (service, cloud, bus)
}

fn dynamic_request(name: &str) -> CreateVolumeRequest {
    let parameters = HashMap::from([
        ("amlfilesystem-name".to_string(), "fs-${pvc.metadata.name}".to_string()),
        (PVC_NAME_KEY.to_string(), "myclaim".to_string()),
        ("maintenance-day-of-week".to_string(), "Monday".to_string()),
        ("time-of-day-utc".to_string(), "12:00".to_string()),
        ("sku-name".to_string(), "AMLFS-Durable-Premium-40".to_string()),
        ("zones".to_string(), "1".to_string()),
    ]);
    CreateVolumeRequest {
        name: name.to_string(),
        required_bytes: TIB,
        limit_bytes: 0,
        parameters,
    }
}

#[tokio::test]
async fn test_dynamic_create_provisions_named_cluster() {
    let (service, cloud, bus) = service_with(&config());
    let mut events = bus.subscribe();

    let created = service
        .create_volume(&RequestContext::new(), dynamic_request("pvc-1234"))
        .await
        .unwrap();

    assert_eq!(created.capacity_bytes, 48 * TIB);
    assert_eq!(
        created.volume_id,
        "pvc-1234#lustrefs#10.0.0.4##pvc-1234-fs-myclaim#rg-1"
    );
    let context = &created.volume_context;
    assert_eq!(context["amlfilesystem-name"], "pvc-1234-fs-myclaim");
    assert_eq!(context["resource-group-name"], "rg-1");
    assert_eq!(context["mgs-ip-address"], "10.0.0.4");
    assert_eq!(context["fs-name"], "lustrefs");

    let submitted = cloud
        .calls()
        .into_iter()
        .find_map(|call| match call {
            CloudCall::CreateOrUpdate { spec, .. } => Some(spec),
            _ => None,
        })
        .expect("create was submitted");
    assert_eq!(submitted.subnet_id, SUBNET_ID);
    assert_eq!(submitted.location, "eastus");
    assert_eq!(submitted.storage_capacity_tib, 48.0);
    assert_eq!(submitted.zones, vec!["1".to_string()]);
    assert!(cloud.filesystem("rg-1", "pvc-1234-fs-myclaim").is_some());

    match events.recv().await.unwrap() {
        DomainEvent::Provisioning(ProvisioningEvent::VolumeCreated {
            volume_id,
            amlfs_name,
            ..
        }) => {
            assert_eq!(volume_id, created.volume_id);
            assert_eq!(amlfs_name.as_deref(), Some("pvc-1234-fs-myclaim"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_existing_filesystem_skips_admission() {
    let (service, cloud, _bus) = service_with(&config());
    cloud.set_required_addresses(1000);
    cloud.insert_filesystem(
        "rg-1",
        AmlFilesystem {
            name: "pvc-1234-fs-myclaim".to_string(),
            location: "eastus".to_string(),
            sku_name: "AMLFS-Durable-Premium-40".to_string(),
            storage_capacity_tib: 48.0,
            zones: vec!["1".to_string()],
            provisioning_state: Some("Succeeded".to_string()),
            mgs_address: Some("10.1.1.1".to_string()),
        },
    );

    let created = service
        .create_volume(&RequestContext::new(), dynamic_request("pvc-1234"))
        .await
        .unwrap();

    assert_eq!(created.volume_context["mgs-ip-address"], "10.1.1.1");
    assert_eq!(
        cloud.count_calls(|c| matches!(c, CloudCall::RequiredAddressCount { .. })),
        0
    );
    assert_eq!(cloud.filesystem_count(), 1);
}

#[tokio::test]
async fn test_full_subnet_is_resource_exhausted() {
    let (service, cloud, bus) = service_with(&config());
    cloud.set_required_addresses(100);
    let mut failures = bus.subscribe_failures(VolumeOperation::Create);

    let err = service
        .create_volume(&RequestContext::new(), dynamic_request("pvc-1234"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::ResourceExhausted);
    assert!(err
        .message()
        .starts_with("CreateVolume error when creating AMLFS pvc-1234-fs-myclaim"));
    assert_eq!(cloud.filesystem_count(), 0);
    assert_eq!(
        cloud.count_calls(|c| matches!(c, CloudCall::CreateOrUpdate { .. })),
        0
    );

    match failures.recv().await.unwrap() {
        ProvisioningEvent::VolumeOperationFailed { volume, code, .. } => {
            assert_eq!(volume, "pvc-1234");
            assert_eq!(code, Code::ResourceExhausted);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_in_flight_volume_is_aborted() {
    let (service, cloud, _bus) = service_with(&config());
    let _held = service.locks().try_lock("pvc-1234").unwrap();

    let err = service
        .create_volume(&RequestContext::new(), dynamic_request("pvc-1234"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::Aborted);
    assert_eq!(
        err.message(),
        "An operation with the given Volume ID pvc-1234 already exists"
    );
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_lock_is_released_after_create() {
    let (service, _cloud, _bus) = service_with(&config());

    service
        .create_volume(&RequestContext::new(), dynamic_request("pvc-1234"))
        .await
        .unwrap();

    assert!(!service.locks().is_held("pvc-1234"));
    assert_eq!(service.locks().held_count(), 0);
}

#[tokio::test]
async fn test_rounded_capacity_over_limit() {
    let (service, cloud, _bus) = service_with(&config());
    let mut request = dynamic_request("pvc-1234");
    request.limit_bytes = 10 * TIB;

    let err = service
        .create_volume(&RequestContext::new(), request)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.message().contains("greater than capacity limit"));
    assert_eq!(cloud.filesystem_count(), 0);
}

#[tokio::test]
async fn test_missing_name_is_invalid() {
    let (service, _cloud, _bus) = service_with(&config());

    let err = service
        .create_volume(&RequestContext::new(), dynamic_request(""))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "CreateVolume Name must be provided");
}

#[tokio::test]
async fn test_overlong_volume_name_cannot_form_cluster_name() {
    let (service, cloud, _bus) = service_with(&config());
    let name = format!("pvc-{}", "a".repeat(90));

    let err = service
        .create_volume(&RequestContext::new(), dynamic_request(&name))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.message().contains("cannot create valid AMLFS name"));
    assert!(cloud.calls().iter().all(|c| matches!(c, CloudCall::ListSkus)));
}

#[tokio::test]
async fn test_mock_mode_rejects_dynamic_provisioning() {
    let mut config = config();
    config.spec.provisioning.mock_dynamic_provisioning = true;
    let (service, cloud, _bus) = service_with(&config);

    let err = service
        .create_volume(&RequestContext::new(), dynamic_request("pvc-1234"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::Internal);
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_static_volume_needs_no_cloud_calls() {
    let (service, cloud, _bus) = service_with(&config());
    let request = CreateVolumeRequest {
        name: "pvc-static".to_string(),
        required_bytes: 0,
        limit_bytes: 0,
        parameters: HashMap::from([
            ("mgs-ip-address".to_string(), "10.2.0.4".to_string()),
            ("fs-name".to_string(), "lustrefs".to_string()),
            ("sub-dir".to_string(), "/team/".to_string()),
        ]),
    };

    let created = service
        .create_volume(&RequestContext::new(), request)
        .await
        .unwrap();

    assert_eq!(created.volume_id, "pvc-static#lustrefs#10.2.0.4#team##");
    assert_eq!(created.capacity_bytes, 4 * TIB);
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_static_volume_requires_fs_name() {
    let (service, _cloud, _bus) = service_with(&config());
    let request = CreateVolumeRequest {
        name: "pvc-static".to_string(),
        parameters: HashMap::from([("mgs-ip-address".to_string(), "10.2.0.4".to_string())]),
        ..Default::default()
    };

    let err = service
        .create_volume(&RequestContext::new(), request)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "CreateVolume Parameter fs-name must be provided");
}

fn premium_40_in_eastus(increment_tib: &str, maximum_tib: &str) -> CatalogSku {
    CatalogSku {
        name: "AMLFS-Durable-Premium-40".to_string(),
        resource_type: AMLFS_SKU_RESOURCE_TYPE.to_string(),
        locations: vec!["eastus".to_string()],
        capabilities: vec![
            SkuCapability {
                name: SKU_CAPACITY_INCREMENT_CAPABILITY.to_string(),
                value: increment_tib.to_string(),
            },
            SkuCapability {
                name: SKU_CAPACITY_MAXIMUM_CAPABILITY.to_string(),
                value: maximum_tib.to_string(),
            },
        ],
    }
}

#[tokio::test]
async fn test_sku_catalog_is_read_once_per_location() {
    let (service, cloud, _bus) = service_with(&config());
    cloud.set_catalog(vec![premium_40_in_eastus("48", "768")]);
    let ctx = RequestContext::new();

    service.create_volume(&ctx, dynamic_request("pvc-a")).await.unwrap();
    service.create_volume(&ctx, dynamic_request("pvc-b")).await.unwrap();

    assert_eq!(cloud.count_calls(|c| matches!(c, CloudCall::ListSkus)), 1);
    assert_eq!(cloud.filesystem_count(), 2);
}

#[tokio::test]
async fn test_catalog_outage_is_not_cached() {
    let (service, cloud, _bus) = service_with(&config());
    let ctx = RequestContext::new();
    cloud.set_catalog(vec![premium_40_in_eastus("8", "128")]);
    cloud.fail_catalog(503, "catalog unavailable");

    let during_outage = service.create_volume(&ctx, dynamic_request("pvc-a")).await.unwrap();
    assert_eq!(during_outage.capacity_bytes, 48 * TIB);

    cloud.recover_catalog();
    let after_recovery = service.create_volume(&ctx, dynamic_request("pvc-b")).await.unwrap();
    assert_eq!(after_recovery.capacity_bytes, 8 * TIB);

    service.create_volume(&ctx, dynamic_request("pvc-c")).await.unwrap();
    assert_eq!(cloud.count_calls(|c| matches!(c, CloudCall::ListSkus)), 2);
}

#[tokio::test]
async fn test_concurrent_creates_of_same_volume() {
    let (service, cloud, _bus) = service_with(&config());
    cloud.set_polls_before_done(2);
    let service = Arc::new(service);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .create_volume(&RequestContext::new(), dynamic_request("pvc-1234"))
                    .await
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let mut succeeded = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e.code(), Code::Aborted),
        }
    }

    assert!(succeeded >= 1);
    assert_eq!(cloud.filesystem_count(), 1);
}
