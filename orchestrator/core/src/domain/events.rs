// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::errors::Code;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeOperation {
    Create,
    Delete,
}

/// Volume lifecycle events published by the volume service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProvisioningEvent {
    VolumeCreated {
        volume_id: String,
        capacity_bytes: i64,
        /// Set when an AMLFS cluster was created (or updated) for the volume
        amlfs_name: Option<String>,
        mgs_address: String,
        created_at: DateTime<Utc>,
    },
    VolumeDeleted {
        volume_id: String,
        amlfs_name: Option<String>,
        deleted_at: DateTime<Utc>,
    },
    VolumeOperationFailed {
        /// Volume name on create, volume ID on delete
        volume: String,
        operation: VolumeOperation,
        code: Code,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    AdmissionRejected {
        subnet_id: String,
        sku_name: String,
        required_addresses: i64,
        available_addresses: i64,
        rejected_at: DateTime<Utc>,
    },
}

impl ProvisioningEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProvisioningEvent::VolumeCreated { created_at, .. } => *created_at,
            ProvisioningEvent::VolumeDeleted { deleted_at, .. } => *deleted_at,
            ProvisioningEvent::VolumeOperationFailed { failed_at, .. } => *failed_at,
            ProvisioningEvent::AdmissionRejected { rejected_at, .. } => *rejected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_created_serializes_with_variant_name() {
        let event = ProvisioningEvent::VolumeCreated {
            volume_id: "pvc-1#lustrefs#10.0.0.4###".to_string(),
            capacity_bytes: 1 << 42,
            amlfs_name: None,
            mgs_address: "10.0.0.4".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("VolumeCreated"));
        assert!(json.contains("10.0.0.4"));
    }

    #[test]
    fn test_failure_event_carries_code() {
        let failed_at = Utc::now();
        let event = ProvisioningEvent::VolumeOperationFailed {
            volume: "pvc-1".to_string(),
            operation: VolumeOperation::Create,
            code: Code::ResourceExhausted,
            reason: "subnet full".to_string(),
            failed_at,
        };
        assert_eq!(event.occurred_at(), failed_at);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ResourceExhausted"));
    }
}
