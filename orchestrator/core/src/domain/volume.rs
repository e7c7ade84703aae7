// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Identifier
//!
//! The identifier handed back to the orchestration layer is the only state
//! that survives between a create and the matching delete, so it carries
//! everything needed to find and tear down the volume later:
//!
//! ```text
//! <display name>#<export name>#<mgs address>#<sub dir>#<amlfs name>#<resource group>
//! ```
//!
//! The first three segments are mandatory; the remaining three may be empty.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub const VOLUME_ID_SEPARATOR: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeIdError {
    #[error("could not split volume ID {0:?} into lustre name and ip address")]
    TooFewSegments(String),

    #[error("volume ID {id:?}: dynamically created aml filesystem name {amlfs_name:?} is set but associated resource group is not")]
    MissingResourceGroup { id: String, amlfs_name: String },

    #[error("volume ID field {field} must not contain '{separator}', was {value:?}")]
    ReservedSeparator {
        field: &'static str,
        value: String,
        separator: char,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeIdentifier {
    pub display_name: String,
    /// Lustre filesystem (export) name, e.g. `lustrefs`
    pub export_name: String,
    pub mgs_address: String,
    pub sub_dir: String,
    /// Name of the AMLFS cluster when it was created dynamically
    pub amlfs_name: String,
    pub resource_group: String,
}

impl VolumeIdentifier {
    pub fn new(
        display_name: impl Into<String>,
        export_name: impl Into<String>,
        mgs_address: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            export_name: trim_slashes(&export_name.into()),
            mgs_address: mgs_address.into(),
            ..Default::default()
        }
    }

    pub fn with_sub_dir(mut self, sub_dir: impl Into<String>) -> Self {
        self.sub_dir = trim_slashes(&sub_dir.into());
        self
    }

    pub fn with_dynamic_filesystem(
        mut self,
        amlfs_name: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        self.amlfs_name = amlfs_name.into();
        self.resource_group = resource_group.into();
        self
    }

    /// True when the volume owns an AMLFS cluster that delete must tear down.
    pub fn is_dynamic(&self) -> bool {
        !self.amlfs_name.is_empty()
    }

    pub fn encode(&self) -> Result<String, VolumeIdError> {
        let export_name = trim_slashes(&self.export_name);
        let sub_dir = trim_slashes(&self.sub_dir);

        let fields: [(&'static str, &str); 6] = [
            ("display name", &self.display_name),
            ("export name", &export_name),
            ("mgs address", &self.mgs_address),
            ("sub dir", &sub_dir),
            ("amlfs name", &self.amlfs_name),
            ("resource group", &self.resource_group),
        ];

        for (field, value) in fields {
            if value.contains(VOLUME_ID_SEPARATOR) {
                return Err(VolumeIdError::ReservedSeparator {
                    field,
                    value: value.to_string(),
                    separator: VOLUME_ID_SEPARATOR,
                });
            }
        }

        if !self.amlfs_name.is_empty() && self.resource_group.is_empty() {
            return Err(VolumeIdError::MissingResourceGroup {
                id: self.display_name.clone(),
                amlfs_name: self.amlfs_name.clone(),
            });
        }

        Ok(fields
            .iter()
            .map(|(_, value)| *value)
            .collect::<Vec<_>>()
            .join(&VOLUME_ID_SEPARATOR.to_string()))
    }

    pub fn decode(id: &str) -> Result<Self, VolumeIdError> {
        let segments: Vec<&str> = id.split(VOLUME_ID_SEPARATOR).collect();
        if segments.len() < 3 {
            return Err(VolumeIdError::TooFewSegments(id.to_string()));
        }

        let segment = |index: usize| segments.get(index).copied().unwrap_or_default();

        let volume = Self {
            display_name: segments[0].to_string(),
            export_name: trim_slashes(segments[1]),
            mgs_address: segments[2].to_string(),
            sub_dir: trim_slashes(segment(3)),
            amlfs_name: segment(4).to_string(),
            resource_group: segment(5).to_string(),
        };

        if volume.is_dynamic() && volume.resource_group.is_empty() {
            return Err(VolumeIdError::MissingResourceGroup {
                id: id.to_string(),
                amlfs_name: volume.amlfs_name,
            });
        }

        Ok(volume)
    }
}

impl FromStr for VolumeIdentifier {
    type Err = VolumeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn trim_slashes(value: &str) -> String {
    value.trim_matches('/').to_string()
}
