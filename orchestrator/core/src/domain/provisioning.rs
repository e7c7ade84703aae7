// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Provisioning Request & Parameter Parsing
//!
//! Storage class parameters arrive as an unordered, free-form string map.
//! [`parse_provisioning_parameters`] turns them into a typed
//! [`ProvisioningRequest`], rejecting unknown keys and enforcing the rules that
//! tie keys together:
//!
//! - `mgs-ip-address` present: the volume points at an existing (static)
//!   cluster and none of the creation-only keys may be set.
//! - `mgs-ip-address` absent: a cluster will be created (dynamic) and its
//!   name, maintenance window, SKU and zones are required.

use crate::domain::errors::ProvisioningError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

pub const PARAM_MGS_IP_ADDRESS: &str = "mgs-ip-address";
pub const PARAM_FS_NAME: &str = "fs-name";
pub const PARAM_SUB_DIR: &str = "sub-dir";
pub const PARAM_LOCATION: &str = "location";
pub const PARAM_AMLFS_NAME: &str = "amlfilesystem-name";
pub const PARAM_RESOURCE_GROUP: &str = "resource-group-name";
pub const PARAM_VNET_RESOURCE_GROUP: &str = "vnet-resource-group";
pub const PARAM_VNET_NAME: &str = "vnet-name";
pub const PARAM_SUBNET_NAME: &str = "subnet-name";
pub const PARAM_MAINTENANCE_DAY: &str = "maintenance-day-of-week";
pub const PARAM_TIME_OF_DAY_UTC: &str = "time-of-day-utc";
pub const PARAM_SKU_NAME: &str = "sku-name";
pub const PARAM_ZONES: &str = "zones";
pub const PARAM_TAGS: &str = "tags";
pub const PARAM_IDENTITIES: &str = "identities";
pub const PARAM_ROOT_SQUASH_MODE: &str = "root-squash-mode";
pub const PARAM_ROOT_SQUASH_NID_LISTS: &str = "root-squash-nid-lists";
pub const PARAM_ROOT_SQUASH_UID: &str = "root-squash-uid";
pub const PARAM_ROOT_SQUASH_GID: &str = "root-squash-gid";

pub const PVC_NAME_KEY: &str = "csi.storage.k8s.io/pvc/name";
pub const PVC_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pvc/namespace";
pub const PV_NAME_KEY: &str = "csi.storage.k8s.io/pv/name";
pub const POD_NAME_KEY: &str = "csi.storage.k8s.io/pod.name";
pub const POD_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pod.namespace";

const PVC_NAME_PLACEHOLDER: &str = "${pvc.metadata.name}";
const PVC_NAMESPACE_PLACEHOLDER: &str = "${pvc.metadata.namespace}";
const PV_NAME_PLACEHOLDER: &str = "${pv.metadata.name}";
const POD_NAME_PLACEHOLDER: &str = "${pod.metadata.name}";
const POD_NAMESPACE_PLACEHOLDER: &str = "${pod.metadata.namespace}";

pub const MAX_SQUASH_ID: u64 = 4_294_967_295;

static TIME_OF_DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$").expect("valid regex"));

static NID_LISTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9.,;\[\]@tcp*-]+$").expect("valid regex"));

static AMLFS_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]{0,78}[a-zA-Z0-9]$").expect("valid regex")
});

static AMLFS_NAME_INVALID_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_-]+").expect("valid regex"));

pub const AMLFS_NAME_MAX_LENGTH: usize = 80;
const FALLBACK_AMLFS_NAME_SUFFIX: &str = "azurelustre-csi";

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "Monday",
            DayOfWeek::Tuesday => "Tuesday",
            DayOfWeek::Wednesday => "Wednesday",
            DayOfWeek::Thursday => "Thursday",
            DayOfWeek::Friday => "Friday",
            DayOfWeek::Saturday => "Saturday",
            DayOfWeek::Sunday => "Sunday",
        }
    }
}

impl FromStr for DayOfWeek {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|day| day.as_str() == s).ok_or(())
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub day_of_week: DayOfWeek,
    /// `HH:MM`, 24-hour clock, UTC
    pub time_of_day_utc: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SquashMode {
    None,
    RootOnly,
    All,
}

impl SquashMode {
    pub const ALL: [SquashMode; 3] = [SquashMode::None, SquashMode::RootOnly, SquashMode::All];

    pub fn as_str(&self) -> &'static str {
        match self {
            SquashMode::None => "None",
            SquashMode::RootOnly => "RootOnly",
            SquashMode::All => "All",
        }
    }
}

impl FromStr for SquashMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|mode| mode.as_str() == s).ok_or(())
    }
}

impl fmt::Display for SquashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root squash settings requested for a dynamically created cluster.
///
/// When `mode` is not [`SquashMode::None`] the NID list, UID and GID are all
/// set; [`parse_provisioning_parameters`] refuses to build one otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSquashPolicy {
    pub mode: SquashMode,
    pub no_squash_nid_lists: Option<String>,
    pub squash_uid: Option<u32>,
    pub squash_gid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetReference {
    pub vnet_resource_group: String,
    pub vnet_name: String,
    pub subnet_name: String,
    /// Fully qualified ARM id, resolved from the three names above
    pub subnet_id: String,
}

impl SubnetReference {
    pub fn is_complete(&self) -> bool {
        !(self.subnet_id.is_empty()
            || self.subnet_name.is_empty()
            || self.vnet_name.is_empty()
            || self.vnet_resource_group.is_empty())
    }
}

// ============================================================================
// Provisioning Request
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub resource_group: String,
    pub amlfs_name: String,
    pub location: String,
    pub tags: BTreeMap<String, String>,
    pub identities: Vec<String>,
    pub subnet: SubnetReference,
    pub maintenance_window: Option<MaintenanceWindow>,
    pub sku_name: String,
    pub zones: Vec<String>,
    pub root_squash: Option<RootSquashPolicy>,
    pub storage_capacity_tib: f64,
    /// Set for static volumes, which reference an existing cluster
    pub mgs_address: Option<String>,
}

impl ProvisioningRequest {
    /// True when a new AMLFS cluster has to be created for this volume.
    pub fn is_dynamic(&self) -> bool {
        self.mgs_address.is_none()
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Default)]
struct RawRootSquash {
    mode: Option<SquashMode>,
    nid_lists: Option<String>,
    uid: Option<u32>,
    gid: Option<u32>,
}

/// Parse storage class parameters into a [`ProvisioningRequest`].
///
/// Keys are matched case-insensitively. The capacity and the resolved subnet
/// id are not parameters; callers fill them in afterwards.
pub fn parse_provisioning_parameters(
    parameters: &HashMap<String, String>,
) -> Result<ProvisioningRequest, ProvisioningError> {
    debug!(?parameters, "parsing provisioning parameters");

    let mut request = ProvisioningRequest::default();
    let mut raw_name: Option<String> = None;
    let mut day_of_week: Option<DayOfWeek> = None;
    let mut time_of_day: Option<String> = None;
    let mut root_squash = RawRootSquash::default();
    let mut placeholders: Vec<(&'static str, String)> = Vec::new();
    let mut invalid_parameters: Vec<String> = Vec::new();
    let mut static_volume = false;

    // Sorted so that validation failures are reported deterministically.
    let mut entries: Vec<(&String, &String)> = parameters.iter().collect();
    entries.sort();

    for (key, value) in entries {
        match key.to_lowercase().as_str() {
            PARAM_RESOURCE_GROUP => request.resource_group = value.clone(),
            PARAM_MGS_IP_ADDRESS => {
                static_volume = true;
                request.mgs_address = Some(value.clone());
            }
            PARAM_AMLFS_NAME => raw_name = Some(value.clone()),
            PARAM_LOCATION => request.location = value.clone(),
            PARAM_VNET_NAME => request.subnet.vnet_name = value.clone(),
            PARAM_VNET_RESOURCE_GROUP => request.subnet.vnet_resource_group = value.clone(),
            PARAM_SUBNET_NAME => request.subnet.subnet_name = value.clone(),
            PARAM_MAINTENANCE_DAY => {
                let day = value.parse::<DayOfWeek>().map_err(|_| {
                    ProvisioningError::invalid_argument(format!(
                        "CreateVolume Parameter {} must be one of: {:?}, was: '{}'",
                        PARAM_MAINTENANCE_DAY,
                        DayOfWeek::ALL.map(|d| d.as_str()),
                        value
                    ))
                })?;
                day_of_week = Some(day);
            }
            PARAM_TIME_OF_DAY_UTC => {
                if !TIME_OF_DAY_RE.is_match(value) {
                    return Err(ProvisioningError::invalid_argument(format!(
                        "CreateVolume Parameter {} must be in the form HH:MM, was: '{}'",
                        PARAM_TIME_OF_DAY_UTC, value
                    )));
                }
                time_of_day = Some(value.clone());
            }
            PARAM_SKU_NAME => request.sku_name = value.clone(),
            PARAM_ZONES => {
                request.zones = value
                    .split(',')
                    .filter(|zone| !zone.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            PARAM_TAGS => request.tags = parse_tags(value)?,
            PARAM_IDENTITIES => {
                request.identities = value
                    .split(',')
                    .map(str::trim)
                    .filter(|identity| !identity.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            PARAM_ROOT_SQUASH_MODE => {
                let mode = value.parse::<SquashMode>().map_err(|_| {
                    ProvisioningError::invalid_argument(format!(
                        "CreateVolume Parameter {} must be one of: {:?}, was: '{}'",
                        PARAM_ROOT_SQUASH_MODE,
                        SquashMode::ALL.map(|m| m.as_str()),
                        value
                    ))
                })?;
                root_squash.mode = Some(mode);
            }
            PARAM_ROOT_SQUASH_NID_LISTS => {
                if !NID_LISTS_RE.is_match(value) {
                    return Err(ProvisioningError::invalid_argument(format!(
                        "CreateVolume {} must be in the form '10.0.2.4@tcp;10.0.2.[6-8]@tcp;10.0.2.10@tcp', was: {}",
                        PARAM_ROOT_SQUASH_NID_LISTS, value
                    )));
                }
                root_squash.nid_lists = Some(value.clone());
            }
            PARAM_ROOT_SQUASH_UID => {
                root_squash.uid = Some(parse_squash_id(PARAM_ROOT_SQUASH_UID, value)?);
            }
            PARAM_ROOT_SQUASH_GID => {
                root_squash.gid = Some(parse_squash_id(PARAM_ROOT_SQUASH_GID, value)?);
            }
            PVC_NAMESPACE_KEY => placeholders.push((PVC_NAMESPACE_PLACEHOLDER, value.clone())),
            PVC_NAME_KEY => placeholders.push((PVC_NAME_PLACEHOLDER, value.clone())),
            PV_NAME_KEY => placeholders.push((PV_NAME_PLACEHOLDER, value.clone())),
            POD_NAME_KEY => placeholders.push((POD_NAME_PLACEHOLDER, value.clone())),
            POD_NAMESPACE_KEY => placeholders.push((POD_NAMESPACE_PLACEHOLDER, value.clone())),
            // Consumed when the volume identifier is built
            PARAM_FS_NAME | PARAM_SUB_DIR => {}
            _ => invalid_parameters.push(format!("{} = {}", key, value)),
        }
    }

    if !invalid_parameters.is_empty() {
        return Err(ProvisioningError::invalid_argument(format!(
            "Invalid parameter(s) {{{}}} in storage class",
            invalid_parameters.join(", ")
        )));
    }

    if static_volume {
        let forbidden = [
            (PARAM_AMLFS_NAME, raw_name.is_some()),
            (PARAM_MAINTENANCE_DAY, day_of_week.is_some()),
            (PARAM_TIME_OF_DAY_UTC, time_of_day.is_some()),
            (PARAM_SKU_NAME, !request.sku_name.is_empty()),
            (PARAM_ZONES, !request.zones.is_empty()),
        ];
        if let Some((key, _)) = forbidden.into_iter().find(|(_, present)| *present) {
            return Err(ProvisioningError::invalid_argument(format!(
                "CreateVolume {} must not be provided when using a static AMLFS ('{}' present)",
                key, PARAM_MGS_IP_ADDRESS
            )));
        }
        return Ok(request);
    }

    let raw_name = raw_name.filter(|name| !name.is_empty());
    let Some(raw_name) = raw_name else {
        return Err(missing_dynamic_parameter(PARAM_AMLFS_NAME));
    };
    let Some(day_of_week) = day_of_week else {
        return Err(missing_dynamic_parameter(PARAM_MAINTENANCE_DAY));
    };
    if request.sku_name.is_empty() {
        return Err(missing_dynamic_parameter(PARAM_SKU_NAME));
    }
    let Some(time_of_day_utc) = time_of_day else {
        return Err(missing_dynamic_parameter(PARAM_TIME_OF_DAY_UTC));
    };
    if request.zones.is_empty() {
        return Err(missing_dynamic_parameter(PARAM_ZONES));
    }

    request.maintenance_window = Some(MaintenanceWindow {
        day_of_week,
        time_of_day_utc,
    });
    request.root_squash = build_root_squash(root_squash)?;
    request.amlfs_name = substitute_placeholders(&raw_name, &placeholders)
        .trim()
        .to_string();

    Ok(request)
}

fn missing_dynamic_parameter(key: &str) -> ProvisioningError {
    ProvisioningError::invalid_argument(format!(
        "CreateVolume {} must be provided for dynamically provisioned AMLFS",
        key
    ))
}

fn build_root_squash(raw: RawRootSquash) -> Result<Option<RootSquashPolicy>, ProvisioningError> {
    let Some(mode) = raw.mode else {
        return Ok(None);
    };

    if mode != SquashMode::None
        && (raw.nid_lists.is_none() || raw.uid.is_none() || raw.gid.is_none())
    {
        return Err(ProvisioningError::invalid_argument(format!(
            "invalid root squash info, must have valid {}, {}, and {} when {} is set to {} or {}",
            PARAM_ROOT_SQUASH_NID_LISTS,
            PARAM_ROOT_SQUASH_UID,
            PARAM_ROOT_SQUASH_GID,
            PARAM_ROOT_SQUASH_MODE,
            SquashMode::RootOnly,
            SquashMode::All
        )));
    }

    Ok(Some(RootSquashPolicy {
        mode,
        no_squash_nid_lists: raw.nid_lists,
        squash_uid: raw.uid,
        squash_gid: raw.gid,
    }))
}

fn parse_squash_id(key: &str, value: &str) -> Result<u32, ProvisioningError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|id| (1..=MAX_SQUASH_ID).contains(id))
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| {
            ProvisioningError::invalid_argument(format!(
                "CreateVolume {} value must be number between 1 and {}, was: {}",
                key, MAX_SQUASH_ID, value
            ))
        })
}

/// Derive the cluster name for volume `volume_name` from the requested name.
///
/// The result is `<volume>-<requested>` when that is a legal AMLFS name.
/// Otherwise a name is generated from the volume name alone, which callers
/// must still check contains the volume name.
pub fn validate_and_prepend_volume_name(amlfs_name: &str, volume_name: &str) -> String {
    let candidate = truncate_amlfs_name(&format!("{}-{}", volume_name, amlfs_name));
    if AMLFS_NAME_RE.is_match(&candidate) {
        return candidate;
    }

    let fallback = format!("{}-{}", volume_name, FALLBACK_AMLFS_NAME_SUFFIX);
    let fallback = AMLFS_NAME_INVALID_CHARS_RE.replace_all(&fallback, "");
    let fallback = truncate_amlfs_name(&fallback)
        .trim_matches(|c| c == '-' || c == '_')
        .to_string();
    warn!(
        requested = amlfs_name,
        regenerated = %fallback,
        "requested aml filesystem name is invalid, regenerating"
    );
    fallback
}

fn truncate_amlfs_name(name: &str) -> String {
    name.chars().take(AMLFS_NAME_MAX_LENGTH).collect()
}

/// Parse `key1=value1,key2=value2` into a map.
pub fn parse_tags(tags: &str) -> Result<BTreeMap<String, String>, ProvisioningError> {
    let mut parsed = BTreeMap::new();
    if tags.trim().is_empty() {
        return Ok(parsed);
    }

    for tag in tags.split(',') {
        let invalid = || {
            ProvisioningError::invalid_argument(format!(
                "CreateVolume Tags '{}' are invalid, the format should be like: 'key1=value1,key2=value2'",
                tags
            ))
        };
        let (key, value) = tag.split_once('=').ok_or_else(invalid)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(invalid());
        }
        parsed.insert(key.to_string(), value.trim().to_string());
    }

    Ok(parsed)
}

fn substitute_placeholders(raw: &str, placeholders: &[(&'static str, String)]) -> String {
    placeholders
        .iter()
        .fold(raw.to_string(), |name, (placeholder, value)| {
            name.replace(placeholder, value)
        })
}
