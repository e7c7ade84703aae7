// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Provisioner Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) holding:
// - the cloud coordinates of the cluster the provisioner serves
//   (subscription, resource group, location, default virtual network)
// - provisioning behaviour (poll frequency, SKU catalog lookup, mock mode)
// - observability settings

use crate::domain::operation::DEFAULT_POLL_FREQUENCY;
use crate::domain::provisioning::SubnetReference;
use crate::domain::sku::SkuCapacityTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "amlfs.orchestrator/v1";
pub const KIND: &str = "ProvisionerConfig";
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

const ENV_CONFIG_PATH: &str = "AMLFS_CONFIG_PATH";
const ENV_MOCK_DYNAMIC_PROVISIONING: &str = "AMLFS_MOCK_DYNAMIC_PROVISIONING";
const ENV_POLL_FREQUENCY: &str = "AMLFS_POLL_FREQUENCY";
const ENV_LOCATION: &str = "AMLFS_LOCATION";
const ENV_RESOURCE_GROUP: &str = "AMLFS_RESOURCE_GROUP";

/// Top-level Kubernetes-style provisioner configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfigManifest {
    /// API version (must be "amlfs.orchestrator/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ProvisionerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ProvisionerConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionerConfigSpec {
    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Cloud coordinates of the cluster. Empty strings mean "not configured".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub subscription_id: String,

    /// Subscription owning the virtual network, when it differs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_subscription_id: Option<String>,

    #[serde(default)]
    pub resource_group: String,

    #[serde(default)]
    pub location: String,

    /// Defaults to `resource_group`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnet_resource_group: Option<String>,

    #[serde(default)]
    pub vnet_name: String,

    #[serde(default)]
    pub subnet_name: String,

    #[serde(default = "default_arm_endpoint")]
    pub arm_endpoint: String,

    /// Bearer token for ARM (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            network_subscription_id: None,
            resource_group: String::new(),
            location: String::new(),
            vnet_resource_group: None,
            vnet_name: String::new(),
            subnet_name: String::new(),
            arm_endpoint: default_arm_endpoint(),
            access_token: None,
        }
    }
}

impl CloudConfig {
    pub fn network_subscription(&self) -> &str {
        self.network_subscription_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.subscription_id)
    }

    pub fn default_vnet_resource_group(&self) -> &str {
        self.vnet_resource_group
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.resource_group)
    }

    pub fn subnet_resource_id(
        &self,
        vnet_resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
            self.network_subscription(),
            vnet_resource_group,
            vnet_name,
            subnet_name
        )
    }

    /// Fill unset subnet fields from the configured defaults and resolve the
    /// subnet id. The id stays empty when any of the names is still missing.
    pub fn populate_subnet(&self, subnet: &mut SubnetReference) {
        if subnet.vnet_resource_group.is_empty() {
            subnet.vnet_resource_group = self.default_vnet_resource_group().to_string();
        }
        if subnet.vnet_name.is_empty() {
            subnet.vnet_name = self.vnet_name.clone();
        }
        if subnet.subnet_name.is_empty() {
            subnet.subnet_name = self.subnet_name.clone();
        }

        if subnet.vnet_resource_group.is_empty()
            || subnet.vnet_name.is_empty()
            || subnet.subnet_name.is_empty()
            || self.network_subscription().is_empty()
        {
            subnet.subnet_id.clear();
            return;
        }
        subnet.subnet_id = self.subnet_resource_id(
            &subnet.vnet_resource_group,
            &subnet.vnet_name,
            &subnet.subnet_name,
        );
    }

    /// True when enough is configured to talk to the management plane.
    pub fn has_credentials(&self) -> bool {
        !self.subscription_id.is_empty() && self.access_token.is_some()
    }

    /// Resolve `access_token`, expanding `env:VAR_NAME` references.
    pub fn resolve_access_token(&self) -> anyhow::Result<Option<String>> {
        match self.access_token.as_deref() {
            None => Ok(None),
            Some(value) => match value.strip_prefix("env:") {
                Some(var) => std::env::var(var).map(Some).map_err(|_| {
                    anyhow::anyhow!(
                        "access_token references environment variable '{}' which is not set",
                        var
                    )
                }),
                None => Ok(Some(value.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Interval between polls of long-running operations
    #[serde(default = "default_poll_frequency", with = "humantime_serde")]
    pub poll_frequency: Duration,

    /// Refresh SKU increments/maxima from the catalog per location
    #[serde(default = "default_true")]
    pub dynamic_sku_lookup: bool,

    /// Run without cloud clients; dynamic creates fail, static volumes work
    #[serde(default)]
    pub mock_dynamic_provisioning: bool,

    /// Replaces the built-in SKU capacity table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku_overrides: Option<SkuCapacityTable>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            poll_frequency: default_poll_frequency(),
            dynamic_sku_lookup: true,
            mock_dynamic_provisioning: false,
            sku_overrides: None,
        }
    }
}

impl ProvisioningConfig {
    pub fn sku_table(&self) -> SkuCapacityTable {
        self.sku_overrides
            .clone()
            .filter(|table| !table.is_empty())
            .unwrap_or_else(SkuCapacityTable::defaults)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_arm_endpoint() -> String {
    DEFAULT_ARM_ENDPOINT.to_string()
}

fn default_poll_frequency() -> Duration {
    DEFAULT_POLL_FREQUENCY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ProvisionerConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "amlfs-provisioner".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ProvisionerConfigSpec::default(),
        }
    }
}

impl ProvisionerConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AMLFS_CONFIG_PATH environment variable
    /// 2. ./amlfs-config.yaml (working directory)
    /// 3. ~/.amlfs/config.yaml (user home)
    /// 4. /etc/amlfs/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./amlfs-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".amlfs").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/amlfs/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = explicit_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using empty defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup(ENV_MOCK_DYNAMIC_PROVISIONING) {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: {}=true", ENV_MOCK_DYNAMIC_PROVISIONING);
                    self.spec.provisioning.mock_dynamic_provisioning = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: {}=false", ENV_MOCK_DYNAMIC_PROVISIONING);
                    self.spec.provisioning.mock_dynamic_provisioning = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                        ENV_MOCK_DYNAMIC_PROVISIONING,
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup(ENV_POLL_FREQUENCY) {
            match humantime_serde::re::humantime::parse_duration(&val) {
                Ok(frequency) => {
                    tracing::info!("Environment override: {}={}", ENV_POLL_FREQUENCY, val);
                    self.spec.provisioning.poll_frequency = frequency;
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid value for {}: '{}' ({}). Ignoring.",
                        ENV_POLL_FREQUENCY,
                        val,
                        e
                    );
                }
            }
        }

        if let Some(val) = lookup(ENV_LOCATION).filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: {}={}", ENV_LOCATION, val);
            self.spec.cloud.location = val;
        }

        if let Some(val) = lookup(ENV_RESOURCE_GROUP).filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: {}={}", ENV_RESOURCE_GROUP, val);
            self.spec.cloud.resource_group = val;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.provisioning.poll_frequency.is_zero() {
            anyhow::bail!("spec.provisioning.poll_frequency must be greater than zero");
        }

        if let Err(e) = reqwest::Url::parse(&self.spec.cloud.arm_endpoint) {
            anyhow::bail!(
                "spec.cloud.arm_endpoint '{}' is not a valid URL: {}",
                self.spec.cloud.arm_endpoint,
                e
            );
        }

        if let Some(table) = &self.spec.provisioning.sku_overrides {
            for name in table.sku_names() {
                if let Some(entry) = table.get(name) {
                    if entry.increment_tib <= 0 || entry.maximum_tib < entry.increment_tib {
                        anyhow::bail!(
                            "SKU override '{}' must have a positive increment not above its maximum",
                            name
                        );
                    }
                }
            }
        }

        if !matches!(
            self.spec.observability.logging.format.as_str(),
            "json" | "text"
        ) {
            anyhow::bail!(
                "spec.observability.logging.format must be 'json' or 'text', was '{}'",
                self.spec.observability.logging.format
            );
        }

        Ok(())
    }
}
