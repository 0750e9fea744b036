use crate::kinds::{AddOnKind, NodeGroupKind, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    RenderToml(#[from] toml::ser::Error),
    #[error("unsupported config_version: {0}, expected {CONFIG_VERSION}")]
    UnsupportedVersion(u32),
    #[error("invalid environment name '{0}': must be 1-100 characters of [a-zA-Z0-9-]")]
    InvalidName(String),
    #[error("region must not be empty")]
    EmptyRegion,
    #[error("unknown add-on '{0}'")]
    UnknownAddOn(String),
    #[error("duplicate node group name '{0}'")]
    DuplicateNodeGroup(String),
    #[error("hook '{0}' has a command but no output path")]
    MissingHookOutput(&'static str),
    #[error("add-on '{0}' declares an empty namespace")]
    EmptyNamespace(String),
}

/// Operator intent for one test environment, parsed from `kubetester.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub config_version: u32,
    pub name: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub prerequisites: PrerequisitesSection,
    #[serde(default)]
    pub node_groups: NodeGroupSection,
    #[serde(default)]
    pub managed_node_groups: NodeGroupSection,
    #[serde(default)]
    pub add_ons: BTreeMap<String, AddOnConfig>,
    #[serde(default)]
    pub hooks: HooksSection,
    #[serde(default)]
    pub on_failure: OnFailureSection,
    #[serde(default)]
    pub timings: Timings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSection {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            required_tools: Vec::new(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl ProviderSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Which prerequisites this tool owns. A `false` toggle means the resource is
/// imported or not used, so it is never created nor deleted.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PrerequisitesSection {
    #[serde(default = "default_true")]
    pub create_bucket: bool,
    #[serde(default)]
    pub create_encryption_key: bool,
    #[serde(default = "default_true")]
    pub create_key_pair: bool,
    #[serde(default = "default_true")]
    pub create_cluster_role: bool,
    #[serde(default = "default_true")]
    pub create_network: bool,
    #[serde(default)]
    pub commands: StepCommands,
}

impl Default for PrerequisitesSection {
    fn default() -> Self {
        Self {
            create_bucket: true,
            create_encryption_key: false,
            create_key_pair: true,
            create_cluster_role: true,
            create_network: true,
            commands: StepCommands::default(),
        }
    }
}

impl PrerequisitesSection {
    /// Whether this tool creates (and later deletes) the given resource.
    /// The control plane is always owned.
    pub fn owns(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Bucket => self.create_bucket,
            ResourceKind::EncryptionKey => self.create_encryption_key,
            ResourceKind::KeyPair => self.create_key_pair,
            ResourceKind::ClusterRole => self.create_cluster_role,
            ResourceKind::Network => self.create_network,
            ResourceKind::Cluster => true,
        }
    }
}

/// Shell commands backing each infrastructure step for the command provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StepCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_encryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_encryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_key_pair: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_key_pair: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_cluster_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_cluster_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_artifacts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_gpu_driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_smoke_test: Option<String>,
}

impl StepCommands {
    pub fn create(&self, kind: ResourceKind) -> Option<&str> {
        match kind {
            ResourceKind::Bucket => self.create_bucket.as_deref(),
            ResourceKind::EncryptionKey => self.create_encryption_key.as_deref(),
            ResourceKind::KeyPair => self.create_key_pair.as_deref(),
            ResourceKind::ClusterRole => self.create_cluster_role.as_deref(),
            ResourceKind::Network => self.create_network.as_deref(),
            ResourceKind::Cluster => self.create_cluster.as_deref(),
        }
    }

    pub fn delete(&self, kind: ResourceKind) -> Option<&str> {
        match kind {
            ResourceKind::Bucket => self.delete_bucket.as_deref(),
            ResourceKind::EncryptionKey => self.delete_encryption_key.as_deref(),
            ResourceKind::KeyPair => self.delete_key_pair.as_deref(),
            ResourceKind::ClusterRole => self.delete_cluster_role.as_deref(),
            ResourceKind::Network => self.delete_network.as_deref(),
            ResourceKind::Cluster => self.delete_cluster.as_deref(),
        }
    }
}

/// Create/delete/log/aggregate commands for one component (node group or add-on).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentCommands {
    pub create: Option<String>,
    pub delete: Option<String>,
    pub logs: Option<String>,
    pub aggregate: Option<String>,
}

/// Image family of a node group. GPU families trigger driver bootstrap.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ImageFamily {
    #[default]
    #[serde(rename = "al2-x86_64")]
    Al2X86_64,
    #[serde(rename = "al2-x86_64-gpu")]
    Al2X86_64Gpu,
    #[serde(rename = "al2-arm64")]
    Al2Arm64,
    #[serde(rename = "bottlerocket")]
    Bottlerocket,
}

impl ImageFamily {
    pub fn requires_gpu_drivers(self) -> bool {
        matches!(self, ImageFamily::Al2X86_64Gpu)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NodeGroupSpec {
    pub name: String,
    #[serde(default)]
    pub image_family: ImageFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_nodes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NodeGroupSection {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub fetch_logs: bool,
    #[serde(default)]
    pub groups: Vec<NodeGroupSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
}

impl NodeGroupSection {
    pub fn commands(&self) -> ComponentCommands {
        ComponentCommands {
            create: self.create.clone(),
            delete: self.delete.clone(),
            logs: self.logs.clone(),
            aggregate: self.aggregate.clone(),
        }
    }

    pub fn requires_gpu_drivers(&self) -> bool {
        self.enable
            && self
                .groups
                .iter()
                .any(|g| g.image_family.requires_gpu_drivers())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AddOnConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub fetch_logs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
}

impl AddOnConfig {
    pub fn commands(&self) -> ComponentCommands {
        ComponentCommands {
            create: self.create.clone(),
            delete: self.delete.clone(),
            logs: self.logs.clone(),
            aggregate: self.aggregate.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HooksSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_create_cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_create_cluster_output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_create_add_ons: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_create_add_ons_output: Option<PathBuf>,
    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,
}

impl Default for HooksSection {
    fn default() -> Self {
        Self {
            after_create_cluster: None,
            after_create_cluster_output: None,
            after_create_add_ons: None,
            after_create_add_ons_output: None,
            timeout_secs: default_hook_timeout(),
        }
    }
}

impl HooksSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OnFailureSection {
    #[serde(default = "default_true")]
    pub delete: bool,
    #[serde(default = "default_on_failure_wait")]
    pub delete_wait_secs: u64,
}

impl Default for OnFailureSection {
    fn default() -> Self {
        Self {
            delete: true,
            delete_wait_secs: default_on_failure_wait(),
        }
    }
}

/// Settle delays and health polling, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Timings {
    pub post_create_settle_secs: u64,
    pub add_on_settle_secs: u64,
    pub light_add_on_settle_secs: u64,
    pub load_balancer_settle_secs: u64,
    pub load_balancer_network_settle_secs: u64,
    pub node_group_settle_secs: u64,
    pub network_settle_secs: u64,
    pub fetch_logs_settle_secs: u64,
    pub health_attempts: u32,
    pub health_interval_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            post_create_settle_secs: 30,
            add_on_settle_secs: 20,
            light_add_on_settle_secs: 5,
            load_balancer_settle_secs: 60,
            load_balancer_network_settle_secs: 120,
            node_group_settle_secs: 10,
            network_settle_secs: 30,
            fetch_logs_settle_secs: 15,
            health_attempts: 3,
            health_interval_secs: 10,
        }
    }
}

impl Timings {
    /// All delays zeroed and a single health attempt. Used for dry runs and tests.
    pub fn immediate() -> Self {
        Self {
            post_create_settle_secs: 0,
            add_on_settle_secs: 0,
            light_add_on_settle_secs: 0,
            load_balancer_settle_secs: 0,
            load_balancer_network_settle_secs: 0,
            node_group_settle_secs: 0,
            network_settle_secs: 0,
            fetch_logs_settle_secs: 0,
            health_attempts: 1,
            health_interval_secs: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_provider_kind() -> String {
    "command".to_owned()
}

fn default_command_timeout() -> u64 {
    1800
}

fn default_hook_timeout() -> u64 {
    300
}

fn default_on_failure_wait() -> u64 {
    120
}

impl EnvironmentConfig {
    /// A minimal config with every add-on disabled, used by `kubetester init`.
    pub fn template(name: &str, region: &str) -> Self {
        Self {
            config_version: CONFIG_VERSION,
            name: name.to_owned(),
            region: region.to_owned(),
            kubeconfig: None,
            provider: ProviderSection::default(),
            prerequisites: PrerequisitesSection::default(),
            node_groups: NodeGroupSection {
                enable: true,
                fetch_logs: false,
                groups: vec![NodeGroupSpec {
                    name: format!("{name}-ng"),
                    image_family: ImageFamily::default(),
                    desired_nodes: Some(2),
                }],
                ..NodeGroupSection::default()
            },
            managed_node_groups: NodeGroupSection::default(),
            add_ons: BTreeMap::new(),
            hooks: HooksSection::default(),
            on_failure: OnFailureSection::default(),
            timings: Timings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }
        if self.name.is_empty()
            || self.name.len() > 100
            || !self
                .name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::EmptyRegion);
        }

        for (key, add_on) in &self.add_ons {
            key.parse::<AddOnKind>().map_err(ConfigError::UnknownAddOn)?;
            if add_on
                .namespace
                .as_deref()
                .is_some_and(|ns| ns.trim().is_empty())
            {
                return Err(ConfigError::EmptyNamespace(key.clone()));
            }
        }

        let mut seen = BTreeSet::new();
        for group in self
            .node_groups
            .groups
            .iter()
            .chain(&self.managed_node_groups.groups)
        {
            if !seen.insert(group.name.as_str()) {
                return Err(ConfigError::DuplicateNodeGroup(group.name.clone()));
            }
        }

        if self.hooks.after_create_cluster.is_some() && self.hooks.after_create_cluster_output.is_none()
        {
            return Err(ConfigError::MissingHookOutput("after_create_cluster"));
        }
        if self.hooks.after_create_add_ons.is_some() && self.hooks.after_create_add_ons_output.is_none()
        {
            return Err(ConfigError::MissingHookOutput("after_create_add_ons"));
        }
        Ok(())
    }

    pub fn add_on(&self, kind: AddOnKind) -> Option<&AddOnConfig> {
        self.add_ons.get(kind.as_str())
    }

    pub fn add_on_enabled(&self, kind: AddOnKind) -> bool {
        self.add_on(kind).is_some_and(|a| a.enable)
    }

    pub fn node_group(&self, kind: NodeGroupKind) -> &NodeGroupSection {
        match kind {
            NodeGroupKind::Unmanaged => &self.node_groups,
            NodeGroupKind::Managed => &self.managed_node_groups,
        }
    }

    pub fn any_node_group_enabled(&self) -> bool {
        self.node_groups.enable || self.managed_node_groups.enable
    }

    pub fn requires_gpu_drivers(&self) -> bool {
        self.node_groups.requires_gpu_drivers() || self.managed_node_groups.requires_gpu_drivers()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn parse_config_str(input: &str) -> Result<EnvironmentConfig, ConfigError> {
    Ok(toml::from_str(input)?)
}

/// Parse and validate a config file.
pub fn load_config_file(path: impl AsRef<Path>) -> Result<EnvironmentConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config_str(&content)?;
    config.validate()?;
    Ok(config)
}
