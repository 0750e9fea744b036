//! Static add-on descriptors and their materialized handles.
//!
//! Every add-on is described once in [`DESCRIPTORS`]: its position in the
//! creation order, whether it must exist before cluster-wide health checks,
//! and how long its cloud-side cleanup takes to settle. Provisioning walks the
//! table forward and teardown walks it backward, so adding an add-on never
//! requires touching the saga code.

use crate::CoreError;
use kubetester_config::{AddOnKind, EnvironmentConfig, NodeGroupKind, Timings};
use kubetester_provider::{AddOn, Provider};
use kubetester_store::StateDocument;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// When an add-on is installed relative to the mid-provisioning health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Cluster infrastructure (storage drivers, mesh, monitoring).
    Cluster,
    /// Test workloads.
    Workload,
}

/// Cleanup latency class, mapped to a settle delay by [`Timings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    Light,
    Heavy,
    /// Provisions a cloud load balancer that must be released before the
    /// network can be deleted.
    LoadBalancer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOnDescriptor {
    pub kind: AddOnKind,
    pub tier: Tier,
    pub cleanup: Cleanup,
}

impl AddOnDescriptor {
    const fn new(kind: AddOnKind, tier: Tier, cleanup: Cleanup) -> Self {
        Self {
            kind,
            tier,
            cleanup,
        }
    }

    pub fn provisions_load_balancer(&self) -> bool {
        self.cleanup == Cleanup::LoadBalancer
    }
}

use Cleanup::{Heavy, Light, LoadBalancer};
use Tier::{Cluster, Workload};

/// All add-ons in creation order. Teardown uses the reverse.
pub static DESCRIPTORS: [AddOnDescriptor; 28] = [
    AddOnDescriptor::new(AddOnKind::Conformance, Cluster, Heavy),
    AddOnDescriptor::new(AddOnKind::CsiEbs, Cluster, Heavy),
    AddOnDescriptor::new(AddOnKind::AppMesh, Cluster, Light),
    AddOnDescriptor::new(AddOnKind::KubernetesDashboard, Cluster, Light),
    AddOnDescriptor::new(AddOnKind::PrometheusGrafana, Cluster, Heavy),
    AddOnDescriptor::new(AddOnKind::NlbHelloWorld, Workload, LoadBalancer),
    AddOnDescriptor::new(AddOnKind::Alb2048, Workload, LoadBalancer),
    AddOnDescriptor::new(AddOnKind::JobsPi, Workload, Light),
    AddOnDescriptor::new(AddOnKind::JobsEcho, Workload, Light),
    AddOnDescriptor::new(AddOnKind::CronJobs, Workload, Light),
    AddOnDescriptor::new(AddOnKind::CsrsLocal, Workload, Light),
    AddOnDescriptor::new(AddOnKind::CsrsRemote, Workload, Light),
    AddOnDescriptor::new(AddOnKind::ConfigMapsLocal, Workload, Light),
    AddOnDescriptor::new(AddOnKind::ConfigMapsRemote, Workload, Light),
    AddOnDescriptor::new(AddOnKind::SecretsLocal, Workload, Light),
    AddOnDescriptor::new(AddOnKind::SecretsRemote, Workload, Light),
    AddOnDescriptor::new(AddOnKind::Fargate, Workload, Light),
    AddOnDescriptor::new(AddOnKind::Irsa, Workload, Light),
    AddOnDescriptor::new(AddOnKind::IrsaFargate, Workload, Light),
    AddOnDescriptor::new(AddOnKind::Wordpress, Workload, Heavy),
    AddOnDescriptor::new(AddOnKind::JupyterHub, Workload, Heavy),
    AddOnDescriptor::new(AddOnKind::Kubeflow, Workload, Light),
    AddOnDescriptor::new(AddOnKind::HollowNodesLocal, Workload, Light),
    AddOnDescriptor::new(AddOnKind::HollowNodesRemote, Workload, Light),
    AddOnDescriptor::new(AddOnKind::ClusterLoaderLocal, Workload, Heavy),
    AddOnDescriptor::new(AddOnKind::ClusterLoaderRemote, Workload, Heavy),
    AddOnDescriptor::new(AddOnKind::StresserLocal, Workload, Heavy),
    AddOnDescriptor::new(AddOnKind::StresserRemote, Workload, Heavy),
];

fn require<'a>(handle: Option<&'a Arc<dyn AddOn>>, label: &str) -> Result<&'a dyn AddOn, CoreError> {
    handle
        .map(|h| &**h)
        .ok_or_else(|| CoreError::MissingHandle(label.to_owned()))
}

pub struct AddOnEntry {
    pub descriptor: AddOnDescriptor,
    pub enabled: bool,
    handle: Option<Arc<dyn AddOn>>,
}

impl AddOnEntry {
    pub fn kind(&self) -> AddOnKind {
        self.descriptor.kind
    }

    pub fn handle(&self) -> Result<&dyn AddOn, CoreError> {
        require(self.handle.as_ref(), &self.descriptor.kind.to_string())
    }
}

pub struct NodeGroupEntry {
    pub kind: NodeGroupKind,
    pub enabled: bool,
    handle: Option<Arc<dyn AddOn>>,
}

impl NodeGroupEntry {
    pub fn handle(&self) -> Result<&dyn AddOn, CoreError> {
        require(self.handle.as_ref(), &self.kind.to_string())
    }
}

/// Handles for every component the current config enables or the state
/// document still records as created.
pub struct Registry {
    add_ons: Vec<AddOnEntry>,
    node_groups: Vec<NodeGroupEntry>,
}

impl Registry {
    pub fn materialize(
        config: &EnvironmentConfig,
        state: &StateDocument,
        provider: &dyn Provider,
    ) -> Self {
        let add_ons = DESCRIPTORS
            .iter()
            .filter_map(|d| {
                let enabled = config.add_on_enabled(d.kind);
                if !enabled && !state.add_on_created(d.kind) {
                    return None;
                }
                Some(AddOnEntry {
                    descriptor: *d,
                    enabled,
                    handle: provider.add_on(d.kind),
                })
            })
            .collect();

        let node_groups = NodeGroupKind::CREATION_ORDER
            .into_iter()
            .map(|kind| {
                let enabled = config.node_group(kind).enable;
                let wanted = enabled || state.node_group_created(kind);
                NodeGroupEntry {
                    kind,
                    enabled,
                    handle: if wanted { provider.node_group(kind) } else { None },
                }
            })
            .collect();

        Self {
            add_ons,
            node_groups,
        }
    }

    /// Materialized add-ons in creation order.
    pub fn add_ons(&self) -> &[AddOnEntry] {
        &self.add_ons
    }

    pub fn add_on(&self, kind: AddOnKind) -> Option<&AddOnEntry> {
        self.add_ons.iter().find(|e| e.kind() == kind)
    }

    /// Enabled add-ons of one tier, in creation order.
    pub fn enabled_in(&self, tier: Tier) -> impl Iterator<Item = &AddOnEntry> {
        self.add_ons
            .iter()
            .filter(move |e| e.enabled && e.descriptor.tier == tier)
    }

    pub fn node_group(&self, kind: NodeGroupKind) -> &NodeGroupEntry {
        match kind {
            NodeGroupKind::Unmanaged => &self.node_groups[0],
            NodeGroupKind::Managed => &self.node_groups[1],
        }
    }
}

/// Why the saga is pausing. Each reason maps to a configured delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleReason {
    PostCreate,
    AddOnCleanup { kind: AddOnKind, class: Cleanup },
    LoadBalancerNetwork,
    NodeGroupDrain(NodeGroupKind),
    NetworkRelease,
    LogFetch,
    CompensationCooldown,
}

impl SettleReason {
    pub fn duration(self, config: &EnvironmentConfig) -> Duration {
        let t: &Timings = &config.timings;
        let secs = match self {
            SettleReason::PostCreate => t.post_create_settle_secs,
            SettleReason::AddOnCleanup { class, .. } => match class {
                Light => t.light_add_on_settle_secs,
                Heavy => t.add_on_settle_secs,
                LoadBalancer => t.load_balancer_settle_secs,
            },
            SettleReason::LoadBalancerNetwork => t.load_balancer_network_settle_secs,
            SettleReason::NodeGroupDrain(_) => t.node_group_settle_secs,
            SettleReason::NetworkRelease => t.network_settle_secs,
            SettleReason::LogFetch => t.fetch_logs_settle_secs,
            SettleReason::CompensationCooldown => config.on_failure.delete_wait_secs,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for SettleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettleReason::PostCreate => f.write_str("cluster post-create"),
            SettleReason::AddOnCleanup { kind, .. } => write!(f, "{kind} cleanup"),
            SettleReason::LoadBalancerNetwork => f.write_str("load balancer release"),
            SettleReason::NodeGroupDrain(kind) => write!(f, "{kind} drain"),
            SettleReason::NetworkRelease => f.write_str("network release"),
            SettleReason::LogFetch => f.write_str("log collection"),
            SettleReason::CompensationCooldown => f.write_str("compensation cool-down"),
        }
    }
}
