use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prerequisite infrastructure created before any node group or add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    EncryptionKey,
    KeyPair,
    ClusterRole,
    Network,
    Cluster,
}

impl ResourceKind {
    /// Creation order. Never reorder: each step may depend on the ones before it.
    pub const CREATION_ORDER: [ResourceKind; 6] = [
        ResourceKind::Bucket,
        ResourceKind::EncryptionKey,
        ResourceKind::KeyPair,
        ResourceKind::ClusterRole,
        ResourceKind::Network,
        ResourceKind::Cluster,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::EncryptionKey => "encryption_key",
            ResourceKind::KeyPair => "key_pair",
            ResourceKind::ClusterRole => "cluster_role",
            ResourceKind::Network => "network",
            ResourceKind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeGroupKind {
    Unmanaged,
    Managed,
}

impl NodeGroupKind {
    pub const CREATION_ORDER: [NodeGroupKind; 2] = [NodeGroupKind::Unmanaged, NodeGroupKind::Managed];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeGroupKind::Unmanaged => "unmanaged",
            NodeGroupKind::Managed => "managed",
        }
    }
}

impl fmt::Display for NodeGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_group:{}", self.as_str())
    }
}

macro_rules! add_on_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Every optional capability that can be installed onto the environment.
        ///
        /// Variants are declared in creation order; [`AddOnKind::ALL`] preserves it.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum AddOnKind {
            $($variant),+
        }

        impl AddOnKind {
            pub const ALL: &'static [AddOnKind] = &[$(AddOnKind::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(AddOnKind::$variant => $name),+
                }
            }
        }

        impl FromStr for AddOnKind {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(AddOnKind::$variant),)+
                    other => Err(other.to_owned()),
                }
            }
        }
    };
}

add_on_kinds! {
    Conformance => "conformance",
    CsiEbs => "csi_ebs",
    AppMesh => "app_mesh",
    KubernetesDashboard => "kubernetes_dashboard",
    PrometheusGrafana => "prometheus_grafana",
    NlbHelloWorld => "nlb_hello_world",
    Alb2048 => "alb_2048",
    JobsPi => "jobs_pi",
    JobsEcho => "jobs_echo",
    CronJobs => "cron_jobs",
    CsrsLocal => "csrs_local",
    CsrsRemote => "csrs_remote",
    ConfigMapsLocal => "config_maps_local",
    ConfigMapsRemote => "config_maps_remote",
    SecretsLocal => "secrets_local",
    SecretsRemote => "secrets_remote",
    Fargate => "fargate",
    Irsa => "irsa",
    IrsaFargate => "irsa_fargate",
    Wordpress => "wordpress",
    JupyterHub => "jupyter_hub",
    Kubeflow => "kubeflow",
    HollowNodesLocal => "hollow_nodes_local",
    HollowNodesRemote => "hollow_nodes_remote",
    ClusterLoaderLocal => "cluster_loader_local",
    ClusterLoaderRemote => "cluster_loader_remote",
    StresserLocal => "stresser_local",
    StresserRemote => "stresser_remote",
}

impl fmt::Display for AddOnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "add_on:{}", self.as_str())
    }
}
