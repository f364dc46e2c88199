//! Desired cluster state and runtime identity read by the assembler.
//!
//! Everything here deserializes from the camelCase YAML a CephCluster spec
//! uses, with every field optional.
use k8s_openapi::api::core::v1::{Probe, ResourceRequirements};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use crate::{placement::Placement, resource::OwnerInfo};

type Map = BTreeMap<String, String>;

/// Key for settings that apply to every daemon
pub const KEY_ALL: &str = "all";
/// Key for manager daemon settings
pub const KEY_MGR: &str = "mgr";
/// Key for the manager's watch-active sidecar resources
pub const KEY_MGR_SIDECAR: &str = "mgr-sidecar";

/// Port the dashboard listens on with TLS
pub const DEFAULT_DASHBOARD_SSL_PORT: i32 = 8443;
/// Port the dashboard listens on without TLS
pub const DEFAULT_DASHBOARD_PORT: i32 = 7000;

/// Immutable snapshot of the desired cluster state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSpec {
    /// Ceph image to run
    pub ceph_version: CephVersionSpec,
    /// Host directory where daemons persist config, logs and crash dumps
    pub data_dir_host_path: String,
    /// Manager daemon settings
    pub mgr: MgrSpec,
    /// Monitor settings, only stretch mode is read here
    pub mon: MonSpec,
    /// Pod networking
    pub network: NetworkSpec,
    /// Dashboard module settings
    pub dashboard: DashboardSpec,
    /// Prometheus integration settings
    pub monitoring: MonitoringSpec,
    /// Log rotation sidecar settings
    pub log_collector: LogCollectorSpec,
    /// Probe settings per daemon role
    pub health_check: HealthCheckSpec,
    /// Scheduling placement keyed by role (`all`, `mgr`)
    pub placement: BTreeMap<String, Placement>,
    /// Pod annotations keyed by role (`all`, `mgr`)
    pub annotations: BTreeMap<String, Map>,
    /// Pod labels keyed by role (`all`, `mgr`)
    pub labels: BTreeMap<String, Map>,
    /// Compute resources keyed by role (`mgr`, `mgr-sidecar`)
    pub resources: BTreeMap<String, ResourceRequirements>,
    /// Priority class names keyed by role (`all`, `mgr`)
    pub priority_class_names: BTreeMap<String, String>,
    /// Settings the operator process supplies
    pub operator: OperatorSettings,
}

impl ClusterSpec {
    /// Whether pods share the node's network namespace
    pub fn is_host_network(&self) -> bool {
        self.network.host_network || self.network.provider == NetworkProvider::Host
    }

    /// Whether pods attach to extra networks through multus
    pub fn is_multus(&self) -> bool {
        self.network.provider == NetworkProvider::Multus
    }

    /// Whether the cluster spans several failure domains
    pub fn is_stretch_cluster(&self) -> bool {
        self.mon.stretch_cluster.is_some()
    }

    /// Node label the stretch cluster's failure domains are keyed on
    pub fn stretch_failure_domain_label(&self) -> &str {
        self.mon
            .stretch_cluster
            .as_ref()
            .map(|s| s.failure_domain_label.as_str())
            .filter(|label| !label.is_empty())
            .unwrap_or(ZONE_LABEL)
    }

    /// `all` placement with the `mgr` placement merged over it
    pub fn mgr_placement(&self) -> Placement {
        let all = self.placement.get(KEY_ALL).cloned().unwrap_or_default();
        match self.placement.get(KEY_MGR) {
            Some(mgr) => all.merge(mgr),
            None => all,
        }
    }

    /// `all` annotations with the `mgr` annotations merged over them
    pub fn mgr_annotations(&self) -> Map {
        merge_role_map(&self.annotations, KEY_MGR)
    }

    /// `all` labels with the `mgr` labels merged over them
    pub fn mgr_labels(&self) -> Map {
        merge_role_map(&self.labels, KEY_MGR)
    }

    /// Resources for the manager daemon container
    pub fn mgr_resources(&self) -> Option<ResourceRequirements> {
        self.resources.get(KEY_MGR).cloned()
    }

    /// Resources for the watch-active sidecar
    pub fn mgr_sidecar_resources(&self) -> Option<ResourceRequirements> {
        self.resources.get(KEY_MGR_SIDECAR).cloned()
    }

    /// Priority class for manager pods, falling back to the `all` entry
    pub fn mgr_priority_class_name(&self) -> Option<String> {
        self.priority_class_names
            .get(KEY_MGR)
            .or_else(|| self.priority_class_names.get(KEY_ALL))
            .filter(|name| !name.is_empty())
            .cloned()
    }

    /// Port the dashboard is served on
    pub fn dashboard_port(&self) -> i32 {
        match self.dashboard.port {
            port if port > 0 => port,
            _ if self.dashboard.ssl => DEFAULT_DASHBOARD_SSL_PORT,
            _ => DEFAULT_DASHBOARD_PORT,
        }
    }
}

const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

fn merge_role_map(by_role: &BTreeMap<String, Map>, role: &str) -> Map {
    let mut merged = by_role.get(KEY_ALL).cloned().unwrap_or_default();
    if let Some(overrides) = by_role.get(role) {
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Ceph image selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CephVersionSpec {
    /// Container image reference
    pub image: String,
}

/// Manager daemon settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MgrSpec {
    /// Number of manager daemons, each its own deployment
    pub count: i32,
    /// Soften the one-manager-per-node anti-affinity
    pub allow_multiple_per_node: bool,
}

/// Monitor settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonSpec {
    /// Present when the cluster is stretched across failure domains
    pub stretch_cluster: Option<StretchClusterSpec>,
}

/// Stretch cluster topology
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StretchClusterSpec {
    /// Node label naming the failure domain; defaults to the zone label
    pub failure_domain_label: String,
}

/// How pods are networked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProvider {
    /// The platform's overlay network
    #[default]
    #[serde(rename = "")]
    Default,
    /// The node's network namespace
    Host,
    /// Overlay plus additional multus attachments
    Multus,
}

/// Pod networking
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkSpec {
    /// Network provider
    pub provider: NetworkProvider,
    /// Legacy switch for host networking
    pub host_network: bool,
    /// Multus network attachments keyed by `public` / `cluster`
    pub selectors: Map,
}

/// Dashboard module settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSpec {
    /// Whether the dashboard module runs
    pub enabled: bool,
    /// Serve the dashboard over TLS
    pub ssl: bool,
    /// Explicit port, zero picks the default for the TLS mode
    pub port: i32,
}

/// Prometheus integration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringSpec {
    /// Whether monitoring resources are managed
    pub enabled: bool,
}

/// Log rotation sidecar
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogCollectorSpec {
    /// Whether the sidecar runs next to every daemon
    pub enabled: bool,
    /// `hourly`, `daily`, `weekly` or `monthly`; empty means daily
    pub periodicity: String,
}

/// Probe settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckSpec {
    /// Liveness probe overrides keyed by role
    pub liveness_probe: BTreeMap<String, ProbeSpec>,
}

/// A per-role probe override
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeSpec {
    /// Remove the probe entirely
    pub disabled: bool,
    /// Replacement handler and timings
    pub probe: Option<Probe>,
}

/// Inputs the operator process supplies alongside the cluster spec
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorSettings {
    /// Namespace the operator runs in
    pub namespace: String,
    /// Operator image, also used for the watch-active sidecar
    pub image: String,
    /// Operator build version stamped on every deployment
    pub version: String,
    /// Name of the PrometheusRule the orchestrator module manages
    pub prometheus_rule: String,
    /// Grace period for pods on unreachable nodes
    pub unreachable_node_toleration_seconds: i64,
    /// Host path mounts need privileged containers (e.g. SELinux hosts)
    pub hostpath_requires_privileged: bool,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            namespace: "rook-ceph".into(),
            image: "rook/ceph:master".into(),
            version: "master".into(),
            prometheus_rule: String::new(),
            unreachable_node_toleration_seconds: 5,
            hostpath_requires_privileged: false,
        }
    }
}

/// Version of the resolved ceph image
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct CephVersion {
    /// Major release, 16 is Pacific
    pub major: u32,
    /// Minor release
    pub minor: u32,
    /// Patch release
    pub extra: u32,
    /// Downstream build number
    pub build: u32,
}

impl CephVersion {
    /// Pacific, the first release reporting extended mgr stats
    pub const PACIFIC: CephVersion = CephVersion {
        major: 16,
        minor: 0,
        extra: 0,
        build: 0,
    };

    /// Whether this is Pacific or newer
    pub fn is_at_least_pacific(&self) -> bool {
        self.major >= Self::PACIFIC.major
    }
}

impl fmt::Display for CephVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}-{}", self.major, self.minor, self.extra, self.build)
    }
}

/// Identity of the running cluster, resolved by the reconciler
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterInfo {
    /// Namespace all manager descriptors live in
    pub namespace: String,
    /// Name of the CephCluster resource
    pub name: String,
    /// Cluster fsid passed to every daemon
    pub fsid: String,
    /// Version of the ceph image
    pub ceph_version: CephVersion,
    /// Parent resource descriptors are owned by
    pub owner: OwnerInfo,
}
