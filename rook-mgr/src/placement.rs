//! Scheduling constraints applied to manager pods.
use k8s_openapi::{
    api::core::v1::{
        Affinity, NodeAffinity, PodAffinity, PodAffinityTerm, PodAntiAffinity, PodSpec, Toleration,
        TopologySpreadConstraint, WeightedPodAffinityTerm,
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node label identifying a single host
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
/// Taint placed on nodes the control plane cannot reach
pub const UNREACHABLE_NODE_TAINT: &str = "node.kubernetes.io/unreachable";

const PREFERRED_ANTI_AFFINITY_WEIGHT: i32 = 50;

/// User supplied scheduling constraints for a daemon role
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Placement {
    /// Node affinity
    pub node_affinity: Option<NodeAffinity>,
    /// Pod affinity
    pub pod_affinity: Option<PodAffinity>,
    /// Pod anti-affinity
    pub pod_anti_affinity: Option<PodAntiAffinity>,
    /// Tolerations
    pub tolerations: Vec<Toleration>,
    /// Topology spread constraints
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
}

impl Placement {
    /// Layer `other` over `self`
    ///
    /// Affinities and spread constraints are replaced when `other` sets them,
    /// tolerations accumulate.
    pub fn merge(&self, other: &Placement) -> Placement {
        let mut merged = self.clone();
        if other.node_affinity.is_some() {
            merged.node_affinity = other.node_affinity.clone();
        }
        if other.pod_affinity.is_some() {
            merged.pod_affinity = other.pod_affinity.clone();
        }
        if other.pod_anti_affinity.is_some() {
            merged.pod_anti_affinity = other.pod_anti_affinity.clone();
        }
        if !other.topology_spread_constraints.is_empty() {
            merged.topology_spread_constraints = other.topology_spread_constraints.clone();
        }
        merged.tolerations.extend(other.tolerations.iter().cloned());
        merged
    }

    /// Write the constraints onto a pod spec
    pub fn apply_to_pod_spec(&self, spec: &mut PodSpec) {
        if self.node_affinity.is_some() || self.pod_affinity.is_some() || self.pod_anti_affinity.is_some() {
            let affinity = spec.affinity.get_or_insert_with(Affinity::default);
            if self.node_affinity.is_some() {
                affinity.node_affinity = self.node_affinity.clone();
            }
            if self.pod_affinity.is_some() {
                affinity.pod_affinity = self.pod_affinity.clone();
            }
            if self.pod_anti_affinity.is_some() {
                affinity.pod_anti_affinity = self.pod_anti_affinity.clone();
            }
        }
        if !self.tolerations.is_empty() {
            spec.tolerations = Some(self.tolerations.clone());
        }
        if !self.topology_spread_constraints.is_empty() {
            spec.topology_spread_constraints = Some(self.topology_spread_constraints.clone());
        }
    }
}

/// Keep pods matching `match_labels` out of each other's failure domain
///
/// A required term blocks scheduling when every domain is taken; a preferred
/// term only scores against it.
pub fn set_pod_anti_affinity(
    spec: &mut PodSpec,
    required: bool,
    topology_key: &str,
    match_labels: BTreeMap<String, String>,
) {
    let term = PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_labels: Some(match_labels),
            match_expressions: None,
        }),
        topology_key: topology_key.to_string(),
        ..PodAffinityTerm::default()
    };
    let anti_affinity = spec
        .affinity
        .get_or_insert_with(Affinity::default)
        .pod_anti_affinity
        .get_or_insert_with(PodAntiAffinity::default);
    if required {
        anti_affinity
            .required_during_scheduling_ignored_during_execution
            .get_or_insert_with(Vec::new)
            .push(term);
    } else {
        anti_affinity
            .preferred_during_scheduling_ignored_during_execution
            .get_or_insert_with(Vec::new)
            .push(WeightedPodAffinityTerm {
                pod_affinity_term: term,
                weight: PREFERRED_ANTI_AFFINITY_WEIGHT,
            });
    }
}

/// Shorten how long pods stay bound to an unreachable node
///
/// The platform otherwise injects a 300 second toleration. A toleration the
/// user configured for the taint is left alone.
pub fn add_unreachable_node_toleration(spec: &mut PodSpec, seconds: i64) {
    let tolerations = spec.tolerations.get_or_insert_with(Vec::new);
    if tolerations
        .iter()
        .any(|t| t.key.as_deref() == Some(UNREACHABLE_NODE_TAINT))
    {
        return;
    }
    tolerations.push(Toleration {
        key: Some(UNREACHABLE_NODE_TAINT.into()),
        operator: Some("Exists".into()),
        effect: Some("NoExecute".into()),
        toleration_seconds: Some(seconds),
        value: None,
    });
}
