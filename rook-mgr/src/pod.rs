//! Pod template composition for manager daemons.
//!
//! The template starts from the fixed containers and volumes, then runs
//! through [`POD_PIPELINE`]. Every step checks its own precondition, so each
//! policy can be exercised on its own.
use k8s_openapi::{
    api::core::v1::{PodSpec, PodTemplateSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use std::collections::BTreeMap;

use crate::{
    assembler::MgrAssembler,
    config::{daemon_volumes, MgrConfig, APP_NAME, DEFAULT_METRICS_PORT},
    labels::{self, app_labels},
    network::apply_multus,
    placement::{add_unreachable_node_toleration, set_pod_anti_affinity, HOSTNAME_LABEL},
    Result,
};

/// Service account manager pods run as
pub const SERVICE_ACCOUNT_NAME: &str = "rook-ceph-mgr";

/// A single transformation of the pod template
pub type PodStep = fn(&MgrAssembler<'_>, &MgrConfig, &mut PodTemplateSpec) -> Result<()>;

/// Steps applied to every manager pod template, in order
///
/// User annotations and labels come last so they win over anything the
/// earlier steps set.
pub const POD_PIPELINE: &[(&str, PodStep)] = &[
    ("placement", apply_placement),
    ("standby-managers", spread_standby_managers),
    ("log-collector", add_log_collector),
    ("unreachable-toleration", shorten_unreachable_toleration),
    ("network", apply_network),
    ("prometheus-annotations", apply_prometheus_annotations),
    ("user-annotations", apply_user_annotations),
    ("user-labels", apply_user_labels),
];

fn spec_mut(template: &mut PodTemplateSpec) -> &mut PodSpec {
    template.spec.get_or_insert_with(PodSpec::default)
}

/// Merged `all`/`mgr` placement
pub fn apply_placement(a: &MgrAssembler<'_>, _: &MgrConfig, template: &mut PodTemplateSpec) -> Result<()> {
    a.spec.mgr_placement().apply_to_pod_spec(spec_mut(template));
    Ok(())
}

/// With standby managers, run the watch-active sidecar and keep managers apart
///
/// Managers spread across hosts, or across the stretch failure domain. The
/// rule is only preferred when several managers may share a node.
pub fn spread_standby_managers(
    a: &MgrAssembler<'_>,
    config: &MgrConfig,
    template: &mut PodTemplateSpec,
) -> Result<()> {
    if !a.has_standby_managers() {
        return Ok(());
    }
    let sidecar = a.sidecar_container(config);
    let spec = spec_mut(template);
    spec.containers.push(sidecar);

    let topology_key = if a.spec.is_stretch_cluster() {
        a.spec.stretch_failure_domain_label()
    } else {
        HOSTNAME_LABEL
    };
    set_pod_anti_affinity(
        spec,
        !a.spec.mgr.allow_multiple_per_node,
        topology_key,
        app_labels(APP_NAME, &a.info.namespace),
    );
    Ok(())
}

/// Log rotation sidecar; it needs to see the daemon's processes
pub fn add_log_collector(
    a: &MgrAssembler<'_>,
    config: &MgrConfig,
    template: &mut PodTemplateSpec,
) -> Result<()> {
    if !a.spec.log_collector.enabled {
        return Ok(());
    }
    let collector = a.log_collector_container(config);
    let spec = spec_mut(template);
    spec.share_process_namespace = Some(true);
    spec.containers.push(collector);
    Ok(())
}

/// Fail over quickly when the node hosting the manager goes away
pub fn shorten_unreachable_toleration(
    a: &MgrAssembler<'_>,
    _: &MgrConfig,
    template: &mut PodTemplateSpec,
) -> Result<()> {
    add_unreachable_node_toleration(spec_mut(template), a.spec.operator.unreachable_node_toleration_seconds);
    Ok(())
}

/// Host networking DNS policy, or multus attachments
///
/// Multus is ignored on the host network: the pod already has every
/// interface of the node.
pub fn apply_network(a: &MgrAssembler<'_>, _: &MgrConfig, template: &mut PodTemplateSpec) -> Result<()> {
    if a.spec.is_host_network() {
        spec_mut(template).dns_policy = Some("ClusterFirstWithHostNet".into());
    } else if a.spec.is_multus() {
        let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
        apply_multus(&a.spec.network, &a.info.namespace, meta)?;
    }
    Ok(())
}

/// Scrape annotations, only when the user supplied no manager annotations
pub fn apply_prometheus_annotations(
    a: &MgrAssembler<'_>,
    _: &MgrConfig,
    template: &mut PodTemplateSpec,
) -> Result<()> {
    if !a.spec.mgr_annotations().is_empty() {
        return Ok(());
    }
    let annotations: BTreeMap<String, String> = [
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), DEFAULT_METRICS_PORT.to_string()),
    ]
    .into();
    labels::apply_annotations(template.metadata.get_or_insert_with(ObjectMeta::default), &annotations);
    Ok(())
}

/// User supplied manager annotations
pub fn apply_user_annotations(
    a: &MgrAssembler<'_>,
    _: &MgrConfig,
    template: &mut PodTemplateSpec,
) -> Result<()> {
    labels::apply_annotations(
        template.metadata.get_or_insert_with(ObjectMeta::default),
        &a.spec.mgr_annotations(),
    );
    Ok(())
}

/// User supplied manager labels
pub fn apply_user_labels(a: &MgrAssembler<'_>, _: &MgrConfig, template: &mut PodTemplateSpec) -> Result<()> {
    labels::apply_labels(
        template.metadata.get_or_insert_with(ObjectMeta::default),
        &a.spec.mgr_labels(),
    );
    Ok(())
}

impl MgrAssembler<'_> {
    /// Template with the fixed containers, volumes and pod settings
    pub fn base_pod_template(&self, config: &MgrConfig) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: Some(config.resource_name.clone()),
                labels: Some(self.pod_labels(&config.daemon_id, true)),
                ..ObjectMeta::default()
            }),
            spec: Some(PodSpec {
                init_containers: Some(vec![self.init_container(config)]),
                containers: vec![self.daemon_container(config)],
                service_account_name: Some(SERVICE_ACCOUNT_NAME.into()),
                restart_policy: Some("Always".into()),
                volumes: Some(daemon_volumes(&config.data_path_map, &config.resource_name)),
                host_network: Some(self.spec.is_host_network()),
                priority_class_name: self.spec.mgr_priority_class_name(),
                ..PodSpec::default()
            }),
        }
    }

    /// The full pod template for one manager
    ///
    /// Fails only when the multus selectors are malformed.
    pub fn pod_template(&self, config: &MgrConfig) -> Result<PodTemplateSpec> {
        let mut template = self.base_pod_template(config);
        for (step, apply) in POD_PIPELINE {
            tracing::trace!(step, daemon = %config.daemon_id, "applying pod template step");
            apply(self, config, &mut template)?;
        }
        Ok(template)
    }
}
