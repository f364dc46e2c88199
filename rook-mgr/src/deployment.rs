use k8s_openapi::{
    api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy},
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};

use crate::{
    assembler::MgrAssembler,
    config::MgrConfig,
    labels::{self, sanitize_label_value, CEPH_VERSION_LABEL, ROOK_VERSION_LABEL},
    Error, Result,
};

impl MgrAssembler<'_> {
    /// The single replica deployment running one manager daemon
    ///
    /// Every manager is its own deployment so each keeps a distinct identity
    /// and data path. Pods are recreated rather than rolled, since two pods
    /// with the same manager identity must never run side by side.
    pub fn deployment(&self, config: &MgrConfig) -> Result<Deployment> {
        tracing::debug!(?config, "assembling mgr deployment");
        let template = self.pod_template(config)?;

        // version labels stay off the selector so upgrades don't orphan pods
        let selector = self.pod_labels(&config.daemon_id, false);
        let template_labels = template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone())
            .unwrap_or_default();
        if !selector.iter().all(|(k, v)| template_labels.get(k) == Some(v)) {
            return Err(Error::Configuration(format!(
                "labels of {} override the labels its deployment selects on",
                config.resource_name
            )));
        }

        let mut deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(config.resource_name.clone()),
                namespace: Some(self.info.namespace.clone()),
                labels: Some(self.pod_labels(&config.daemon_id, true)),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(selector),
                    match_expressions: None,
                },
                template,
                replicas: Some(1),
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".into()),
                    rolling_update: None,
                }),
                ..DeploymentSpec::default()
            }),
            status: None,
        };

        labels::apply_labels(
            &mut deployment.metadata,
            &[(ROOK_VERSION_LABEL.to_string(), sanitize_label_value(&self.spec.operator.version))].into(),
        );
        labels::apply_labels(&mut deployment.metadata, &self.spec.mgr_labels());
        labels::apply_labels(
            &mut deployment.metadata,
            &[(CEPH_VERSION_LABEL.to_string(), self.info.ceph_version.to_string())].into(),
        );

        self.info.owner.set_controller_reference(&mut deployment)?;
        Ok(deployment)
    }

    /// One deployment per configured manager
    pub fn deployments(&self) -> Result<Vec<Deployment>> {
        self.mgr_configs().iter().map(|config| self.deployment(config)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembler::tests::{cluster_info, cluster_spec},
        cluster::KEY_MGR,
        resource::ResourceExt,
    };

    #[test]
    fn single_replica_recreate_deployment() {
        let info = cluster_info();
        let mut spec = cluster_spec(3);
        spec.operator.version = "v1.14.0+dirty".into();
        let assembler = MgrAssembler::new(&spec, &info);
        let d = assembler.deployment(&assembler.mgr_config("b")).unwrap();

        assert_eq!(d.metadata.name.as_deref(), Some("rook-ceph-mgr-b"));
        assert_eq!(d.metadata.namespace.as_deref(), Some("rook-ceph"));
        let labels = d.labels();
        assert_eq!(labels["rook-version"], "v1.14.0-dirty");
        assert_eq!(labels["ceph-version"], "18.2.0-0");

        let ds = d.spec.as_ref().unwrap();
        assert_eq!(ds.replicas, Some(1));
        assert_eq!(ds.strategy.as_ref().unwrap().type_.as_deref(), Some("Recreate"));

        let selector = ds.selector.match_labels.as_ref().unwrap();
        assert!(!selector.contains_key("rook-version"));
        assert!(!selector.contains_key("ceph-version"));
        assert!(!selector.contains_key("app.kubernetes.io/part-of"));
        let template_labels = ds.template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert!(selector.iter().all(|(k, v)| template_labels.get(k) == Some(v)));
        assert!(selector.len() < template_labels.len());

        let owner = &d.owner_references()[0];
        assert_eq!(owner.kind, "CephCluster");
        assert_eq!(owner.uid, "0a1b2c3d");
    }

    #[test]
    fn unresolved_owner_fails() {
        let mut info = cluster_info();
        info.owner.metadata.name = None;
        let spec = cluster_spec(1);
        let assembler = MgrAssembler::new(&spec, &info);
        let err = assembler.deployment(&assembler.mgr_config("a")).unwrap_err();
        assert!(matches!(err, Error::Ownership { ref name, .. } if name == "rook-ceph-mgr-a"));
    }

    #[test]
    fn labels_clobbering_the_selector_are_rejected() {
        let info = cluster_info();
        let mut spec = cluster_spec(1);
        spec.labels.insert(KEY_MGR.into(), [("app".into(), "something-else".into())].into());
        let assembler = MgrAssembler::new(&spec, &info);
        let err = assembler.deployment(&assembler.mgr_config("a")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn one_deployment_per_manager() {
        let info = cluster_info();
        let spec = cluster_spec(2);
        let names: Vec<_> = MgrAssembler::new(&spec, &info)
            .deployments()
            .unwrap()
            .iter()
            .map(|d| d.name_any())
            .collect();
        assert_eq!(names, ["rook-ceph-mgr-a", "rook-ceph-mgr-b"]);
    }
}
