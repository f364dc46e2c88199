use std::collections::BTreeMap;

use crate::{
    cluster::{ClusterInfo, ClusterSpec},
    config::{MgrConfig, APP_NAME},
    labels::{self, DAEMON_ID_LABEL, INSTANCE_LABEL},
};

/// Builds manager descriptors from a cluster spec
///
/// Holds only borrowed, read-only inputs, so one assembler can serve any
/// number of daemons, from any number of threads.
#[derive(Clone, Copy, Debug)]
pub struct MgrAssembler<'a> {
    pub(crate) spec: &'a ClusterSpec,
    pub(crate) info: &'a ClusterInfo,
}

impl<'a> MgrAssembler<'a> {
    /// Assembler for the given desired state and cluster identity
    pub fn new(spec: &'a ClusterSpec, info: &'a ClusterInfo) -> Self {
        Self { spec, info }
    }

    /// The desired cluster state
    pub fn spec(&self) -> &'a ClusterSpec {
        self.spec
    }

    /// The resolved cluster identity
    pub fn info(&self) -> &'a ClusterInfo {
        self.info
    }

    /// Identity for the manager with the given daemon id
    pub fn mgr_config(&self, daemon_id: &str) -> MgrConfig {
        MgrConfig::new(daemon_id, &self.info.namespace, &self.spec.data_dir_host_path)
    }

    /// Identities of every configured manager, `a`, `b`, ...
    pub fn mgr_configs(&self) -> Vec<MgrConfig> {
        let count = usize::try_from(self.spec.mgr.count).unwrap_or_default().max(1);
        (0..count).map(|i| self.mgr_config(&index_to_name(i))).collect()
    }

    /// Labels of a manager pod
    ///
    /// Without `include_recommended` these are the deployment's selector.
    pub fn pod_labels(&self, daemon_id: &str, include_recommended: bool) -> BTreeMap<String, String> {
        let mut labels = labels::daemon_labels(
            APP_NAME,
            &self.info.namespace,
            "mgr",
            daemon_id,
            &self.info.name,
            include_recommended,
        );
        labels.insert(INSTANCE_LABEL.into(), daemon_id.into());
        labels
    }

    /// Labels selecting the active manager, or every manager when empty
    pub fn selector_labels(&self, active_daemon: &str) -> BTreeMap<String, String> {
        let mut labels = labels::app_labels(APP_NAME, &self.info.namespace);
        if !active_daemon.is_empty() {
            labels.insert(DAEMON_ID_LABEL.into(), active_daemon.into());
        }
        labels
    }

    /// Whether the standby managers need the watch-active sidecar and spreading
    pub(crate) fn has_standby_managers(&self) -> bool {
        self.spec.mgr.count > 1
    }
}

/// Daemon id for a zero based index: `a`..`z`, then `aa`, `ab`, ...
pub fn index_to_name(index: usize) -> String {
    let mut name = Vec::new();
    let mut i = index;
    loop {
        name.push(b'a' + (i % 26) as u8);
        if i < 26 {
            break;
        }
        i = i / 26 - 1;
    }
    name.iter().rev().map(|&c| c as char).collect()
}
