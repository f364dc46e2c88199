//! Per-daemon identity and the volumes that back it.
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, EmptyDirVolumeSource, HostPathVolumeSource, KeyToPath, SecretVolumeSource, Volume,
    VolumeMount,
};
use serde::{Deserialize, Serialize};

/// Application name of manager pods and services
pub const APP_NAME: &str = "rook-ceph-mgr";
/// Service name used when the manager runs outside the platform
pub const EXTERNAL_MGR_APP_NAME: &str = "rook-ceph-mgr-external";
/// Port the prometheus module serves metrics on
pub const DEFAULT_METRICS_PORT: i32 = 9283;
/// Port for messenger traffic between daemons
pub const MGR_PEER_PORT: i32 = 6800;

/// Directory daemons log into inside the container
pub const VAR_LOG_CEPH_DIR: &str = "/var/log/ceph";
/// Directory daemons write crash dumps into inside the container
pub const VAR_LIB_CEPH_CRASH_DIR: &str = "/var/lib/ceph/crash";
const ETC_CEPH_DIR: &str = "/etc/ceph";
const KEYRING_STORE_DIR: &str = "/etc/ceph/keyring-store/";
const CONFIG_OVERRIDE_NAME: &str = "rook-config-override";
const DATA_VOLUME_NAME: &str = "ceph-daemon-data";
const LOG_VOLUME_NAME: &str = "rook-ceph-log";
const CRASH_VOLUME_NAME: &str = "rook-ceph-crash";

/// Identity of one manager daemon
///
/// Built fresh for each daemon on every reconcile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MgrConfig {
    /// Daemon id, e.g. `a`
    pub daemon_id: String,
    /// Name shared by the deployment, pod template and keyring secret
    pub resource_name: String,
    /// Where the daemon's data and logs live
    pub data_path_map: DataPathMap,
}

impl MgrConfig {
    /// Identity for the manager with the given id
    pub fn new(daemon_id: &str, namespace: &str, data_dir_host_path: &str) -> Self {
        Self {
            daemon_id: daemon_id.to_string(),
            resource_name: format!("{APP_NAME}-{daemon_id}"),
            data_path_map: DataPathMap::stateless_daemon("mgr", daemon_id, namespace, data_dir_host_path),
        }
    }
}

/// Host and container paths a daemon mounts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataPathMap {
    /// Persist the data dir on the host instead of an empty dir
    pub persist_data: bool,
    /// Host side of the data dir, used when `persist_data` is set
    pub host_data_dir: String,
    /// Container side of the data dir
    pub container_data_dir: String,
    /// Host directory for logs, empty disables the mount
    pub host_log_dir: String,
    /// Host directory for crash dumps, empty disables the mount
    pub host_crash_dir: String,
}

impl DataPathMap {
    /// Paths for a daemon whose data dir does not outlive the pod
    pub fn stateless_daemon(
        daemon_type: &str,
        daemon_id: &str,
        namespace: &str,
        data_dir_host_path: &str,
    ) -> Self {
        let (host_log_dir, host_crash_dir) = match data_dir_host_path.trim_end_matches('/') {
            "" => (String::new(), String::new()),
            root => (format!("{root}/{namespace}/log"), format!("{root}/{namespace}/crash")),
        };
        Self {
            persist_data: false,
            host_data_dir: String::new(),
            container_data_dir: format!("/var/lib/ceph/{daemon_type}/ceph-{daemon_id}"),
            host_log_dir,
            host_crash_dir,
        }
    }

    /// Container directories the chown init container fixes up
    ///
    /// The log and crash dirs exist in the image even when no host path backs them.
    pub fn container_dirs(&self) -> Vec<String> {
        let mut dirs = vec![VAR_LOG_CEPH_DIR.to_string(), VAR_LIB_CEPH_CRASH_DIR.to_string()];
        if !self.container_data_dir.is_empty() {
            dirs.push(self.container_data_dir.clone());
        }
        dirs
    }
}

/// Format a daemon command line flag
pub fn new_flag(key: &str, value: &str) -> String {
    format!("--{key}={value}")
}

/// Reference an environment variable from a command line
pub fn env_var_reference(name: &str) -> String {
    format!("$({name})")
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: None,
        }),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..VolumeMount::default()
    }
}

/// Volumes a daemon pod needs
pub fn daemon_volumes(paths: &DataPathMap, resource_name: &str) -> Vec<Volume> {
    let mut volumes = vec![
        Volume {
            name: CONFIG_OVERRIDE_NAME.into(),
            config_map: Some(ConfigMapVolumeSource {
                name: CONFIG_OVERRIDE_NAME.into(),
                items: Some(vec![KeyToPath {
                    key: "config".into(),
                    path: "ceph.conf".into(),
                    mode: Some(0o444),
                }]),
                default_mode: Some(0o444),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
        Volume {
            name: keyring_volume_name(resource_name),
            secret: Some(SecretVolumeSource {
                secret_name: Some(format!("{resource_name}-keyring")),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        },
    ];
    if !paths.host_log_dir.is_empty() {
        volumes.push(host_path_volume(LOG_VOLUME_NAME, &paths.host_log_dir));
    }
    if !paths.host_crash_dir.is_empty() {
        volumes.push(host_path_volume(CRASH_VOLUME_NAME, &paths.host_crash_dir));
    }
    if paths.persist_data && !paths.host_data_dir.is_empty() {
        volumes.push(host_path_volume(DATA_VOLUME_NAME, &paths.host_data_dir));
    } else if !paths.container_data_dir.is_empty() {
        volumes.push(Volume {
            name: DATA_VOLUME_NAME.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        });
    }
    volumes
}

/// Mounts matching [`daemon_volumes`]
pub fn daemon_volume_mounts(paths: &DataPathMap, resource_name: &str) -> Vec<VolumeMount> {
    let mut mounts = vec![
        mount(CONFIG_OVERRIDE_NAME, ETC_CEPH_DIR, true),
        mount(&keyring_volume_name(resource_name), KEYRING_STORE_DIR, true),
    ];
    mounts.extend(log_volume_mounts(paths));
    if !paths.container_data_dir.is_empty() {
        mounts.push(mount(DATA_VOLUME_NAME, &paths.container_data_dir, false));
    }
    mounts
}

/// Log and crash mounts, shared with the log collector
pub fn log_volume_mounts(paths: &DataPathMap) -> Vec<VolumeMount> {
    let mut mounts = Vec::new();
    if !paths.host_log_dir.is_empty() {
        mounts.push(mount(LOG_VOLUME_NAME, VAR_LOG_CEPH_DIR, false));
    }
    if !paths.host_crash_dir.is_empty() {
        mounts.push(mount(CRASH_VOLUME_NAME, VAR_LIB_CEPH_CRASH_DIR, false));
    }
    mounts
}

fn keyring_volume_name(resource_name: &str) -> String {
    format!("{resource_name}-keyring")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mgr_config_paths() {
        let config = MgrConfig::new("a", "rook-ceph", "/var/lib/rook/");
        assert_eq!(config.resource_name, "rook-ceph-mgr-a");
        let paths = &config.data_path_map;
        assert_eq!(paths.container_data_dir, "/var/lib/ceph/mgr/ceph-a");
        assert_eq!(paths.host_log_dir, "/var/lib/rook/rook-ceph/log");
        assert_eq!(paths.host_crash_dir, "/var/lib/rook/rook-ceph/crash");
        assert_eq!(
            paths.container_dirs(),
            ["/var/log/ceph", "/var/lib/ceph/crash", "/var/lib/ceph/mgr/ceph-a"]
        );
    }

    #[test]
    fn volumes_and_mounts_line_up() {
        let config = MgrConfig::new("b", "rook-ceph", "/var/lib/rook");
        let volumes = daemon_volumes(&config.data_path_map, &config.resource_name);
        let mounts = daemon_volume_mounts(&config.data_path_map, &config.resource_name);
        assert_eq!(volumes.len(), mounts.len());
        for m in &mounts {
            assert!(volumes.iter().any(|v| v.name == m.name), "no volume for mount {}", m.name);
        }
        let data = volumes.iter().find(|v| v.name == "ceph-daemon-data").unwrap();
        assert!(data.empty_dir.is_some());
    }

    #[test]
    fn no_host_path_skips_log_volumes_but_still_chowns_them() {
        let config = MgrConfig::new("a", "rook-ceph", "");
        let volumes = daemon_volumes(&config.data_path_map, &config.resource_name);
        assert!(volumes.iter().all(|v| v.host_path.is_none()));
        assert_eq!(
            config.data_path_map.container_dirs(),
            ["/var/log/ceph", "/var/lib/ceph/crash", "/var/lib/ceph/mgr/ceph-a"]
        );
    }

    #[test]
    fn flags() {
        assert_eq!(
            new_flag("public-addr", &env_var_reference("ROOK_POD_IP")),
            "--public-addr=$(ROOK_POD_IP)"
        );
    }
}
