//! Containers that make up a manager pod.
//!
//! None of these builders can fail: they only read configuration the
//! reconciler has already validated.
use k8s_openapi::{
    api::core::v1::{
        ConfigMapKeySelector, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
        ObjectFieldSelector, Probe, ResourceFieldSelector, SecretKeySelector, SecurityContext,
    },
    apimachinery::pkg::{api::resource::Quantity, util::intstr::IntOrString},
};

use crate::{
    assembler::MgrAssembler,
    cluster::{ProbeSpec, KEY_MGR},
    config::{
        daemon_volume_mounts, env_var_reference, log_volume_mounts, new_flag, MgrConfig, DEFAULT_METRICS_PORT,
        MGR_PEER_PORT, VAR_LOG_CEPH_DIR,
    },
};

/// Env var holding the pod IP the daemon binds its public address to
pub const POD_IP_ENV_VAR: &str = "ROOK_POD_IP";
/// Env var naming the PrometheusRule the orchestrator module manages
pub const MONITORING_PROMETHEUS_RULE_ENV_VAR: &str = "ROOK_CEPH_MONITORING_PROMETHEUS_RULE";
/// CRD version reported to the orchestrator module
pub const CLUSTER_CRD_VERSION: &str = "v1";

const MON_SECRET_NAME: &str = "rook-ceph-mon";
const MON_ENDPOINTS_CONFIG_MAP: &str = "rook-ceph-mon-endpoints";
const CEPH_CONFIG_SECRET_NAME: &str = "rook-ceph-config";
const KEYRING_PATH: &str = "/etc/ceph/keyring-store/keyring";
const CONFIG_OVERRIDE_PATH: &str = "/etc/rook/config/override.conf";
const SIDECAR_UPDATE_INTERVAL: &str = "15s";
const LIVENESS_INITIAL_DELAY_SECONDS: i32 = 60;
const LOG_COLLECTOR_KEY: &str = "logcollector";

const LOG_ROTATE_SCRIPT: &str = r#"
CEPH_CLIENT_ID=__CLIENT_ID__
PERIODICITY=__PERIODICITY__
LOG_ROTATE_CEPH_FILE=/etc/logrotate.d/ceph

# only rotate this daemon's log so neighbouring daemons are not left writing to rotated files
sed -i "s|*.log|$CEPH_CLIENT_ID.log|" "$LOG_ROTATE_CEPH_FILE"

while true; do
	sleep "$PERIODICITY"
	echo "starting log rotation"
	logrotate --verbose --force "$LOG_ROTATE_CEPH_FILE"
	echo "sleeping for $PERIODICITY"
done
"#;

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn env_from(name: &str, source: EnvVarSource) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(source),
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    env_from(
        name,
        EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: None,
                field_path: field_path.into(),
            }),
            ..EnvVarSource::default()
        },
    )
}

fn resource_env(name: &str, resource: &str) -> EnvVar {
    env_from(
        name,
        EnvVarSource {
            resource_field_ref: Some(ResourceFieldSelector {
                resource: resource.into(),
                divisor: resource.ends_with("cpu").then(|| Quantity("1".into())),
                container_name: None,
            }),
            ..EnvVarSource::default()
        },
    )
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    env_from(
        name,
        EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.into(),
                key: key.into(),
                optional: None,
            }),
            ..EnvVarSource::default()
        },
    )
}

fn config_map_env(name: &str, config_map: &str, key: &str) -> EnvVar {
    env_from(
        name,
        EnvVarSource {
            config_map_key_ref: Some(ConfigMapKeySelector {
                name: config_map.into(),
                key: key.into(),
                optional: None,
            }),
            ..EnvVarSource::default()
        },
    )
}

fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port: port,
        protocol: Some("TCP".into()),
        ..ContainerPort::default()
    }
}

/// The metrics endpoint probe every manager gets unless overridden
pub fn default_liveness_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/".into()),
            port: IntOrString::Int(DEFAULT_METRICS_PORT),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(LIVENESS_INITIAL_DELAY_SECONDS),
        ..Probe::default()
    }
}

/// Layer a user probe override over `default`
///
/// A supplied handler replaces the default handler wholesale; timings are
/// taken field by field.
pub fn configure_liveness_probe(default: Probe, spec: Option<&ProbeSpec>) -> Option<Probe> {
    let Some(spec) = spec else {
        return Some(default);
    };
    if spec.disabled {
        return None;
    }
    let Some(user) = &spec.probe else {
        return Some(default);
    };

    let mut probe = default;
    if user.http_get.is_some() || user.exec.is_some() || user.tcp_socket.is_some() || user.grpc.is_some() {
        probe.http_get = user.http_get.clone();
        probe.exec = user.exec.clone();
        probe.tcp_socket = user.tcp_socket.clone();
        probe.grpc = user.grpc.clone();
    }
    probe.initial_delay_seconds = user.initial_delay_seconds.or(probe.initial_delay_seconds);
    probe.period_seconds = user.period_seconds.or(probe.period_seconds);
    probe.timeout_seconds = user.timeout_seconds.or(probe.timeout_seconds);
    probe.success_threshold = user.success_threshold.or(probe.success_threshold);
    probe.failure_threshold = user.failure_threshold.or(probe.failure_threshold);
    probe.termination_grace_period_seconds = user
        .termination_grace_period_seconds
        .or(probe.termination_grace_period_seconds);
    Some(probe)
}

fn log_rotate_period(periodicity: &str) -> &str {
    match periodicity {
        "" | "daily" => "24h",
        "hourly" => "1h",
        "weekly" => "7d",
        "monthly" => "30d",
        other => other,
    }
}

impl MgrAssembler<'_> {
    fn security_context(&self) -> SecurityContext {
        SecurityContext {
            privileged: Some(self.spec.operator.hostpath_requires_privileged),
            ..SecurityContext::default()
        }
    }

    /// Flags every ceph daemon is started with
    pub fn daemon_flags(&self, daemon_id: &str) -> Vec<String> {
        vec![
            new_flag("fsid", &self.info.fsid),
            new_flag("keyring", KEYRING_PATH),
            new_flag("default-log-to-stderr", "true"),
            new_flag("default-err-to-stderr", "true"),
            new_flag("default-mon-cluster-log-to-stderr", "true"),
            new_flag("default-log-stderr-prefix", "debug "),
            new_flag("default-log-to-file", "false"),
            new_flag("default-mon-cluster-log-to-file", "false"),
            new_flag("mon-host", &env_var_reference("ROOK_CEPH_MON_HOST")),
            new_flag("mon-initial-members", &env_var_reference("ROOK_CEPH_MON_INITIAL_MEMBERS")),
            new_flag("id", daemon_id),
            new_flag("setuser", "ceph"),
            new_flag("setgroup", "ceph"),
        ]
    }

    fn daemon_env_vars(&self) -> Vec<EnvVar> {
        vec![
            env("CONTAINER_IMAGE", self.spec.ceph_version.image.as_str()),
            field_env("POD_NAME", "metadata.name"),
            field_env("POD_NAMESPACE", "metadata.namespace"),
            field_env("NODE_NAME", "spec.nodeName"),
            resource_env("POD_MEMORY_LIMIT", "limits.memory"),
            resource_env("POD_MEMORY_REQUEST", "requests.memory"),
            resource_env("POD_CPU_LIMIT", "limits.cpu"),
            resource_env("POD_CPU_REQUEST", "requests.cpu"),
            secret_env("ROOK_CEPH_MON_HOST", CEPH_CONFIG_SECRET_NAME, "mon_host"),
            secret_env("ROOK_CEPH_MON_INITIAL_MEMBERS", CEPH_CONFIG_SECRET_NAME, "mon_initial_members"),
        ]
    }

    fn orchestrator_module_env_vars(&self) -> Vec<EnvVar> {
        vec![
            env("ROOK_OPERATOR_NAMESPACE", self.spec.operator.namespace.as_str()),
            env("ROOK_CEPH_CLUSTER_CRD_VERSION", CLUSTER_CRD_VERSION),
            env("ROOK_CEPH_CLUSTER_CRD_NAME", self.info.name.as_str()),
            env(MONITORING_PROMETHEUS_RULE_ENV_VAR, self.spec.operator.prometheus_rule.as_str()),
            field_env(POD_IP_ENV_VAR, "status.podIP"),
        ]
    }

    /// Chown the daemon's directories to the ceph user before it starts
    pub fn init_container(&self, config: &MgrConfig) -> Container {
        let mut args = vec!["--verbose".to_string(), "--recursive".into(), "ceph:ceph".into()];
        args.extend(config.data_path_map.container_dirs());
        Container {
            name: "chown-container-data-dir".into(),
            command: Some(vec!["chown".into()]),
            args: Some(args),
            image: Some(self.spec.ceph_version.image.clone()),
            volume_mounts: Some(daemon_volume_mounts(&config.data_path_map, &config.resource_name)),
            resources: self.spec.mgr_resources(),
            security_context: Some(self.security_context()),
            ..Container::default()
        }
    }

    /// The ceph-mgr daemon itself
    pub fn daemon_container(&self, config: &MgrConfig) -> Container {
        let mut args = self.daemon_flags(&config.daemon_id);
        // required by ceph-csi for cephfs mounts made by the mgr (ceph/ceph-csi#486)
        args.push(new_flag("client-mount-uid", "0"));
        args.push(new_flag("client-mount-gid", "0"));
        args.push("--foreground".into());
        // the pod IP changes with every restart off the host network
        if !self.spec.is_host_network() {
            args.push(new_flag("public-addr", &env_var_reference(POD_IP_ENV_VAR)));
        }

        let mut env = self.daemon_env_vars();
        env.extend(self.orchestrator_module_env_vars());

        Container {
            name: "mgr".into(),
            command: Some(vec!["ceph-mgr".into()]),
            args: Some(args),
            image: Some(self.spec.ceph_version.image.clone()),
            volume_mounts: Some(daemon_volume_mounts(&config.data_path_map, &config.resource_name)),
            ports: Some(vec![
                tcp_port("mgr", MGR_PEER_PORT),
                tcp_port("http-metrics", DEFAULT_METRICS_PORT),
                tcp_port("dashboard", self.spec.dashboard_port()),
            ]),
            env: Some(env),
            resources: self.spec.mgr_resources(),
            security_context: Some(self.security_context()),
            liveness_probe: configure_liveness_probe(
                default_liveness_probe(),
                self.spec.health_check.liveness_probe.get(KEY_MGR),
            ),
            working_dir: Some(VAR_LOG_CEPH_DIR.into()),
            ..Container::default()
        }
    }

    /// The watch-active sidecar that follows which manager is active
    ///
    /// The env var names are read by the sidecar binary and must not change.
    pub fn sidecar_container(&self, config: &MgrConfig) -> Container {
        let env = vec![
            env("ROOK_CLUSTER_ID", self.info.owner.uid()),
            env("ROOK_CLUSTER_NAME", self.info.name.as_str()),
            field_env("ROOK_PRIVATE_IP", "status.podIP"),
            field_env("ROOK_PUBLIC_IP", "status.podIP"),
            env("POD_NAMESPACE", self.info.namespace.as_str()),
            config_map_env("ROOK_MON_ENDPOINTS", MON_ENDPOINTS_CONFIG_MAP, "data"),
            secret_env("ROOK_MON_SECRET", MON_SECRET_NAME, "mon-secret"),
            secret_env("ROOK_CEPH_USERNAME", MON_SECRET_NAME, "ceph-username"),
            secret_env("ROOK_CEPH_SECRET", MON_SECRET_NAME, "ceph-secret"),
            env("ROOK_CEPH_CONFIG_OVERRIDE", CONFIG_OVERRIDE_PATH),
            secret_env("ROOK_FSID", MON_SECRET_NAME, "fsid"),
            env("ROOK_DASHBOARD_ENABLED", self.spec.dashboard.enabled.to_string()),
            env("ROOK_MONITORING_ENABLED", self.spec.monitoring.enabled.to_string()),
            env("ROOK_UPDATE_INTERVAL", SIDECAR_UPDATE_INTERVAL),
            env("ROOK_DAEMON_NAME", config.daemon_id.as_str()),
            env(
                "ROOK_MGR_STAT_SUPPORTED",
                self.info.ceph_version.is_at_least_pacific().to_string(),
            ),
        ];

        Container {
            name: "watch-active".into(),
            args: Some(vec!["ceph".into(), "mgr".into(), "watch-active".into()]),
            image: Some(self.spec.operator.image.clone()),
            env: Some(env),
            resources: self.spec.mgr_sidecar_resources(),
            ..Container::default()
        }
    }

    /// Rotates the daemon's log files from a sidecar
    pub fn log_collector_container(&self, config: &MgrConfig) -> Container {
        let client_id = format!("ceph-mgr.{}", config.daemon_id);
        let script = LOG_ROTATE_SCRIPT
            .replace("__CLIENT_ID__", &client_id)
            .replace("__PERIODICITY__", log_rotate_period(&self.spec.log_collector.periodicity));
        Container {
            name: "log-collector".into(),
            command: Some(
                ["/bin/bash", "-x", "-e", "-m", "-c"]
                    .into_iter()
                    .map(String::from)
                    .chain(Some(script))
                    .collect(),
            ),
            image: Some(self.spec.ceph_version.image.clone()),
            volume_mounts: Some(log_volume_mounts(&config.data_path_map)),
            resources: self.spec.resources.get(LOG_COLLECTOR_KEY).cloned(),
            security_context: Some(self.security_context()),
            tty: Some(true),
            ..Container::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembler::tests::{cluster_info, cluster_spec},
        cluster::NetworkProvider,
    };
    use k8s_openapi::api::core::v1::ExecAction;

    fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a EnvVar> {
        container.env.as_ref()?.iter().find(|e| e.name == name)
    }

    #[test]
    fn init_container_chowns_data_dirs() {
        let info = cluster_info();
        let spec = cluster_spec(1);
        let assembler = MgrAssembler::new(&spec, &info);
        let c = assembler.init_container(&assembler.mgr_config("a"));
        assert_eq!(c.command.unwrap(), ["chown"]);
        let args = c.args.unwrap();
        assert_eq!(&args[..3], ["--verbose", "--recursive", "ceph:ceph"]);
        assert!(args.contains(&"/var/lib/ceph/mgr/ceph-a".to_string()));
        assert_eq!(c.security_context.unwrap().privileged, Some(false));
    }

    #[test]
    fn daemon_container_flags_and_ports() {
        let info = cluster_info();
        let spec = cluster_spec(1);
        let assembler = MgrAssembler::new(&spec, &info);
        let c = assembler.daemon_container(&assembler.mgr_config("a"));
        let args = c.args.unwrap();
        assert!(args.contains(&format!("--fsid={}", info.fsid)));
        assert!(args.contains(&"--id=a".to_string()));
        assert!(args.contains(&"--client-mount-uid=0".to_string()));
        assert!(args.contains(&"--client-mount-gid=0".to_string()));
        assert_eq!(args.last().unwrap(), "--public-addr=$(ROOK_POD_IP)");

        let ports: Vec<_> = c
            .ports
            .unwrap()
            .into_iter()
            .map(|p| (p.name.unwrap(), p.container_port))
            .collect();
        assert_eq!(
            ports,
            [
                ("mgr".to_string(), 6800),
                ("http-metrics".to_string(), 9283),
                ("dashboard".to_string(), 7000)
            ]
        );
    }

    #[test]
    fn host_network_has_no_public_addr() {
        let info = cluster_info();
        let mut spec = cluster_spec(1);
        spec.network.provider = NetworkProvider::Host;
        let assembler = MgrAssembler::new(&spec, &info);
        let args = assembler.daemon_container(&assembler.mgr_config("a")).args.unwrap();
        assert!(!args.iter().any(|a| a.starts_with("--public-addr")));
        assert_eq!(args.last().unwrap(), "--foreground");
    }

    #[test]
    fn secure_dashboard_port() {
        let info = cluster_info();
        let mut spec = cluster_spec(1);
        spec.dashboard.ssl = true;
        let assembler = MgrAssembler::new(&spec, &info);
        let ports = assembler.daemon_container(&assembler.mgr_config("a")).ports.unwrap();
        assert_eq!(ports[2].container_port, 8443);
    }

    #[test]
    fn orchestrator_env_comes_from_operator_settings() {
        let info = cluster_info();
        let mut spec = cluster_spec(1);
        spec.operator.namespace = "rook-operator".into();
        spec.operator.prometheus_rule = "prometheus-ceph-rules".into();
        let assembler = MgrAssembler::new(&spec, &info);
        let c = assembler.daemon_container(&assembler.mgr_config("a"));
        assert_eq!(
            env_value(&c, "ROOK_OPERATOR_NAMESPACE").unwrap().value.as_deref(),
            Some("rook-operator")
        );
        assert_eq!(
            env_value(&c, MONITORING_PROMETHEUS_RULE_ENV_VAR).unwrap().value.as_deref(),
            Some("prometheus-ceph-rules")
        );
        let pod_ip = env_value(&c, POD_IP_ENV_VAR).unwrap();
        assert_eq!(
            pod_ip.value_from.as_ref().unwrap().field_ref.as_ref().unwrap().field_path,
            "status.podIP"
        );
    }

    #[test]
    fn default_liveness_probe_targets_metrics() {
        let info = cluster_info();
        let spec = cluster_spec(1);
        let assembler = MgrAssembler::new(&spec, &info);
        let probe = assembler.daemon_container(&assembler.mgr_config("a")).liveness_probe.unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(60));
        assert_eq!(probe.http_get.unwrap().port, IntOrString::Int(9283));
    }

    #[test]
    fn liveness_probe_can_be_disabled() {
        let info = cluster_info();
        let mut spec = cluster_spec(1);
        spec.health_check.liveness_probe.insert(
            KEY_MGR.into(),
            ProbeSpec {
                disabled: true,
                probe: None,
            },
        );
        let assembler = MgrAssembler::new(&spec, &info);
        assert!(assembler.daemon_container(&assembler.mgr_config("a")).liveness_probe.is_none());
    }

    #[test]
    fn liveness_probe_override_merges() {
        let user = Probe {
            exec: Some(ExecAction {
                command: Some(vec!["true".into()]),
            }),
            period_seconds: Some(30),
            ..Probe::default()
        };
        let probe = configure_liveness_probe(
            default_liveness_probe(),
            Some(&ProbeSpec {
                disabled: false,
                probe: Some(user),
            }),
        )
        .unwrap();
        assert!(probe.http_get.is_none());
        assert!(probe.exec.is_some());
        assert_eq!(probe.period_seconds, Some(30));
        assert_eq!(probe.initial_delay_seconds, Some(60));
    }

    #[test]
    fn sidecar_env_contract() {
        let mut info = cluster_info();
        info.ceph_version.major = 15;
        let mut spec = cluster_spec(2);
        spec.dashboard.enabled = true;
        spec.operator.image = "rook/ceph:v1.14.0".into();
        let assembler = MgrAssembler::new(&spec, &info);
        let c = assembler.sidecar_container(&assembler.mgr_config("b"));
        assert_eq!(c.args.as_deref().unwrap(), ["ceph", "mgr", "watch-active"]);
        assert_eq!(c.image.as_deref(), Some("rook/ceph:v1.14.0"));

        let value = |name| env_value(&c, name).and_then(|e| e.value.clone());
        assert_eq!(value("ROOK_CLUSTER_ID").as_deref(), Some("0a1b2c3d"));
        assert_eq!(value("ROOK_CLUSTER_NAME").as_deref(), Some("my-cluster"));
        assert_eq!(value("ROOK_DASHBOARD_ENABLED").as_deref(), Some("true"));
        assert_eq!(value("ROOK_MONITORING_ENABLED").as_deref(), Some("false"));
        assert_eq!(value("ROOK_UPDATE_INTERVAL").as_deref(), Some("15s"));
        assert_eq!(value("ROOK_DAEMON_NAME").as_deref(), Some("b"));
        assert_eq!(value("ROOK_MGR_STAT_SUPPORTED").as_deref(), Some("false"));

        let fsid = env_value(&c, "ROOK_FSID").unwrap();
        assert_eq!(fsid.value, None);
        let secret = fsid.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!((secret.name.as_str(), secret.key.as_str()), ("rook-ceph-mon", "fsid"));
    }

    #[test]
    fn log_collector_rotates_this_daemon() {
        let info = cluster_info();
        let mut spec = cluster_spec(1);
        spec.log_collector.enabled = true;
        spec.log_collector.periodicity = "hourly".into();
        let assembler = MgrAssembler::new(&spec, &info);
        let c = assembler.log_collector_container(&assembler.mgr_config("a"));
        let script = c.command.unwrap().pop().unwrap();
        assert!(script.contains("CEPH_CLIENT_ID=ceph-mgr.a\n"));
        assert!(script.contains("PERIODICITY=1h\n"));
        assert_eq!(c.volume_mounts.unwrap().len(), 2);
    }
}
