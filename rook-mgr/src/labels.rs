//! Label and annotation utilities shared by every manager descriptor.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

type Map = BTreeMap<String, String>;

/// Label naming the application a pod belongs to
pub const APP_LABEL: &str = "app";
/// Label naming the namespace of the owning cluster
pub const CLUSTER_LABEL: &str = "rook_cluster";
/// Label carrying the daemon type (`mgr`)
pub const DAEMON_TYPE_LABEL: &str = "ceph_daemon_type";
/// Label carrying the daemon id (`a`, `b`, ...)
pub const DAEMON_ID_LABEL: &str = "ceph_daemon_id";
/// Legacy per-daemon label kept for older tooling
pub const INSTANCE_LABEL: &str = "instance";
/// Version of the operator that produced a descriptor
pub const ROOK_VERSION_LABEL: &str = "rook-version";
/// Version of the ceph image a descriptor runs
pub const CEPH_VERSION_LABEL: &str = "ceph-version";

const MAX_LABEL_VALUE_LEN: usize = 63;

/// Labels identifying every pod of an application within a cluster
pub fn app_labels(app_name: &str, namespace: &str) -> Map {
    [
        (APP_LABEL.to_string(), app_name.to_string()),
        (CLUSTER_LABEL.to_string(), namespace.to_string()),
    ]
    .into()
}

/// Labels identifying a single ceph daemon
///
/// The `app.kubernetes.io` recommended labels are only added when
/// `include_recommended` is set. Deployment selectors are immutable, so the
/// selector is built without them and existing deployments keep matching.
pub fn daemon_labels(
    app_name: &str,
    namespace: &str,
    daemon_type: &str,
    daemon_id: &str,
    part_of: &str,
    include_recommended: bool,
) -> Map {
    let mut labels = app_labels(app_name, namespace);
    labels.insert(DAEMON_TYPE_LABEL.into(), daemon_type.into());
    labels.insert(DAEMON_ID_LABEL.into(), daemon_id.into());
    labels.insert(daemon_type.into(), daemon_id.into());
    if include_recommended {
        labels.insert("app.kubernetes.io/name".into(), format!("ceph-{daemon_type}"));
        labels.insert("app.kubernetes.io/instance".into(), daemon_id.into());
        labels.insert("app.kubernetes.io/component".into(), "cephclusters.ceph.rook.io".into());
        labels.insert("app.kubernetes.io/part-of".into(), part_of.into());
        labels.insert("app.kubernetes.io/managed-by".into(), "rook-ceph-operator".into());
        labels.insert("app.kubernetes.io/created-by".into(), "rook-ceph-operator".into());
    }
    labels
}

/// Merge `labels` into the object's labels, overwriting existing keys
pub fn apply_labels(meta: &mut ObjectMeta, labels: &Map) {
    if labels.is_empty() {
        return;
    }
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Merge `annotations` into the object's annotations, overwriting existing keys
pub fn apply_annotations(meta: &mut ObjectMeta, annotations: &Map) {
    if annotations.is_empty() {
        return;
    }
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Turn an arbitrary version string into a valid label value
///
/// Label values are limited to 63 alphanumerics, `-`, `_` and `.`, and must
/// begin and end with an alphanumeric.
pub fn sanitize_label_value(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            _ => '-',
        })
        .take(MAX_LABEL_VALUE_LEN)
        .collect();
    replaced
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
