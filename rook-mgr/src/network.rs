//! Multus network attachment annotations.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::{cluster::NetworkSpec, Error, Result};

/// Annotation multus reads the extra interfaces from
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

const PUBLIC_NETWORK: &str = "public";
const CLUSTER_NETWORK: &str = "cluster";

/// A single entry of the JSON form of the networks annotation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSelectionElement {
    /// NetworkAttachmentDefinition name
    pub name: String,
    /// Namespace of the definition, defaults to the pod's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Interface name inside the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Remaining attachment settings (`ips`, `mac`, `cni-args`, ...), passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

enum Notation {
    Short(Vec<String>),
    Json(Vec<NetworkSelectionElement>),
}

fn invalid(msg: String) -> Error {
    Error::Configuration(msg)
}

fn parse_short(key: &str, value: &str, namespace: &str) -> Result<String> {
    let parts: Vec<&str> = value.split('/').collect();
    match parts.as_slice() {
        [nad] if !nad.is_empty() => Ok(format!("{namespace}/{nad}")),
        [ns, nad] if !ns.is_empty() && !nad.is_empty() => Ok(format!("{ns}/{nad}")),
        _ => Err(invalid(format!(
            "network selector {key:?} value {value:?} must be \"name\" or \"namespace/name\""
        ))),
    }
}

fn parse_json(key: &str, value: &str) -> Result<Vec<NetworkSelectionElement>> {
    let elements: Vec<NetworkSelectionElement> = if value.starts_with('[') {
        serde_json::from_str(value)
    } else {
        serde_json::from_str(value).map(|e| vec![e])
    }
    .map_err(|e| invalid(format!("network selector {key:?} is not valid JSON: {e}")))?;
    if elements.iter().any(|e| e.name.is_empty()) {
        return Err(invalid(format!("network selector {key:?} has an element without a name")));
    }
    Ok(elements)
}

/// Point multus at the configured public and cluster networks
///
/// Selector values are either `name` / `namespace/name`, or the JSON network
/// selection format; both notations cannot be mixed in one pod.
/// Short notation without a namespace resolves to `namespace`.
pub fn apply_multus(network: &NetworkSpec, namespace: &str, meta: &mut ObjectMeta) -> Result<()> {
    if network.selectors.is_empty() {
        return Err(invalid("multus networking requires at least one network selector".into()));
    }

    let mut notation: Option<Notation> = None;
    for (key, value) in &network.selectors {
        if key != PUBLIC_NETWORK && key != CLUSTER_NETWORK {
            return Err(invalid(format!(
                "unknown network selector {key:?}, expected {PUBLIC_NETWORK:?} or {CLUSTER_NETWORK:?}"
            )));
        }
        let value = value.trim();
        let is_json = value.starts_with('[') || value.starts_with('{');
        notation = Some(match (notation.take(), is_json) {
            (None, false) => Notation::Short(vec![parse_short(key, value, namespace)?]),
            (None, true) => Notation::Json(parse_json(key, value)?),
            (Some(Notation::Short(mut entries)), false) => {
                entries.push(parse_short(key, value, namespace)?);
                Notation::Short(entries)
            }
            (Some(Notation::Json(mut entries)), true) => {
                entries.extend(parse_json(key, value)?);
                Notation::Json(entries)
            }
            _ => return Err(invalid("network selectors mix short and JSON notation".into())),
        });
    }

    let annotation = match notation {
        Some(Notation::Short(entries)) => entries.join(", "),
        Some(Notation::Json(entries)) => serde_json::to_string(&entries)
            .map_err(|e| invalid(format!("failed to encode network selection: {e}")))?,
        None => return Ok(()),
    };
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(NETWORKS_ANNOTATION.into(), annotation);
    Ok(())
}
