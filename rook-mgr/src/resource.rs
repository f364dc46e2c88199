pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap};

use crate::{Error, Result};

/// An accessor trait for a kubernetes Resource.
///
/// Every descriptor the assembler emits is a k8s-openapi type with
/// [`ObjectMeta`], so a single blanket implementation covers them all.
pub trait Resource {
    /// Returns kind of this object
    fn kind() -> Cow<'static, str>;
    /// Returns apiVersion of this object
    fn api_version() -> Cow<'static, str>;
    /// Metadata that all persisted resources must have
    fn meta(&self) -> &ObjectMeta;
    /// Metadata that all persisted resources must have
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Generates a controller owner reference pointing to this resource
    ///
    /// Returns `None` while the object has no name or uid, which is the case
    /// for any object that has not been read back from the apiserver.
    fn controller_owner_ref(&self) -> Option<OwnerReference> {
        let meta = self.meta();
        Some(OwnerReference {
            api_version: Self::api_version().to_string(),
            kind: Self::kind().to_string(),
            name: meta.name.clone()?,
            uid: meta.uid.clone()?,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}

impl<K> Resource for K
where
    K: k8s_openapi::Metadata<Ty = ObjectMeta>,
    K: k8s_openapi::Resource,
{
    fn kind() -> Cow<'static, str> {
        K::KIND.into()
    }

    fn api_version() -> Cow<'static, str> {
        K::API_VERSION.into()
    }

    fn meta(&self) -> &ObjectMeta {
        self.metadata()
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        self.metadata_mut()
    }
}

/// Helper methods for resources.
pub trait ResourceExt: Resource {
    /// Returns the name, or an empty string when unset
    fn name_any(&self) -> String;
    /// The namespace the resource is in
    fn namespace(&self) -> Option<String>;
    /// Returns resource labels
    fn labels(&self) -> BTreeMap<String, String>;
    /// Returns resource owner references
    fn owner_references(&self) -> &[OwnerReference];
    /// Provides mutable access to the owner references
    fn owner_references_mut(&mut self) -> &mut Vec<OwnerReference>;
}

impl<K: Resource> ResourceExt for K {
    fn name_any(&self) -> String {
        self.meta()
            .name
            .clone()
            .or_else(|| self.meta().generate_name.clone())
            .unwrap_or_default()
    }

    fn namespace(&self) -> Option<String> {
        self.meta().namespace.clone()
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.meta().labels.clone().unwrap_or_default()
    }

    fn owner_references(&self) -> &[OwnerReference] {
        self.meta().owner_references.as_deref().unwrap_or_default()
    }

    fn owner_references_mut(&mut self) -> &mut Vec<OwnerReference> {
        self.meta_mut().owner_references.get_or_insert_with(Vec::new)
    }
}

/// The parent resource every manager descriptor is garbage collected with
///
/// Holds an already fetched copy of the parent's identity; resolving a
/// reference from it never touches the apiserver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerInfo {
    /// apiVersion of the parent, e.g. `ceph.rook.io/v1`
    pub api_version: String,
    /// Kind of the parent, e.g. `CephCluster`
    pub kind: String,
    /// Metadata of the parent; name and uid are required
    pub metadata: ObjectMeta,
    /// Cluster scoped parents may own objects in any namespace
    pub cluster_scoped: bool,
}

impl OwnerInfo {
    /// Capture the identity of a k8s-openapi object
    pub fn for_resource<K: Resource>(owner: &K) -> Self {
        Self {
            api_version: K::api_version().into_owned(),
            kind: K::kind().into_owned(),
            metadata: owner.meta().clone(),
            cluster_scoped: owner.meta().namespace.is_none(),
        }
    }

    /// Unique ID of the parent, empty when unknown
    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    /// Generates a controller owner reference pointing to the parent
    pub fn controller_owner_ref(&self) -> Option<OwnerReference> {
        Some(OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone()?,
            uid: self.metadata.uid.clone()?,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }

    /// Record the parent as the controller of `object`
    ///
    /// Fails rather than leaving the object un-owned: an object without an
    /// owner reference is never garbage collected with its cluster.
    pub fn set_controller_reference<K: Resource>(&self, object: &mut K) -> Result<()> {
        let fail = |object: &K, reason: String| Error::Ownership {
            kind: K::kind().into_owned(),
            name: object.name_any(),
            reason,
        };

        let owner_ref = self
            .controller_owner_ref()
            .ok_or_else(|| fail(object, format!("{} owner has no name or uid", self.kind)))?;

        if !self.cluster_scoped && self.metadata.namespace != object.namespace() {
            let reason = format!(
                "cross-namespace owner references are disallowed: owner {:?} is in namespace {:?}",
                owner_ref.name,
                self.metadata.namespace.as_deref().unwrap_or_default()
            );
            return Err(fail(object, reason));
        }

        if let Some(other) = object
            .owner_references()
            .iter()
            .find(|r| r.controller == Some(true) && r.uid != owner_ref.uid)
        {
            let reason = format!("object is already controlled by {} {:?}", other.kind, other.name);
            return Err(fail(object, reason));
        }

        let refs = object.owner_references_mut();
        match refs.iter_mut().find(|r| r.uid == owner_ref.uid) {
            Some(existing) => *existing = owner_ref,
            None => refs.push(owner_ref),
        }
        Ok(())
    }
}
