//! Reconciliation logic for the operator's custom resources
//!
//! Two controllers run here: the [`overcommit`] reconciler drives the
//! singleton and its webhook stacks, the [`overcommit_class`] reconciler
//! drives each class's dedicated webhook stack. Both converge managed objects
//! through the templater and the equality kernel.

pub mod overcommit;
pub mod overcommit_class;
pub mod status;

use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::compare::OwnedAttributes;
use crate::Error;

/// Controller context shared by both reconcilers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Replace any existing controller reference with `owner`.
pub(crate) fn set_controller_owner(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let mut refs: Vec<OwnerReference> = meta
        .owner_references
        .take()
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.controller != Some(true))
        .collect();
    refs.push(owner.clone());
    meta.owner_references = Some(refs);
}

/// Whether `meta` already carries `owner` as its controller reference.
pub(crate) fn has_controller_owner(meta: &ObjectMeta, owner: &OwnerReference) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .any(|r| r.uid == owner.uid && r.kind == owner.kind)
}

/// Desired-state upsert of one managed object.
///
/// Missing objects are created with the full desired shape and the controller
/// reference. Existing objects only have their unequal owned attributes
/// patched; the controller reference is (re)set only when an attribute
/// actually changed, to avoid spurious writes.
pub(crate) async fn upsert<K>(api: &Api<K>, mut desired: K, owner: &OwnerReference) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + OwnedAttributes + Clone + Debug + DeserializeOwned + Serialize,
{
    let name = desired.name_any();

    match api.get_opt(&name).await? {
        None => {
            set_controller_owner(desired.meta_mut(), owner);
            api.create(&PostParams::default(), &desired).await?;
            debug!(name = %name, "created managed object");
        }
        Some(mut existing) => {
            if existing.sync_from(&desired) {
                set_controller_owner(existing.meta_mut(), owner);
                api.replace(&name, &PostParams::default(), &existing).await?;
                debug!(name = %name, "updated managed object");
            }
        }
    }

    Ok(())
}

/// Controller owner reference for a policy object, failing when the object
/// has no name or uid yet.
pub(crate) fn owner_reference<K>(object: &K) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    object
        .controller_owner_ref(&())
        .ok_or_else(|| Error::internal("policy object has no name", "reconciler"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "overcommit.domain/v1alphav1".to_string(),
            kind: "Overcommit".to_string(),
            name: "cluster".to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn set_controller_owner_replaces_previous_controller() {
        let mut meta = ObjectMeta {
            owner_references: Some(vec![owner("old-uid")]),
            ..Default::default()
        };
        set_controller_owner(&mut meta, &owner("new-uid"));

        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "new-uid");
    }

    #[test]
    fn has_controller_owner_matches_uid_and_kind() {
        let meta = ObjectMeta {
            owner_references: Some(vec![owner("uid-1")]),
            ..Default::default()
        };
        assert!(has_controller_owner(&meta, &owner("uid-1")));
        assert!(!has_controller_owner(&meta, &owner("uid-2")));
    }

    #[test]
    fn has_controller_owner_false_without_references() {
        let meta = ObjectMeta::default();
        assert!(!has_controller_owner(&meta, &owner("uid-1")));
    }
}
