//! Custom Resource Definitions for the overcommit operator
//!
//! This module contains the operator's own CRDs plus typed views of the
//! cert-manager resources it manages.

mod certmanager;
mod overcommit;
mod overcommit_class;
mod types;

use kube::{Api, Client};

pub use certmanager::{Certificate, CertificateSpec, Issuer, IssuerRef, IssuerSpec, SelfSignedIssuer};
pub use overcommit::{Overcommit, OvercommitSpec, OvercommitStatus, WorkloadShape};
pub use overcommit_class::{
    OvercommitClass, OvercommitClassSpec, OvercommitClassStatus, EXCLUDE_ALL_NAMESPACES,
    MAX_OVERCOMMIT_RATIO, MIN_OVERCOMMIT_RATIO,
};
pub use types::{set_condition, Condition, ConditionStatus, ResourceStatus};

use crate::{Error, DEFAULT_CLASS_LABEL, SINGLETON_NAME};

/// Fetch the Overcommit singleton
pub async fn get_overcommit(client: &Client) -> Result<Overcommit, Error> {
    let api: Api<Overcommit> = Api::all(client.clone());
    Ok(api.get(SINGLETON_NAME).await?)
}

/// Effective policy-attachment label key.
///
/// Read from the singleton's `spec.label`; falls back to
/// [`DEFAULT_CLASS_LABEL`] when the singleton is unreachable or declares an
/// empty label.
pub async fn overcommit_label(client: &Client) -> String {
    let api: Api<Overcommit> = Api::all(client.clone());
    match api.get_opt(SINGLETON_NAME).await {
        Ok(Some(oc)) if !oc.spec.label.is_empty() => oc.spec.label,
        _ => DEFAULT_CLASS_LABEL.to_string(),
    }
}
