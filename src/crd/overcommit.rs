//! Overcommit CRD - the cluster-wide operator configuration singleton
//!
//! Exactly one Overcommit exists per cluster, with the reserved name
//! `cluster`. It declares the policy-attachment label key and the deployment
//! shape (image coordinates, placement, replicas) shared by all managed
//! webhook workloads.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ResourceStatus};
use crate::DEFAULT_CLASS_LABEL;

/// Overcommit declares the operator's cluster-wide configuration.
///
/// Example:
/// ```yaml
/// apiVersion: overcommit.domain/v1alphav1
/// kind: Overcommit
/// metadata:
///   name: cluster
/// spec:
///   label: overcommit.domain/class
///   deployment:
///     replicas: 2
///     nodeSelector:
///       kubernetes.io/os: linux
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "overcommit.domain",
    version = "v1alphav1",
    kind = "Overcommit",
    status = "OvercommitStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Label","type":"string","jsonPath":".spec.label"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OvercommitSpec {
    /// Label key pods use to select an OvercommitClass
    #[serde(default = "default_class_label")]
    pub label: String,

    /// Shape of the managed webhook and controller workloads
    #[serde(default)]
    pub deployment: WorkloadShape,
}

fn default_class_label() -> String {
    DEFAULT_CLASS_LABEL.to_string()
}

/// Deployment shape applied to every managed workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadShape {
    /// Image registry, overridden by the `IMAGE_REGISTRY` env var
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<String>,

    /// Image repository, overridden by the `IMAGE_REPOSITORY` env var
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repository: Option<String>,

    /// Image tag, overridden by the `APP_VERSION` env var
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    /// Replica count for each managed workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Node selector applied to managed pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Tolerations applied to managed pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Annotations propagated to managed pod templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Labels propagated to managed pod templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Overcommit status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OvercommitStatus {
    /// Per-managed-object readiness rows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,

    /// Aggregated conditions (`ResourcesReady`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overcommit_yaml_round_trip() {
        let yaml = r#"
apiVersion: overcommit.domain/v1alphav1
kind: Overcommit
metadata:
  name: cluster
spec:
  label: overcommit.domain/class
  deployment:
    replicas: 2
    nodeSelector:
      kubernetes.io/os: linux
    annotations:
      team: platform
"#;
        let oc: Overcommit = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(oc.spec.label, "overcommit.domain/class");
        assert_eq!(oc.spec.deployment.replicas, Some(2));
        assert_eq!(
            oc.spec
                .deployment
                .node_selector
                .as_ref()
                .and_then(|s| s.get("kubernetes.io/os"))
                .map(String::as_str),
            Some("linux")
        );
    }

    #[test]
    fn label_defaults_when_omitted() {
        let yaml = r#"
apiVersion: overcommit.domain/v1alphav1
kind: Overcommit
metadata:
  name: cluster
spec: {}
"#;
        let oc: Overcommit = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(oc.spec.label, DEFAULT_CLASS_LABEL);
        assert_eq!(oc.spec.deployment, WorkloadShape::default());
    }
}
