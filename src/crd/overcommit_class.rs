//! OvercommitClass CRD - one overcommit policy
//!
//! Each class declares the cpu/memory ratios applied to pods that select it,
//! the namespaces it must never touch, and whether it is the cluster default
//! for unlabelled pods.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ResourceStatus};

/// Lowest admissible overcommit ratio (inclusive)
pub const MIN_OVERCOMMIT_RATIO: f64 = 0.0001;

/// Highest admissible overcommit ratio (inclusive)
pub const MAX_OVERCOMMIT_RATIO: f64 = 1.0;

/// Wildcard exclusion: the class applies to no namespace at all
pub const EXCLUDE_ALL_NAMESPACES: &str = "*";

/// OvercommitClass defines one overcommit policy.
///
/// Example:
/// ```yaml
/// apiVersion: overcommit.domain/v1alphav1
/// kind: OvercommitClass
/// metadata:
///   name: gold
/// spec:
///   cpuOvercommit: 0.5
///   memoryOvercommit: 0.8
///   excludedNamespaces: "kube-system,cert-manager"
///   isDefault: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "overcommit.domain",
    version = "v1alphav1",
    kind = "OvercommitClass",
    status = "OvercommitClassStatus",
    derive = "PartialEq",
    shortname = "oc",
    shortname = "ocs",
    printcolumn = r#"{"name":"CPU","type":"number","jsonPath":".spec.cpuOvercommit"}"#,
    printcolumn = r#"{"name":"Memory","type":"number","jsonPath":".spec.memoryOvercommit"}"#,
    printcolumn = r#"{"name":"Default","type":"boolean","jsonPath":".spec.isDefault"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OvercommitClassSpec {
    /// Fraction of the cpu limit granted as cpu request, in [0.0001, 1]
    pub cpu_overcommit: f64,

    /// Fraction of the memory limit granted as memory request, in [0.0001, 1]
    pub memory_overcommit: f64,

    /// Comma-separated namespaces this class never rewrites, or `*` for all.
    /// May be empty.
    #[serde(default)]
    pub excluded_namespaces: String,

    /// Whether this class applies to pods without a policy label.
    /// At most one class may be the default.
    #[serde(default)]
    pub is_default: bool,

    /// Labels propagated to the class's managed objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Annotations propagated to the class's managed objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// OvercommitClass status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OvercommitClassStatus {
    /// Per-managed-object readiness rows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,

    /// Aggregated conditions (`ResourcesReady`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl OvercommitClass {
    /// Parsed excluded-namespace entries, trimmed, empty entries dropped
    pub fn excluded_namespace_list(&self) -> Vec<&str> {
        self.spec
            .excluded_namespaces
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .collect()
    }

    /// Whether this class must leave pods in `namespace` untouched
    pub fn excludes_namespace(&self, namespace: &str) -> bool {
        self.excluded_namespace_list()
            .iter()
            .any(|ns| *ns == EXCLUDE_ALL_NAMESPACES || *ns == namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_class(excluded: &str) -> OvercommitClass {
        OvercommitClass::new(
            "gold",
            OvercommitClassSpec {
                cpu_overcommit: 0.5,
                memory_overcommit: 0.8,
                excluded_namespaces: excluded.to_string(),
                is_default: true,
                labels: None,
                annotations: None,
            },
        )
    }

    #[test]
    fn class_yaml_round_trip() {
        let yaml = r#"
apiVersion: overcommit.domain/v1alphav1
kind: OvercommitClass
metadata:
  name: gold
spec:
  cpuOvercommit: 0.5
  memoryOvercommit: 0.8
  excludedNamespaces: "kube-system,cert-manager"
  isDefault: true
"#;
        let class: OvercommitClass = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(class.spec.cpu_overcommit, 0.5);
        assert_eq!(class.spec.memory_overcommit, 0.8);
        assert!(class.spec.is_default);
        assert_eq!(
            class.excluded_namespace_list(),
            vec!["kube-system", "cert-manager"]
        );
    }

    #[test]
    fn empty_exclusion_string_excludes_nothing() {
        let class = sample_class("");
        assert!(class.excluded_namespace_list().is_empty());
        assert!(!class.excludes_namespace("default"));
    }

    #[test]
    fn exclusion_entries_are_trimmed() {
        let class = sample_class(" kube-system , monitoring ");
        assert!(class.excludes_namespace("kube-system"));
        assert!(class.excludes_namespace("monitoring"));
        assert!(!class.excludes_namespace("default"));
    }

    #[test]
    fn wildcard_excludes_every_namespace() {
        let class = sample_class("*");
        assert!(class.excludes_namespace("default"));
        assert!(class.excludes_namespace("kube-system"));
    }

    #[test]
    fn is_default_defaults_to_false() {
        let yaml = r#"
apiVersion: overcommit.domain/v1alphav1
kind: OvercommitClass
metadata:
  name: silver
spec:
  cpuOvercommit: 0.9
  memoryOvercommit: 0.9
  excludedNamespaces: ""
"#;
        let class: OvercommitClass = serde_yaml::from_str(yaml).expect("parse");
        assert!(!class.spec.is_default);
    }
}
