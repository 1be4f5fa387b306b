//! Equality kernel for managed objects
//!
//! Reconciliation only rewrites the attributes the operator owns. This module
//! defines equality over exactly that attribute set, plus
//! [`OwnedAttributes::sync_from`] which copies unequal owned attributes from
//! the desired shape onto the observed object.
//!
//! Two deliberate invariants:
//! - a `None` map and an empty map are NOT equal, so removing a mapping in the
//!   desired shape forces reconciliation
//! - tolerations compare as an order-independent multiset, with
//!   `tolerationSeconds` collapsed to a set/unset bit

use std::collections::{BTreeMap, HashMap, HashSet};

use k8s_openapi::api::admissionregistration::v1::{
    MatchCondition, MutatingWebhook, MutatingWebhookConfiguration, ValidatingWebhook,
    ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, Service, ServicePort, Toleration};

use crate::crd::Certificate;

/// Compare two env var lists as name→value mappings.
///
/// Extra keys on either side make the lists unequal.
pub fn env_vars_equal(a: &[EnvVar], b: &[EnvVar]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let map_a: HashMap<&str, &str> = a
        .iter()
        .map(|env| (env.name.as_str(), env.value.as_deref().unwrap_or("")))
        .collect();
    let map_b: HashMap<&str, &str> = b
        .iter()
        .map(|env| (env.name.as_str(), env.value.as_deref().unwrap_or("")))
        .collect();

    map_a == map_b
}

/// Compare two optional string maps. `None` is never equal to `Some({})`.
pub fn maps_equal(a: Option<&BTreeMap<String, String>>, b: Option<&BTreeMap<String, String>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn toleration_key(tol: &Toleration) -> String {
    let seconds = if tol.toleration_seconds.is_some() {
        "seconds-not-nil"
    } else {
        "seconds-nil"
    };
    format!(
        "{}-{}-{}-{}-{}",
        tol.key.as_deref().unwrap_or(""),
        tol.operator.as_deref().unwrap_or(""),
        tol.value.as_deref().unwrap_or(""),
        tol.effect.as_deref().unwrap_or(""),
        seconds
    )
}

/// Compare two optional toleration lists, order-independently.
///
/// The numeric value of `tolerationSeconds` does not participate; only
/// whether it is set. `None` is never equal to `Some([])`.
pub fn tolerations_equal(a: Option<&Vec<Toleration>>, b: Option<&Vec<Toleration>>) -> bool {
    let (a, b) = match (a, b) {
        (None, None) => return true,
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };

    if a.len() != b.len() {
        return false;
    }

    let keys_a: HashSet<String> = a.iter().map(toleration_key).collect();
    b.iter().all(|tol| keys_a.contains(&toleration_key(tol)))
}

/// Compare two service port lists, keyed by port name.
pub fn ports_equal(a: &[ServicePort], b: &[ServicePort]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let map_a: HashMap<&str, &ServicePort> = a
        .iter()
        .map(|port| (port.name.as_deref().unwrap_or(""), port))
        .collect();

    b.iter().all(|port| {
        map_a
            .get(port.name.as_deref().unwrap_or(""))
            .is_some_and(|other| {
                other.port == port.port
                    && other.target_port == port.target_port
                    && other.protocol == port.protocol
            })
    })
}

/// Compare two DNS name lists as sets.
pub fn dns_names_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    b.iter().all(|name| set_a.contains(name.as_str()))
}

/// Compare two match condition lists, ordered by index.
pub fn match_conditions_equal(a: Option<&Vec<MatchCondition>>, b: Option<&Vec<MatchCondition>>) -> bool {
    let empty = Vec::new();
    let a = a.unwrap_or(&empty);
    let b = b.unwrap_or(&empty);
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| x.name == y.name && x.expression == y.expression)
}

fn client_config_service_equal(
    a: Option<(&str, &str)>,
    b: Option<(&str, &str)>,
) -> bool {
    a == b
}

/// Whether a desired mutating webhook entry differs from the observed one
/// across the attributes the operator owns.
pub fn mutating_webhook_changed(updated: &MutatingWebhook, current: &MutatingWebhook) -> bool {
    if updated.name != current.name {
        return true;
    }
    if updated.rules.as_ref().map_or(0, Vec::len) != current.rules.as_ref().map_or(0, Vec::len) {
        return true;
    }
    let service = |w: &MutatingWebhook| -> Option<(String, String)> {
        w.client_config
            .service
            .as_ref()
            .map(|s| (s.name.clone(), s.namespace.clone()))
    };
    let (us, cs) = (service(updated), service(current));
    if !client_config_service_equal(
        us.as_ref().map(|(n, ns)| (n.as_str(), ns.as_str())),
        cs.as_ref().map(|(n, ns)| (n.as_str(), ns.as_str())),
    ) {
        return true;
    }
    if updated.admission_review_versions != current.admission_review_versions {
        return true;
    }
    !match_conditions_equal(
        updated.match_conditions.as_ref(),
        current.match_conditions.as_ref(),
    )
}

/// Whether a desired validating webhook entry differs from the observed one
/// across the attributes the operator owns.
pub fn validating_webhook_changed(updated: &ValidatingWebhook, current: &ValidatingWebhook) -> bool {
    if updated.name != current.name {
        return true;
    }
    if updated.rules.as_ref().map_or(0, Vec::len) != current.rules.as_ref().map_or(0, Vec::len) {
        return true;
    }
    let service = |w: &ValidatingWebhook| -> Option<(String, String)> {
        w.client_config
            .service
            .as_ref()
            .map(|s| (s.name.clone(), s.namespace.clone()))
    };
    let (us, cs) = (service(updated), service(current));
    if !client_config_service_equal(
        us.as_ref().map(|(n, ns)| (n.as_str(), ns.as_str())),
        cs.as_ref().map(|(n, ns)| (n.as_str(), ns.as_str())),
    ) {
        return true;
    }
    if updated.admission_review_versions != current.admission_review_versions {
        return true;
    }
    !match_conditions_equal(
        updated.match_conditions.as_ref(),
        current.match_conditions.as_ref(),
    )
}

/// Owned-attribute synchronisation for managed objects.
///
/// Implementations copy the attributes the operator owns from `desired` onto
/// `self`, returning true when anything changed. Everything else (server-set
/// fields, attributes other controllers own) is left untouched.
pub trait OwnedAttributes {
    /// Copy unequal owned attributes from `desired`, returning whether any
    /// attribute changed.
    fn sync_from(&mut self, desired: &Self) -> bool;
}

impl OwnedAttributes for Deployment {
    fn sync_from(&mut self, desired: &Self) -> bool {
        if desired.spec.is_none() {
            return false;
        }
        if self.spec.is_none() {
            self.spec = desired.spec.clone();
            return true;
        }
        let (Some(spec), Some(desired_spec)) = (self.spec.as_mut(), desired.spec.as_ref()) else {
            return false;
        };

        let mut updated = false;
        let template = &mut spec.template;
        let desired_template = &desired_spec.template;

        if let (Some(pod), Some(desired_pod)) =
            (template.spec.as_mut(), desired_template.spec.as_ref())
        {
            if let (Some(container), Some(desired_container)) =
                (pod.containers.first_mut(), desired_pod.containers.first())
            {
                if container.image != desired_container.image {
                    container.image = desired_container.image.clone();
                    updated = true;
                }
                if !env_vars_equal(
                    container.env.as_deref().unwrap_or(&[]),
                    desired_container.env.as_deref().unwrap_or(&[]),
                ) {
                    container.env = desired_container.env.clone();
                    updated = true;
                }
            }

            if !maps_equal(
                pod.node_selector.as_ref(),
                desired_pod.node_selector.as_ref(),
            ) {
                pod.node_selector = desired_pod.node_selector.clone();
                updated = true;
            }
            if !tolerations_equal(pod.tolerations.as_ref(), desired_pod.tolerations.as_ref()) {
                pod.tolerations = desired_pod.tolerations.clone();
                updated = true;
            }
        }

        let metadata = template.metadata.get_or_insert_with(Default::default);
        let desired_metadata = desired_template.metadata.clone().unwrap_or_default();
        if !maps_equal(
            metadata.annotations.as_ref(),
            desired_metadata.annotations.as_ref(),
        ) {
            metadata.annotations = desired_metadata.annotations.clone();
            updated = true;
        }
        if !maps_equal(metadata.labels.as_ref(), desired_metadata.labels.as_ref()) {
            metadata.labels = desired_metadata.labels.clone();
            updated = true;
        }

        updated
    }
}

impl OwnedAttributes for Service {
    fn sync_from(&mut self, desired: &Self) -> bool {
        if desired.spec.is_none() {
            return false;
        }
        if self.spec.is_none() {
            self.spec = desired.spec.clone();
            return true;
        }
        let (Some(spec), Some(desired_spec)) = (self.spec.as_mut(), desired.spec.as_ref()) else {
            return false;
        };

        let mut updated = false;

        if !maps_equal(spec.selector.as_ref(), desired_spec.selector.as_ref()) {
            spec.selector = desired_spec.selector.clone();
            updated = true;
        }
        if !ports_equal(
            spec.ports.as_deref().unwrap_or(&[]),
            desired_spec.ports.as_deref().unwrap_or(&[]),
        ) {
            spec.ports = desired_spec.ports.clone();
            updated = true;
        }
        if spec.type_ != desired_spec.type_ {
            spec.type_ = desired_spec.type_.clone();
            updated = true;
        }

        if !maps_equal(
            self.metadata.annotations.as_ref(),
            desired.metadata.annotations.as_ref(),
        ) {
            self.metadata.annotations = desired.metadata.annotations.clone();
            updated = true;
        }
        if !maps_equal(
            self.metadata.labels.as_ref(),
            desired.metadata.labels.as_ref(),
        ) {
            self.metadata.labels = desired.metadata.labels.clone();
            updated = true;
        }

        updated
    }
}

impl OwnedAttributes for Certificate {
    fn sync_from(&mut self, desired: &Self) -> bool {
        let mut updated = false;

        if !dns_names_equal(&self.spec.dns_names, &desired.spec.dns_names) {
            self.spec.dns_names = desired.spec.dns_names.clone();
            updated = true;
        }
        if self.spec.issuer_ref != desired.spec.issuer_ref {
            self.spec.issuer_ref = desired.spec.issuer_ref.clone();
            updated = true;
        }
        if self.spec.secret_name != desired.spec.secret_name {
            self.spec.secret_name = desired.spec.secret_name.clone();
            updated = true;
        }

        if !maps_equal(
            self.metadata.annotations.as_ref(),
            desired.metadata.annotations.as_ref(),
        ) {
            self.metadata.annotations = desired.metadata.annotations.clone();
            updated = true;
        }
        if !maps_equal(
            self.metadata.labels.as_ref(),
            desired.metadata.labels.as_ref(),
        ) {
            self.metadata.labels = desired.metadata.labels.clone();
            updated = true;
        }

        updated
    }
}

impl OwnedAttributes for MutatingWebhookConfiguration {
    fn sync_from(&mut self, desired: &Self) -> bool {
        let mut updated = false;

        if !maps_equal(
            self.metadata.annotations.as_ref(),
            desired.metadata.annotations.as_ref(),
        ) {
            self.metadata.annotations = desired.metadata.annotations.clone();
            updated = true;
        }
        if !maps_equal(
            self.metadata.labels.as_ref(),
            desired.metadata.labels.as_ref(),
        ) {
            self.metadata.labels = desired.metadata.labels.clone();
            updated = true;
        }

        let empty = Vec::new();
        let current = self.webhooks.as_ref().unwrap_or(&empty);
        let target = desired.webhooks.as_ref().unwrap_or(&empty);
        let changed = current.len() != target.len()
            || target
                .iter()
                .zip(current.iter())
                .any(|(t, c)| mutating_webhook_changed(t, c));
        if changed {
            self.webhooks = desired.webhooks.clone();
            updated = true;
        }

        updated
    }
}

impl OwnedAttributes for ValidatingWebhookConfiguration {
    fn sync_from(&mut self, desired: &Self) -> bool {
        let mut updated = false;

        if !maps_equal(
            self.metadata.annotations.as_ref(),
            desired.metadata.annotations.as_ref(),
        ) {
            self.metadata.annotations = desired.metadata.annotations.clone();
            updated = true;
        }
        if !maps_equal(
            self.metadata.labels.as_ref(),
            desired.metadata.labels.as_ref(),
        ) {
            self.metadata.labels = desired.metadata.labels.clone();
            updated = true;
        }

        let empty = Vec::new();
        let current = self.webhooks.as_ref().unwrap_or(&empty);
        let target = desired.webhooks.as_ref().unwrap_or(&empty);
        let changed = current.len() != target.len()
            || target
                .iter()
                .zip(current.iter())
                .any(|(t, c)| validating_webhook_changed(t, c));
        if changed {
            self.webhooks = desired.webhooks.clone();
            updated = true;
        }

        updated
    }
}

impl OwnedAttributes for crate::crd::Issuer {
    fn sync_from(&mut self, desired: &Self) -> bool {
        if self.spec != desired.spec {
            self.spec = desired.spec.clone();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    fn toleration(key: &str, seconds: Option<i64>) -> Toleration {
        Toleration {
            key: Some(key.to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoExecute".to_string()),
            toleration_seconds: seconds,
            ..Default::default()
        }
    }

    #[test]
    fn env_vars_equal_by_mapping() {
        let a = vec![env("A", "1"), env("B", "2")];
        let b = vec![env("B", "2"), env("A", "1")];
        assert!(env_vars_equal(&a, &b));
    }

    #[test]
    fn env_vars_extra_key_breaks_equality() {
        let a = vec![env("A", "1")];
        let b = vec![env("A", "1"), env("B", "2")];
        assert!(!env_vars_equal(&a, &b));
        assert!(!env_vars_equal(&b, &a));
    }

    #[test]
    fn env_vars_value_change_breaks_equality() {
        let a = vec![env("A", "1")];
        let b = vec![env("A", "2")];
        assert!(!env_vars_equal(&a, &b));
    }

    #[test]
    fn maps_nil_vs_empty_not_equal() {
        let empty = BTreeMap::new();
        assert!(maps_equal(None, None));
        assert!(!maps_equal(None, Some(&empty)));
        assert!(!maps_equal(Some(&empty), None));
        assert!(maps_equal(Some(&empty), Some(&empty)));
    }

    #[test]
    fn tolerations_both_nil_equal() {
        assert!(tolerations_equal(None, None));
    }

    #[test]
    fn tolerations_nil_vs_empty_not_equal() {
        let empty = Vec::new();
        assert!(!tolerations_equal(None, Some(&empty)));
    }

    #[test]
    fn tolerations_permutation_invariant() {
        let a = vec![
            toleration("node.kubernetes.io/not-ready", None),
            toleration("node.kubernetes.io/unreachable", None),
        ];
        let reversed: Vec<_> = a.iter().rev().cloned().collect();
        assert!(tolerations_equal(Some(&a), Some(&reversed)));
    }

    #[test]
    fn tolerations_different_keys_not_equal() {
        let a = vec![toleration("node.kubernetes.io/not-ready", None)];
        let b = vec![toleration("node.kubernetes.io/unreachable", None)];
        assert!(!tolerations_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn tolerations_different_lengths_not_equal() {
        let a = vec![toleration("a", None)];
        let b = vec![toleration("a", None), toleration("b", None)];
        assert!(!tolerations_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn toleration_seconds_collapsed_to_presence_bit() {
        // Known deviation: the numeric value does not participate.
        let a = vec![toleration("a", Some(30))];
        let b = vec![toleration("a", Some(600))];
        assert!(tolerations_equal(Some(&a), Some(&b)));

        let unset = vec![toleration("a", None)];
        assert!(!tolerations_equal(Some(&a), Some(&unset)));
    }

    fn port(name: &str, port_number: i32) -> ServicePort {
        ServicePort {
            name: Some(name.to_string()),
            port: port_number,
            target_port: Some(
                k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(8443),
            ),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn ports_equal_keyed_by_name() {
        let a = vec![port("https", 443), port("metrics", 9090)];
        let b = vec![port("metrics", 9090), port("https", 443)];
        assert!(ports_equal(&a, &b));
    }

    #[test]
    fn ports_number_change_breaks_equality() {
        let a = vec![port("https", 443)];
        let b = vec![port("https", 8443)];
        assert!(!ports_equal(&a, &b));
    }

    #[test]
    fn dns_names_order_independent() {
        let a = vec!["a.svc".to_string(), "b.svc".to_string()];
        let b = vec!["b.svc".to_string(), "a.svc".to_string()];
        assert!(dns_names_equal(&a, &b));
        assert!(!dns_names_equal(&a, &a[..1].to_vec()));
    }

    #[test]
    fn match_conditions_compared_in_order() {
        let cond = |name: &str, expr: &str| MatchCondition {
            name: name.to_string(),
            expression: expr.to_string(),
        };
        let a = vec![cond("x", "true"), cond("y", "false")];
        let same = a.clone();
        let reordered = vec![cond("y", "false"), cond("x", "true")];
        assert!(match_conditions_equal(Some(&a), Some(&same)));
        assert!(!match_conditions_equal(Some(&a), Some(&reordered)));
        assert!(match_conditions_equal(None, None));
    }

    mod owned_attributes {
        use super::*;
        use crate::crd::{Overcommit, OvercommitSpec, WorkloadShape};
        use crate::resources;

        fn sample_overcommit() -> Overcommit {
            Overcommit::new(
                "cluster",
                OvercommitSpec {
                    label: "overcommit.domain/class".to_string(),
                    deployment: WorkloadShape::default(),
                },
            )
        }

        #[test]
        fn deployment_sync_is_reflexive() {
            let desired = resources::class_controller_deployment(&sample_overcommit());
            let mut observed = desired.clone();
            assert!(!observed.sync_from(&desired));
            assert_eq!(observed, desired);
        }

        #[test]
        fn deployment_image_flip_is_detected() {
            let desired = resources::class_controller_deployment(&sample_overcommit());
            let mut observed = desired.clone();
            observed
                .spec
                .as_mut()
                .unwrap()
                .template
                .spec
                .as_mut()
                .unwrap()
                .containers[0]
                .image = Some("stale:0.0.1".to_string());
            assert!(observed.sync_from(&desired));
            assert_eq!(
                observed.spec.unwrap().template.spec.unwrap().containers[0].image,
                desired.spec.unwrap().template.spec.unwrap().containers[0].image
            );
        }

        #[test]
        fn deployment_node_selector_flip_is_detected() {
            let desired = resources::class_controller_deployment(&sample_overcommit());
            let mut observed = desired.clone();
            observed
                .spec
                .as_mut()
                .unwrap()
                .template
                .spec
                .as_mut()
                .unwrap()
                .node_selector = Some(BTreeMap::from([("zone".to_string(), "a".to_string())]));
            assert!(observed.sync_from(&desired));
        }

        #[test]
        fn service_type_flip_is_detected() {
            let desired = resources::workload_service("gold", "overcommit-system");
            let mut observed = desired.clone();
            observed.spec.as_mut().unwrap().type_ = Some("NodePort".to_string());
            assert!(observed.sync_from(&desired));
            assert_eq!(
                observed.spec.as_ref().unwrap().type_,
                desired.spec.as_ref().unwrap().type_
            );
        }

        #[test]
        fn certificate_secret_flip_is_detected() {
            let desired = resources::workload_certificate("gold", "overcommit-system");
            let mut observed = desired.clone();
            observed.spec.secret_name = "wrong-tls".to_string();
            assert!(observed.sync_from(&desired));
            assert_eq!(observed.spec.secret_name, desired.spec.secret_name);
        }
    }
}
