//! Webhook configuration templates
//!
//! Every configuration declares `admissionReviewVersions: ["v1"]` and routes
//! to the workload's service over HTTPS. The per-class mutating configuration
//! carries a CEL match condition so the API server filters excluded
//! namespaces before they ever reach the mutator.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MatchCondition, MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations,
    ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;

use crate::crd::OvercommitClass;
use crate::GROUP;

use super::{
    certificate_name, service_name, webhook_config_name, CLASS_VALIDATOR_NAME, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE, POD_MUTATOR_NAME,
};

/// Path served by the class validator
pub const VALIDATE_CLASS_PATH: &str = "/validate-overcommitclass";

/// Path served by the singleton validator
pub const VALIDATE_OVERCOMMIT_PATH: &str = "/validate-overcommit";

/// Path served by the pod mutator
pub const MUTATE_POD_PATH: &str = "/mutate-pod";

fn config_metadata(
    workload: &str,
    namespace: &str,
    extra_labels: Option<&BTreeMap<String, String>>,
    extra_annotations: Option<&BTreeMap<String, String>>,
) -> ObjectMeta {
    let mut labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]);
    if let Some(extra) = extra_labels {
        labels.extend(extra.clone());
    }

    // cert-manager injects the CA bundle for us
    let mut annotations = BTreeMap::from([(
        "cert-manager.io/inject-ca-from".to_string(),
        format!("{namespace}/{}", certificate_name(workload)),
    )]);
    if let Some(extra) = extra_annotations {
        annotations.extend(extra.clone());
    }

    ObjectMeta {
        name: Some(webhook_config_name(workload)),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    }
}

fn client_config(workload: &str, namespace: &str, path: &str) -> WebhookClientConfig {
    WebhookClientConfig {
        service: Some(ServiceReference {
            name: service_name(workload),
            namespace: namespace.to_string(),
            path: Some(path.to_string()),
            port: Some(443),
        }),
        ..Default::default()
    }
}

/// Validating webhook configuration guarding both custom resources.
///
/// Failure policy is `Fail`: a broken validator must not let malformed policy
/// into the cluster.
pub fn class_validator_webhook_config(namespace: &str) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: config_metadata(CLASS_VALIDATOR_NAME, namespace, None, None),
        webhooks: Some(vec![
            ValidatingWebhook {
                name: format!("overcommitclasses.{GROUP}"),
                admission_review_versions: vec!["v1".to_string()],
                side_effects: "None".to_string(),
                failure_policy: Some("Fail".to_string()),
                rules: Some(vec![RuleWithOperations {
                    operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
                    api_groups: Some(vec![GROUP.to_string()]),
                    api_versions: Some(vec![crate::VERSION.to_string()]),
                    resources: Some(vec!["overcommitclasses".to_string()]),
                    scope: Some("Cluster".to_string()),
                }]),
                client_config: client_config(CLASS_VALIDATOR_NAME, namespace, VALIDATE_CLASS_PATH),
                ..Default::default()
            },
            ValidatingWebhook {
                name: format!("overcommits.{GROUP}"),
                admission_review_versions: vec!["v1".to_string()],
                side_effects: "None".to_string(),
                failure_policy: Some("Fail".to_string()),
                rules: Some(vec![RuleWithOperations {
                    operations: Some(vec!["CREATE".to_string()]),
                    api_groups: Some(vec![GROUP.to_string()]),
                    api_versions: Some(vec![crate::VERSION.to_string()]),
                    resources: Some(vec!["overcommits".to_string()]),
                    scope: Some("Cluster".to_string()),
                }]),
                client_config: client_config(
                    CLASS_VALIDATOR_NAME,
                    namespace,
                    VALIDATE_OVERCOMMIT_PATH,
                ),
                ..Default::default()
            },
        ]),
    }
}

fn pod_create_rule() -> RuleWithOperations {
    RuleWithOperations {
        operations: Some(vec!["CREATE".to_string()]),
        api_groups: Some(vec!["".to_string()]),
        api_versions: Some(vec!["v1".to_string()]),
        resources: Some(vec!["pods".to_string()]),
        scope: Some("Namespaced".to_string()),
    }
}

/// Mutating webhook configuration for the cluster-wide pod mutator.
///
/// Failure policy is `Ignore`: blocking pod admission on operator errors would
/// be worse than leaving requests unmodified.
pub fn pod_mutator_webhook_config(namespace: &str) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: config_metadata(POD_MUTATOR_NAME, namespace, None, None),
        webhooks: Some(vec![MutatingWebhook {
            name: format!("pods.{GROUP}"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Ignore".to_string()),
            rules: Some(vec![pod_create_rule()]),
            client_config: client_config(POD_MUTATOR_NAME, namespace, MUTATE_POD_PATH),
            ..Default::default()
        }]),
    }
}

/// CEL match conditions excluding the class's namespaces at the API server.
///
/// `*` compiles to a never-matching condition; an empty exclusion list yields
/// no conditions at all.
pub fn exclusion_match_conditions(class: &OvercommitClass) -> Option<Vec<MatchCondition>> {
    let excluded = class.excluded_namespace_list();
    if excluded.is_empty() {
        return None;
    }

    let expression = if excluded.contains(&crate::crd::EXCLUDE_ALL_NAMESPACES) {
        "false".to_string()
    } else {
        let quoted: Vec<String> = excluded.iter().map(|ns| format!("\"{ns}\"")).collect();
        format!("!(request.namespace in [{}])", quoted.join(", "))
    };

    Some(vec![MatchCondition {
        name: "exclude-namespaces".to_string(),
        expression,
    }])
}

/// Mutating webhook configuration for one class's dedicated webhook.
///
/// The object selector narrows it to pods carrying the class's policy label;
/// excluded namespaces are filtered by CEL before the mutator is called.
pub fn class_webhook_config(
    class: &OvercommitClass,
    class_name: &str,
    namespace: &str,
    label: &str,
) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: config_metadata(
            class_name,
            namespace,
            class.spec.labels.as_ref(),
            class.spec.annotations.as_ref(),
        ),
        webhooks: Some(vec![MutatingWebhook {
            name: format!("{class_name}.{GROUP}"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Ignore".to_string()),
            rules: Some(vec![pod_create_rule()]),
            match_conditions: exclusion_match_conditions(class),
            object_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    label.to_string(),
                    class_name.to_string(),
                )])),
                ..Default::default()
            }),
            client_config: client_config(class_name, namespace, MUTATE_POD_PATH),
            ..Default::default()
        }]),
    }
}
