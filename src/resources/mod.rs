//! Desired-state templater for managed objects
//!
//! Pure, deterministic builders: given the same policy object (and process
//! environment) they produce identical desired shapes. Names are stable and
//! derivable - a class's workload shares the class name, and the service,
//! certificate, TLS secret and webhook configuration all derive from the
//! workload name.

mod certificate;
mod webhook;
mod workload;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{Issuer, Overcommit, OvercommitClass};
use crate::{operator_namespace, WEBHOOK_PORT};

pub use certificate::workload_certificate;
pub use webhook::{
    class_webhook_config, exclusion_match_conditions, MUTATE_POD_PATH, VALIDATE_CLASS_PATH,
    VALIDATE_OVERCOMMIT_PATH,
};
pub use workload::operator_image;

use webhook::{class_validator_webhook_config, pod_mutator_webhook_config};
use workload::{workload_deployment, WorkloadParams};

/// Name of the operator's self-signed issuer
pub const ISSUER_NAME: &str = "overcommit-issuer";

/// Name of the class validator workload
pub const CLASS_VALIDATOR_NAME: &str = "overcommit-class-validator";

/// Name of the cluster-wide pod mutator workload
pub const POD_MUTATOR_NAME: &str = "overcommit-pod-mutator";

/// Name of the class sub-controller workload
pub const CLASS_CONTROLLER_NAME: &str = "overcommit-class-controller";

/// Label marking objects managed by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "overcommit-operator";

/// Service name derived from a workload name
pub fn service_name(workload: &str) -> String {
    format!("{workload}-service")
}

/// Certificate name derived from a workload name
pub fn certificate_name(workload: &str) -> String {
    format!("{workload}-certificate")
}

/// TLS secret name derived from a workload name
pub fn tls_secret_name(workload: &str) -> String {
    format!("{workload}-tls")
}

/// Webhook configuration name derived from a workload name
pub fn webhook_config_name(workload: &str) -> String {
    format!("{workload}-webhook")
}

/// A workload stack fronted by a validating webhook configuration
pub struct ValidatingStack {
    /// Webhook backend deployment
    pub deployment: Deployment,
    /// Service routing admission traffic to the deployment
    pub service: Service,
    /// Certificate for the service's TLS identity
    pub certificate: crate::crd::Certificate,
    /// The validating webhook configuration itself
    pub webhook: ValidatingWebhookConfiguration,
}

/// A workload stack fronted by a mutating webhook configuration
pub struct MutatingStack {
    /// Webhook backend deployment
    pub deployment: Deployment,
    /// Service routing admission traffic to the deployment
    pub service: Service,
    /// Certificate for the service's TLS identity
    pub certificate: crate::crd::Certificate,
    /// The mutating webhook configuration itself
    pub webhook: MutatingWebhookConfiguration,
}

/// Desired shape of the operator's self-signed issuer
pub fn generate_issuer() -> Issuer {
    certificate::generate_issuer(&operator_namespace())
}

/// ClusterIP service routing admission traffic to a webhook workload
pub fn workload_service(workload: &str, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(service_name(workload)),
            namespace: Some(namespace.to_string()),
            labels: Some(
                [(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())].into(),
            ),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some([("app".to_string(), workload.to_string())].into()),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: 443,
                target_port: Some(IntOrString::Int(i32::from(WEBHOOK_PORT))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Desired stack for the OvercommitClass/Overcommit validator
pub fn class_validator_stack(overcommit: &Overcommit) -> ValidatingStack {
    let namespace = operator_namespace();
    ValidatingStack {
        deployment: workload_deployment(WorkloadParams {
            name: CLASS_VALIDATOR_NAME,
            namespace: &namespace,
            args: vec!["class-validator".to_string()],
            env: Vec::new(),
            shape: &overcommit.spec.deployment,
            extra_labels: None,
            extra_annotations: None,
            serves_webhook: true,
        }),
        service: workload_service(CLASS_VALIDATOR_NAME, &namespace),
        certificate: workload_certificate(CLASS_VALIDATOR_NAME, &namespace),
        webhook: class_validator_webhook_config(&namespace),
    }
}

/// Desired stack for the cluster-wide pod mutator
pub fn pod_mutator_stack(overcommit: &Overcommit, label: &str) -> MutatingStack {
    let namespace = operator_namespace();
    MutatingStack {
        deployment: workload_deployment(WorkloadParams {
            name: POD_MUTATOR_NAME,
            namespace: &namespace,
            args: vec!["pod-mutator".to_string()],
            env: vec![label_env(label)],
            shape: &overcommit.spec.deployment,
            extra_labels: None,
            extra_annotations: None,
            serves_webhook: true,
        }),
        service: workload_service(POD_MUTATOR_NAME, &namespace),
        certificate: workload_certificate(POD_MUTATOR_NAME, &namespace),
        webhook: pod_mutator_webhook_config(&namespace),
    }
}

/// Desired stack for one class's dedicated mutating webhook.
///
/// The workload name is the class name.
pub fn class_workload_stack(
    class: &OvercommitClass,
    overcommit_shape: &crate::crd::WorkloadShape,
    label: &str,
) -> MutatingStack {
    let namespace = operator_namespace();
    let name = class.name_any();
    MutatingStack {
        deployment: workload_deployment(WorkloadParams {
            name: &name,
            namespace: &namespace,
            args: vec!["pod-mutator".to_string()],
            env: vec![label_env(label)],
            shape: overcommit_shape,
            extra_labels: class.spec.labels.as_ref(),
            extra_annotations: class.spec.annotations.as_ref(),
            serves_webhook: true,
        }),
        service: workload_service(&name, &namespace),
        certificate: workload_certificate(&name, &namespace),
        webhook: class_webhook_config(class, &name, &namespace, label),
    }
}

/// Desired deployment for the class sub-controller.
///
/// Image coordinates and the operator namespace are passed through so the
/// sub-controller templates identical workloads.
pub fn class_controller_deployment(overcommit: &Overcommit) -> Deployment {
    let namespace = operator_namespace();
    let mut env = vec![EnvVar {
        name: "OPERATOR_NAMESPACE".to_string(),
        value: Some(namespace.clone()),
        ..Default::default()
    }];
    for var in ["IMAGE_REGISTRY", "IMAGE_REPOSITORY", "APP_VERSION"] {
        if let Ok(value) = std::env::var(var) {
            env.push(EnvVar {
                name: var.to_string(),
                value: Some(value),
                ..Default::default()
            });
        }
    }

    workload_deployment(WorkloadParams {
        name: CLASS_CONTROLLER_NAME,
        namespace: &namespace,
        args: vec!["class-controller".to_string()],
        env,
        shape: &overcommit.spec.deployment,
        extra_labels: None,
        extra_annotations: None,
        serves_webhook: false,
    })
}

fn label_env(label: &str) -> EnvVar {
    EnvVar {
        name: "OVERCOMMIT_LABEL".to_string(),
        value: Some(label.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{OvercommitClassSpec, OvercommitSpec, WorkloadShape};
    use crate::DEFAULT_CLASS_LABEL;

    fn sample_overcommit() -> Overcommit {
        Overcommit::new(
            "cluster",
            OvercommitSpec {
                label: DEFAULT_CLASS_LABEL.to_string(),
                deployment: WorkloadShape {
                    replicas: Some(2),
                    ..Default::default()
                },
            },
        )
    }

    fn sample_class(name: &str, excluded: &str) -> OvercommitClass {
        OvercommitClass::new(
            name,
            OvercommitClassSpec {
                cpu_overcommit: 0.5,
                memory_overcommit: 0.8,
                excluded_namespaces: excluded.to_string(),
                is_default: false,
                labels: None,
                annotations: None,
            },
        )
    }

    #[test]
    fn templater_is_pure() {
        let overcommit = sample_overcommit();
        let a = class_validator_stack(&overcommit);
        let b = class_validator_stack(&overcommit);
        assert_eq!(a.deployment, b.deployment);
        assert_eq!(a.service, b.service);
        assert_eq!(a.certificate, b.certificate);
        assert_eq!(a.webhook, b.webhook);
    }

    #[test]
    fn names_derive_from_workload_name() {
        assert_eq!(service_name("gold"), "gold-service");
        assert_eq!(certificate_name("gold"), "gold-certificate");
        assert_eq!(tls_secret_name("gold"), "gold-tls");
        assert_eq!(webhook_config_name("gold"), "gold-webhook");
    }

    #[test]
    fn class_stack_workload_shares_class_name() {
        let class = sample_class("gold", "");
        let stack = class_workload_stack(&class, &WorkloadShape::default(), DEFAULT_CLASS_LABEL);
        assert_eq!(stack.deployment.metadata.name.as_deref(), Some("gold"));
        assert_eq!(
            stack.service.metadata.name.as_deref(),
            Some("gold-service")
        );
        assert_eq!(
            stack.certificate.metadata.name.as_deref(),
            Some("gold-certificate")
        );
        assert_eq!(
            stack.webhook.metadata.name.as_deref(),
            Some("gold-webhook")
        );
    }

    #[test]
    fn webhook_configs_declare_v1_review_and_pod_create_rule() {
        let class = sample_class("gold", "");
        let stack = class_workload_stack(&class, &WorkloadShape::default(), DEFAULT_CLASS_LABEL);
        let webhooks = stack.webhook.webhooks.expect("webhooks");
        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].admission_review_versions, vec!["v1"]);

        let rules = webhooks[0].rules.as_ref().expect("rules");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resources.as_deref(), Some(&["pods".to_string()][..]));
        assert_eq!(
            rules[0].operations.as_deref(),
            Some(&["CREATE".to_string()][..])
        );
    }

    #[test]
    fn exclusion_cel_lists_namespaces() {
        let class = sample_class("gold", "kube-system, cert-manager");
        let conditions = exclusion_match_conditions(&class).expect("conditions");
        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].expression,
            "!(request.namespace in [\"kube-system\", \"cert-manager\"])"
        );
    }

    #[test]
    fn exclusion_wildcard_never_matches() {
        let class = sample_class("gold", "*");
        let conditions = exclusion_match_conditions(&class).expect("conditions");
        assert_eq!(conditions[0].expression, "false");
    }

    #[test]
    fn no_exclusions_means_no_conditions() {
        let class = sample_class("gold", "");
        assert!(exclusion_match_conditions(&class).is_none());
    }

    #[test]
    fn class_webhook_selects_labelled_pods() {
        let class = sample_class("gold", "");
        let stack = class_workload_stack(&class, &WorkloadShape::default(), DEFAULT_CLASS_LABEL);
        let webhooks = stack.webhook.webhooks.expect("webhooks");
        let selector = webhooks[0]
            .object_selector
            .as_ref()
            .and_then(|s| s.match_labels.as_ref())
            .expect("object selector");
        assert_eq!(selector.get(DEFAULT_CLASS_LABEL).map(String::as_str), Some("gold"));
    }

    #[test]
    fn validator_config_fails_closed_mutator_fails_open() {
        let overcommit = sample_overcommit();
        let validator = class_validator_stack(&overcommit);
        for webhook in validator.webhook.webhooks.as_deref().unwrap_or(&[]) {
            assert_eq!(webhook.failure_policy.as_deref(), Some("Fail"));
        }

        let mutator = pod_mutator_stack(&overcommit, DEFAULT_CLASS_LABEL);
        for webhook in mutator.webhook.webhooks.as_deref().unwrap_or(&[]) {
            assert_eq!(webhook.failure_policy.as_deref(), Some("Ignore"));
        }
    }

    #[test]
    fn replicas_follow_singleton_shape() {
        let overcommit = sample_overcommit();
        let stack = pod_mutator_stack(&overcommit, DEFAULT_CLASS_LABEL);
        assert_eq!(
            stack.deployment.spec.as_ref().and_then(|s| s.replicas),
            Some(2)
        );
    }

    #[test]
    fn certificate_covers_service_dns_names() {
        let certificate = workload_certificate("gold", "overcommit-system");
        assert!(certificate
            .spec
            .dns_names
            .contains(&"gold-service.overcommit-system.svc".to_string()));
        assert_eq!(certificate.spec.secret_name, "gold-tls");
        assert_eq!(certificate.spec.issuer_ref.name, ISSUER_NAME);
    }
}
