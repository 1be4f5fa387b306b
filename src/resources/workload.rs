//! Deployment templates for managed workloads

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;

use crate::crd::WorkloadShape;
use crate::WEBHOOK_PORT;

use super::{tls_secret_name, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Resolved image reference for managed workloads.
///
/// Coordinates come from the `IMAGE_REGISTRY`, `IMAGE_REPOSITORY` and
/// `APP_VERSION` environment variables, falling back to the shape declared on
/// the singleton.
pub fn operator_image(shape: &WorkloadShape) -> String {
    let registry = std::env::var("IMAGE_REGISTRY")
        .ok()
        .or_else(|| shape.image_registry.clone())
        .unwrap_or_default();
    let repository = std::env::var("IMAGE_REPOSITORY")
        .ok()
        .or_else(|| shape.image_repository.clone())
        .unwrap_or_default();
    let tag = std::env::var("APP_VERSION")
        .ok()
        .or_else(|| shape.image_tag.clone())
        .unwrap_or_default();
    format!("{registry}/{repository}:{tag}")
}

/// Parameters for one managed workload deployment
pub(super) struct WorkloadParams<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub shape: &'a WorkloadShape,
    /// Extra metadata labels/annotations propagated from the owning policy object
    pub extra_labels: Option<&'a BTreeMap<String, String>>,
    pub extra_annotations: Option<&'a BTreeMap<String, String>>,
    /// Whether the workload terminates TLS from the derived certificate secret
    pub serves_webhook: bool,
}

pub(super) fn workload_deployment(params: WorkloadParams<'_>) -> Deployment {
    let WorkloadParams {
        name,
        namespace,
        args,
        env,
        shape,
        extra_labels,
        extra_annotations,
        serves_webhook,
    } = params;

    let mut labels = BTreeMap::from([
        ("app".to_string(), name.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ]);
    if let Some(extra) = extra_labels {
        labels.extend(extra.clone());
    }
    if let Some(extra) = shape.labels.as_ref() {
        labels.extend(extra.clone());
    }

    let mut annotations = extra_annotations.cloned().unwrap_or_default();
    if let Some(extra) = shape.annotations.as_ref() {
        annotations.extend(extra.clone());
    }
    let annotations = if annotations.is_empty() {
        None
    } else {
        Some(annotations)
    };

    let (volumes, volume_mounts, ports) = if serves_webhook {
        (
            Some(vec![Volume {
                name: "tls".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(tls_secret_name(name)),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            Some(vec![VolumeMount {
                name: "tls".to_string(),
                mount_path: "/etc/webhook/tls".to_string(),
                read_only: Some(true),
                ..Default::default()
            }]),
            Some(vec![ContainerPort {
                name: Some("https".to_string()),
                container_port: i32::from(WEBHOOK_PORT),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
        )
    } else {
        (None, None, None)
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: annotations.clone(),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(shape.replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    name.to_string(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(operator_image(shape)),
                        args: Some(args),
                        env: if env.is_empty() { None } else { Some(env) },
                        ports,
                        volume_mounts,
                        ..Default::default()
                    }],
                    volumes,
                    node_selector: shape.node_selector.clone(),
                    tolerations: shape.tolerations.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
