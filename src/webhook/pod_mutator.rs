//! Pod mutation webhook
//!
//! For every pod create, selects exactly one OvercommitClass and rewrites
//! container resource requests to ratio x limits. Class selection is
//! deterministic:
//!
//! 1. a pod labelled with the policy label gets the class of that name, and
//!    is rejected when no such class exists
//! 2. an unlabelled pod gets the unique default class, or passes through
//!    unchanged when none exists
//!
//! Namespace exclusion is enforced inline here, redundantly with the CEL
//! match conditions on the webhook configuration. Internal failures admit the
//! pod unchanged: blocking pod admission on operator errors would be worse
//! than leaving requests unmodified.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, PatchOperation};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::ResourceExt;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::crd::OvercommitClass;
use crate::metrics::{record_pod_mutation, MutationOutcome};
use crate::quantity::{
    format_cpu_millicores, format_memory_bytes, parse_cpu_millicores, parse_memory_bytes,
    round_half_even,
};
use crate::Error;

use super::MutatorState;

/// Handle `POST /mutate-pod`
pub async fn mutate_pod_handler(
    State(state): State<Arc<MutatorState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = match mutate_pod(&state, &request) {
        Ok(response) => response,
        Err(err) => {
            // Fail-open: admit unchanged.
            let pod = request
                .object
                .as_ref()
                .map(|o| o.name_any())
                .unwrap_or_default();
            warn!(pod = %pod, error = %err, "pod mutation failed, admitting unchanged");
            record_pod_mutation(MutationOutcome::Error);
            AdmissionResponse::from(&request)
        }
    };

    Json(response.into_review())
}

fn mutate_pod(
    state: &MutatorState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionResponse, Error> {
    let Some(pod) = request.object.as_ref() else {
        debug!(uid = %request.uid, "no pod in request, allowing unchanged");
        record_pod_mutation(MutationOutcome::Skipped);
        return Ok(AdmissionResponse::from(request));
    };

    let namespace = request.namespace.as_deref().unwrap_or("default");
    let classes = state.store.state();

    let label_value = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(&state.label))
        .cloned();

    let selected = match select_class(&classes, label_value.as_deref()) {
        Selection::Matched(class) => class,
        Selection::Unknown(value) => {
            info!(uid = %request.uid, class = %value, "pod names an unknown class, rejecting");
            record_pod_mutation(MutationOutcome::UnknownClass);
            let mut response = AdmissionResponse::from(request)
                .deny(format!("no OvercommitClass named \"{value}\" exists"));
            response.result.reason = "UnknownClass".to_string();
            return Ok(response);
        }
        Selection::NoMatch => {
            debug!(uid = %request.uid, "no label and no default class, allowing unchanged");
            record_pod_mutation(MutationOutcome::Skipped);
            return Ok(AdmissionResponse::from(request));
        }
    };

    if selected.excludes_namespace(namespace) {
        debug!(
            uid = %request.uid,
            namespace = %namespace,
            class = %selected.name_any(),
            "namespace excluded by class, allowing unchanged"
        );
        record_pod_mutation(MutationOutcome::ExcludedNamespace);
        return Ok(AdmissionResponse::from(request));
    }

    let patches = build_request_patches(
        &pod.data,
        selected.spec.cpu_overcommit,
        selected.spec.memory_overcommit,
    );

    if patches.is_empty() {
        record_pod_mutation(MutationOutcome::Skipped);
        return Ok(AdmissionResponse::from(request));
    }

    info!(
        uid = %request.uid,
        class = %selected.name_any(),
        patch_ops = patches.len(),
        "rewriting pod resource requests"
    );
    record_pod_mutation(MutationOutcome::Rewritten);
    Ok(AdmissionResponse::from(request).with_patch(json_patch::Patch(patches))?)
}

/// Outcome of class selection for one pod
pub enum Selection {
    /// Exactly one class applies
    Matched(Arc<OvercommitClass>),
    /// The pod named a class that does not exist
    Unknown(String),
    /// No label and no default class; the pod passes through unchanged
    NoMatch,
}

/// Pick exactly one class for a pod.
///
/// A labelled pod gets the class named by the label value; an unlabelled pod
/// gets the unique default class.
pub fn select_class(classes: &[Arc<OvercommitClass>], label_value: Option<&str>) -> Selection {
    match label_value {
        Some(value) => match classes.iter().find(|c| c.name_any() == value) {
            Some(class) => Selection::Matched(class.clone()),
            None => Selection::Unknown(value.to_string()),
        },
        None => match classes.iter().find(|c| c.spec.is_default) {
            Some(class) => Selection::Matched(class.clone()),
            None => Selection::NoMatch,
        },
    }
}

/// Build the JSON patch rewriting requests to ratio x limits.
///
/// Init containers follow the same rule; ephemeral containers are never
/// rewritten. Only changed request entries appear in the patch, so running
/// the mutator twice over the same pod yields the same result.
pub fn build_request_patches(pod: &Value, cpu_ratio: f64, memory_ratio: f64) -> Vec<PatchOperation> {
    let mut patches = Vec::new();

    for group in ["containers", "initContainers"] {
        let Some(containers) = pod
            .get("spec")
            .and_then(|spec| spec.get(group))
            .and_then(Value::as_array)
        else {
            continue;
        };

        for (index, container) in containers.iter().enumerate() {
            container_patches(
                group,
                index,
                container,
                cpu_ratio,
                memory_ratio,
                &mut patches,
            );
        }
    }

    patches
}

fn container_patches(
    group: &str,
    index: usize,
    container: &Value,
    cpu_ratio: f64,
    memory_ratio: f64,
    patches: &mut Vec<PatchOperation>,
) {
    let Some(resources) = container.get("resources") else {
        return;
    };
    let Some(limits) = resources.get("limits") else {
        return;
    };
    let requests = resources.get("requests");

    let mut entries: Vec<(&str, String)> = Vec::new();

    for (resource, ratio) in [("cpu", cpu_ratio), ("memory", memory_ratio)] {
        let Some(limit) = limits.get(resource).and_then(|v| parse_quantity(resource, v)) else {
            continue;
        };

        let target = round_half_even(limit * ratio);
        let current = requests
            .and_then(|r| r.get(resource))
            .and_then(|v| parse_quantity(resource, v))
            .map(round_half_even);

        if current == Some(target) {
            continue;
        }

        let formatted = match resource {
            "cpu" => format_cpu_millicores(target),
            _ => format_memory_bytes(target),
        };
        entries.push((resource, formatted));
    }

    if entries.is_empty() {
        return;
    }

    let index = index.to_string();
    if requests.is_none() {
        let value: Map<String, Value> = entries
            .into_iter()
            .map(|(resource, quantity)| (resource.to_string(), Value::String(quantity)))
            .collect();
        patches.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", group, &index, "resources", "requests"]),
            value: Value::Object(value),
        }));
    } else {
        for (resource, quantity) in entries {
            patches.push(PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens([
                    "spec", group, &index, "resources", "requests", resource,
                ]),
                value: Value::String(quantity),
            }));
        }
    }
}

/// Parse a quantity value from a pod spec, where cpu normalises to
/// millicores and memory to bytes. Plain JSON numbers are whole cores and
/// bytes respectively.
fn parse_quantity(resource: &str, value: &Value) -> Option<f64> {
    match (resource, value) {
        ("cpu", Value::String(s)) => parse_cpu_millicores(s),
        ("cpu", Value::Number(n)) => n.as_f64().map(|v| v * 1000.0),
        (_, Value::String(s)) => parse_memory_bytes(s),
        (_, Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}
