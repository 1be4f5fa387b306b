//! Admission validation for OvercommitClass and the Overcommit singleton
//!
//! Guards the policy objects at admission time:
//! - overcommit ratios must lie in [0.0001, 1], bounds inclusive
//! - at most one class may be the default
//! - the excluded-namespaces string must parse
//! - the singleton must carry the reserved name `cluster`
//!
//! Rejections carry a stable reason code and a message echoing the offending
//! field.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use kube::api::{Api, ListParams};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::ResourceExt;
use tracing::{error, info, warn};

use crate::crd::{Overcommit, OvercommitClass, MAX_OVERCOMMIT_RATIO, MIN_OVERCOMMIT_RATIO};
use crate::metrics::{record_class_validation, ValidationOutcome};
use crate::SINGLETON_NAME;

use super::ValidatorState;

/// A single admission verdict with its stable reason code
struct Verdict {
    outcome: ValidationOutcome,
    message: Option<String>,
}

impl Verdict {
    fn allow() -> Self {
        Self {
            outcome: ValidationOutcome::Allowed,
            message: None,
        }
    }

    fn reject(outcome: ValidationOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: Some(message.into()),
        }
    }

    fn reason(&self) -> &'static str {
        match self.outcome {
            ValidationOutcome::Allowed => "Allowed",
            ValidationOutcome::RatioOutOfRange => "RatioOutOfRange",
            ValidationOutcome::DuplicateDefault => "DuplicateDefault",
            ValidationOutcome::MalformedExclusion => "MalformedExclusion",
            ValidationOutcome::InvalidName => "InvalidName",
        }
    }

    fn into_response<T: kube::Resource>(self, request: &AdmissionRequest<T>) -> AdmissionResponse {
        record_class_validation(self.outcome);
        let reason = self.reason();
        let base = AdmissionResponse::from(request);
        match self.message {
            None => base,
            Some(message) => {
                let mut response = base.deny(message);
                response.result.reason = reason.to_string();
                response
            }
        }
    }
}

/// Handle `POST /validate-overcommitclass`
pub async fn validate_class_handler(
    State(state): State<Arc<ValidatorState>>,
    Json(review): Json<AdmissionReview<OvercommitClass>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<OvercommitClass> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let Some(class) = request.object.as_ref() else {
        warn!(uid = %request.uid, "no object in admission request, allowing");
        return Json(AdmissionResponse::from(&request).into_review());
    };

    let verdict = validate_class(&state, class).await;
    if let Some(message) = &verdict.message {
        info!(class = %class.name_any(), reason = verdict.reason(), message = %message, "rejecting OvercommitClass");
    }
    Json(verdict.into_response(&request).into_review())
}

/// Handle `POST /validate-overcommit`
pub async fn validate_overcommit_handler(
    State(_state): State<Arc<ValidatorState>>,
    Json(review): Json<AdmissionReview<Overcommit>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Overcommit> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let Some(overcommit) = request.object.as_ref() else {
        warn!(uid = %request.uid, "no object in admission request, allowing");
        return Json(AdmissionResponse::from(&request).into_review());
    };

    let verdict = validate_overcommit(overcommit);
    if let Some(message) = &verdict.message {
        info!(overcommit = %overcommit.name_any(), reason = verdict.reason(), message = %message, "rejecting Overcommit");
    }
    Json(verdict.into_response(&request).into_review())
}

async fn validate_class(state: &ValidatorState, class: &OvercommitClass) -> Verdict {
    if let Some(verdict) = check_ratio("spec.cpuOvercommit", class.spec.cpu_overcommit) {
        return verdict;
    }
    if let Some(verdict) = check_ratio("spec.memoryOvercommit", class.spec.memory_overcommit) {
        return verdict;
    }

    if let Some(verdict) = check_exclusions(&class.spec.excluded_namespaces) {
        return verdict;
    }

    if class.spec.is_default {
        // Freshness read: the decision must reflect the current cluster, not
        // a stale cache.
        let api: Api<OvercommitClass> = Api::all(state.client.clone());
        let existing = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, "failed to list classes for default-uniqueness check");
                return Verdict::reject(
                    ValidationOutcome::DuplicateDefault,
                    "spec.isDefault: unable to verify default uniqueness, retry",
                );
            }
        };

        if let Some(other) = duplicate_default(&existing, class) {
            return Verdict::reject(
                ValidationOutcome::DuplicateDefault,
                format!("spec.isDefault: class \"{other}\" is already the default"),
            );
        }
    }

    Verdict::allow()
}

/// Name of the class that already holds the default, excluding the candidate
/// itself (an update keeping `isDefault=true` must stay admissible).
fn duplicate_default(existing: &[OvercommitClass], candidate: &OvercommitClass) -> Option<String> {
    let name = candidate.name_any();
    existing
        .iter()
        .find(|c| c.spec.is_default && c.name_any() != name)
        .map(|c| c.name_any())
}

fn validate_overcommit(overcommit: &Overcommit) -> Verdict {
    if overcommit.name_any() != SINGLETON_NAME {
        return Verdict::reject(
            ValidationOutcome::InvalidName,
            format!(
                "metadata.name: the Overcommit singleton must be named \"{SINGLETON_NAME}\", got \"{}\"",
                overcommit.name_any()
            ),
        );
    }

    if !overcommit.spec.label.is_empty() && !is_qualified_label_key(&overcommit.spec.label) {
        return Verdict::reject(
            ValidationOutcome::InvalidName,
            format!(
                "spec.label: \"{}\" is not a valid label key",
                overcommit.spec.label
            ),
        );
    }

    Verdict::allow()
}

fn check_ratio(field: &str, value: f64) -> Option<Verdict> {
    if !(MIN_OVERCOMMIT_RATIO..=MAX_OVERCOMMIT_RATIO).contains(&value) {
        return Some(Verdict::reject(
            ValidationOutcome::RatioOutOfRange,
            format!(
                "{field}: {value} is outside [{MIN_OVERCOMMIT_RATIO}, {MAX_OVERCOMMIT_RATIO}]"
            ),
        ));
    }
    None
}

fn check_exclusions(excluded: &str) -> Option<Verdict> {
    if excluded.is_empty() {
        return None;
    }

    for entry in excluded.split(',') {
        let entry = entry.trim();
        if entry == crate::crd::EXCLUDE_ALL_NAMESPACES {
            continue;
        }
        if !is_dns1123_label(entry) {
            return Some(Verdict::reject(
                ValidationOutcome::MalformedExclusion,
                format!(
                    "spec.excludedNamespaces: \"{entry}\" is not a DNS-1123 namespace name"
                ),
            ));
        }
    }
    None
}

/// DNS-1123 label: lowercase alphanumerics and `-`, alphanumeric at both
/// ends, at most 63 characters.
fn is_dns1123_label(value: &str) -> bool {
    if value.is_empty() || value.len() > 63 {
        return false;
    }
    let bytes = value.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum(b) || b == b'-')
}

/// Qualified label key: optional DNS subdomain prefix, then a name segment of
/// at most 63 characters starting and ending alphanumeric.
fn is_qualified_label_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > 253 || !prefix.split('.').all(is_dns1123_label) {
            return false;
        }
    }

    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_alphanumeric();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes
        .iter()
        .all(|&b| alnum(b) || b == b'-' || b == b'_' || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::OvercommitClassSpec;

    fn class(cpu: f64, memory: f64, excluded: &str) -> OvercommitClass {
        OvercommitClass::new(
            "gold",
            OvercommitClassSpec {
                cpu_overcommit: cpu,
                memory_overcommit: memory,
                excluded_namespaces: excluded.to_string(),
                is_default: false,
                labels: None,
                annotations: None,
            },
        )
    }

    #[test]
    fn ratio_bounds_are_inclusive() {
        assert!(check_ratio("spec.cpuOvercommit", 0.0001).is_none());
        assert!(check_ratio("spec.cpuOvercommit", 1.0).is_none());
        assert!(check_ratio("spec.cpuOvercommit", 0.5).is_none());
    }

    #[test]
    fn zero_ratio_is_rejected() {
        let verdict = check_ratio("spec.cpuOvercommit", 0.0).expect("rejection");
        assert_eq!(verdict.outcome, ValidationOutcome::RatioOutOfRange);
        assert!(verdict.message.unwrap().contains("spec.cpuOvercommit"));
    }

    #[test]
    fn ratio_above_one_is_rejected() {
        let verdict = check_ratio("spec.memoryOvercommit", 1.5).expect("rejection");
        assert_eq!(verdict.outcome, ValidationOutcome::RatioOutOfRange);
    }

    #[test]
    fn empty_exclusion_string_is_valid() {
        assert!(check_exclusions("").is_none());
    }

    #[test]
    fn wildcard_exclusion_is_valid() {
        assert!(check_exclusions("*").is_none());
    }

    #[test]
    fn comma_separated_namespaces_are_valid() {
        assert!(check_exclusions("kube-system,cert-manager").is_none());
        assert!(check_exclusions(" kube-system , monitoring ").is_none());
    }

    #[test]
    fn malformed_namespace_is_rejected() {
        let verdict = check_exclusions("Kube_System").expect("rejection");
        assert_eq!(verdict.outcome, ValidationOutcome::MalformedExclusion);

        let verdict = check_exclusions("ok,-bad").expect("rejection");
        assert_eq!(verdict.outcome, ValidationOutcome::MalformedExclusion);
    }

    #[test]
    fn dns1123_label_rules() {
        assert!(is_dns1123_label("kube-system"));
        assert!(is_dns1123_label("a"));
        assert!(is_dns1123_label("ns1"));
        assert!(!is_dns1123_label(""));
        assert!(!is_dns1123_label("-leading"));
        assert!(!is_dns1123_label("trailing-"));
        assert!(!is_dns1123_label("UPPER"));
        assert!(!is_dns1123_label(&"a".repeat(64)));
    }

    #[test]
    fn qualified_label_keys() {
        assert!(is_qualified_label_key("overcommit.domain/class"));
        assert!(is_qualified_label_key("class"));
        assert!(is_qualified_label_key("app.kubernetes.io/name"));
        assert!(!is_qualified_label_key("/class"));
        assert!(!is_qualified_label_key("overcommit.domain/"));
        assert!(!is_qualified_label_key("UPPER..domain/class"));
    }

    /// Story: the singleton must be named `cluster`
    #[test]
    fn story_second_singleton_is_rejected() {
        use crate::crd::{OvercommitSpec, WorkloadShape};

        let intruder = Overcommit::new(
            "another",
            OvercommitSpec {
                label: "overcommit.domain/class".to_string(),
                deployment: WorkloadShape::default(),
            },
        );
        let verdict = validate_overcommit(&intruder);
        assert_eq!(verdict.outcome, ValidationOutcome::InvalidName);

        let legitimate = Overcommit::new(
            SINGLETON_NAME,
            OvercommitSpec {
                label: "overcommit.domain/class".to_string(),
                deployment: WorkloadShape::default(),
            },
        );
        let verdict = validate_overcommit(&legitimate);
        assert_eq!(verdict.outcome, ValidationOutcome::Allowed);
    }

    /// Story: a class with cpuOvercommit=0 is rejected with reason
    /// RatioOutOfRange
    #[test]
    fn story_bronze_zero_ratio_rejected() {
        let bronze = class(0.0, 0.8, "");
        let verdict = check_ratio("spec.cpuOvercommit", bronze.spec.cpu_overcommit)
            .expect("rejection");
        assert_eq!(verdict.reason(), "RatioOutOfRange");
    }

    /// Story: a second default class is rejected with reason
    /// DuplicateDefault
    #[test]
    fn story_second_default_rejected() {
        let mut gold = class(0.5, 0.8, "");
        gold.spec.is_default = true;

        let mut silver = class(0.9, 0.9, "");
        silver.metadata.name = Some("silver".to_string());
        silver.spec.is_default = true;

        let existing = vec![gold];
        assert_eq!(
            duplicate_default(&existing, &silver),
            Some("gold".to_string())
        );
    }

    /// Story: updating the current default in place stays admissible
    #[test]
    fn story_default_update_is_not_a_duplicate() {
        let mut gold = class(0.5, 0.8, "");
        gold.spec.is_default = true;

        let mut updated = gold.clone();
        updated.spec.memory_overcommit = 0.9;

        let existing = vec![gold];
        assert_eq!(duplicate_default(&existing, &updated), None);
    }
}
