//! Metrics registry for the overcommit operator
//!
//! Provides OpenTelemetry metrics for:
//! - Declared policy set (class count, default presence)
//! - Pod mutation outcomes
//! - Class validation outcomes

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// Global meter for operator metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("overcommit-operator"));

/// Gauge tracking the number of OvercommitClass objects in the cluster
pub static CLASSES_TOTAL: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("overcommit_classes_total")
        .with_description("Number of OvercommitClass objects in the cluster")
        .with_unit("{classes}")
        .build()
});

/// Gauge indicating whether a default class currently exists (0 or 1)
pub static DEFAULT_CLASS_PRESENT: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("overcommit_default_class_present")
        .with_description("Whether an OvercommitClass with isDefault=true exists")
        .build()
});

/// Counter of pod mutation outcomes
///
/// Labels:
/// - `outcome`: rewritten, skipped, unknown_class, excluded_namespace, error
pub static POD_MUTATIONS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("overcommit_pod_mutations_total")
        .with_description("Total number of pod admission reviews handled by the mutator")
        .with_unit("{reviews}")
        .build()
});

/// Counter of class validation outcomes
///
/// Labels:
/// - `outcome`: allowed, ratio_out_of_range, duplicate_default,
///   malformed_exclusion, invalid_name
pub static CLASS_VALIDATIONS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("overcommit_class_validation_total")
        .with_description("Total number of policy admission reviews handled by the validator")
        .with_unit("{reviews}")
        .build()
});

/// Outcome of one pod mutation review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Requests were rewritten
    Rewritten,
    /// No class applied; pod admitted unchanged
    Skipped,
    /// The pod named a class that does not exist
    UnknownClass,
    /// The pod's namespace is excluded by the selected class
    ExcludedNamespace,
    /// Internal failure; pod admitted unchanged (fail-open)
    Error,
}

impl MutationOutcome {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewritten => "rewritten",
            Self::Skipped => "skipped",
            Self::UnknownClass => "unknown_class",
            Self::ExcludedNamespace => "excluded_namespace",
            Self::Error => "error",
        }
    }
}

/// Outcome of one class validation review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The object was admitted
    Allowed,
    /// A ratio fell outside [0.0001, 1]
    RatioOutOfRange,
    /// A second default class was declared
    DuplicateDefault,
    /// The excluded-namespaces string failed to parse
    MalformedExclusion,
    /// The singleton carried a name other than `cluster`, or a malformed label
    InvalidName,
}

impl ValidationOutcome {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::RatioOutOfRange => "ratio_out_of_range",
            Self::DuplicateDefault => "duplicate_default",
            Self::MalformedExclusion => "malformed_exclusion",
            Self::InvalidName => "invalid_name",
        }
    }
}

/// Record one pod mutation review
pub fn record_pod_mutation(outcome: MutationOutcome) {
    POD_MUTATIONS_TOTAL.add(1, &[KeyValue::new("outcome", outcome.as_str())]);
}

/// Record one class validation review
pub fn record_class_validation(outcome: ValidationOutcome) {
    CLASS_VALIDATIONS_TOTAL.add(1, &[KeyValue::new("outcome", outcome.as_str())]);
}

/// Update the class-count and default-presence gauges
pub fn set_class_gauges(total: i64, default_present: bool) {
    CLASSES_TOTAL.record(total, &[]);
    DEFAULT_CLASS_PRESENT.record(i64::from(default_present), &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_outcome_labels() {
        assert_eq!(MutationOutcome::Rewritten.as_str(), "rewritten");
        assert_eq!(MutationOutcome::UnknownClass.as_str(), "unknown_class");
        assert_eq!(
            MutationOutcome::ExcludedNamespace.as_str(),
            "excluded_namespace"
        );
    }

    #[test]
    fn validation_outcome_labels() {
        assert_eq!(ValidationOutcome::Allowed.as_str(), "allowed");
        assert_eq!(
            ValidationOutcome::DuplicateDefault.as_str(),
            "duplicate_default"
        );
    }

    #[test]
    fn recording_does_not_panic() {
        record_pod_mutation(MutationOutcome::Rewritten);
        record_class_validation(ValidationOutcome::Allowed);
        set_class_gauges(3, true);
    }
}
