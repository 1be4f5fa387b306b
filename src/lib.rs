//! Overcommit operator - admission-time CPU/memory overcommit enforcement
//!
//! The operator rewrites pod resource requests to a configurable fraction of
//! their declared limits. Policy is expressed through two cluster-scoped
//! custom resources:
//!
//! - [`crd::Overcommit`] - a singleton describing the operator's deployment
//!   shape and the label key used to attach policies to pods
//! - [`crd::OvercommitClass`] - one (cpuRatio, memoryRatio, exclusions,
//!   isDefault) policy each, materialised as a dedicated mutating webhook
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Overcommit, OvercommitClass)
//! - [`resources`] - Pure templater for managed objects (deployments,
//!   services, certificates, webhook configurations)
//! - [`compare`] - Equality kernel over the attributes the operator owns
//! - [`controller`] - Reconciliation logic for both custom resources
//! - [`webhook`] - Admission endpoints (class validator, pod mutator)
//! - [`metrics`] - OpenTelemetry gauges and counters
//! - [`telemetry`] - Tracing/metrics initialization
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod compare;
pub mod controller;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod quantity;
pub mod resources;
pub mod telemetry;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// API group of the operator's custom resources
pub const GROUP: &str = "overcommit.domain";

/// API version of the operator's custom resources
pub const VERSION: &str = "v1alphav1";

/// Reserved name of the Overcommit singleton
pub const SINGLETON_NAME: &str = "cluster";

/// Default policy-attachment label key, used when the singleton is unreachable
/// or does not declare one
pub const DEFAULT_CLASS_LABEL: &str = "overcommit.domain/class";

/// Finalizer attached to every OvercommitClass
pub const CLASS_FINALIZER: &str = "overcommitclass.finalizer";

/// Finalizers written by older operator versions, stripped on sight to
/// support in-place upgrades
pub const LEGACY_FINALIZERS: [&str; 2] = ["overcommit.finalizer", "webhook.finalizer"];

/// Field manager name used for API writes
pub const FIELD_MANAGER: &str = "overcommit-operator";

/// Default namespace for managed workloads when `OPERATOR_NAMESPACE` is unset
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "overcommit-system";

/// Port the admission webhook workloads listen on
pub const WEBHOOK_PORT: u16 = 8443;

/// Namespace the operator's managed workloads live in
///
/// Read from `OPERATOR_NAMESPACE` (set via the Deployment downward API).
pub fn operator_namespace() -> String {
    std::env::var("OPERATOR_NAMESPACE").unwrap_or_else(|_| DEFAULT_OPERATOR_NAMESPACE.to_string())
}
