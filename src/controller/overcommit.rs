//! Overcommit reconciliation controller
//!
//! Drives the singleton: installs the issuer, the class-validator and
//! pod-mutator webhook stacks, and the class sub-controller workload, then
//! publishes aggregate readiness. Also strips finalizers written by older
//! operator versions so pre-existing singletons stay deletable.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{error, info, warn};

use crate::controller::{owner_reference, status, upsert, Context};
use crate::crd::{self, Certificate, Issuer, Overcommit};
use crate::{operator_namespace, resources, Error, LEGACY_FINALIZERS};

/// Reconcile the Overcommit singleton
pub async fn reconcile(overcommit: Arc<Overcommit>, ctx: Arc<Context>) -> Result<Action, Error> {
    let client = &ctx.client;
    let name = overcommit.name_any();
    info!(overcommit = %name, "reconciling Overcommit");

    let label = crd::overcommit_label(client).await;

    let api: Api<Overcommit> = Api::all(client.clone());
    let Some(mut overcommit) = api.get_opt(&name).await? else {
        info!(overcommit = %name, "Overcommit not found, skipping reconciliation");
        return Ok(Action::await_change());
    };

    // One-shot migration from older operator versions: their finalizers would
    // otherwise wedge deletion forever.
    let finalizers = overcommit.finalizers().to_vec();
    let kept: Vec<String> = finalizers
        .iter()
        .filter(|f| !LEGACY_FINALIZERS.contains(&f.as_str()))
        .cloned()
        .collect();
    if kept.len() != finalizers.len() {
        info!(overcommit = %name, "removing legacy finalizers");
        overcommit.meta_mut().finalizers = if kept.is_empty() { None } else { Some(kept) };
        api.replace(&name, &PostParams::default(), &overcommit)
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let owner = owner_reference(&overcommit)?;
    let namespace = operator_namespace();

    let issuers: Api<Issuer> = Api::namespaced(client.clone(), &namespace);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let certificates: Api<Certificate> = Api::namespaced(client.clone(), &namespace);
    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());

    upsert(&issuers, resources::generate_issuer(), &owner).await?;

    let validator = resources::class_validator_stack(&overcommit);
    upsert(&certificates, validator.certificate, &owner).await?;
    upsert(&deployments, validator.deployment, &owner).await?;
    upsert(&services, validator.service, &owner).await?;
    upsert(&validating, validator.webhook, &owner).await?;

    let mutator = resources::pod_mutator_stack(&overcommit, &label);
    upsert(&certificates, mutator.certificate, &owner).await?;
    upsert(&deployments, mutator.deployment, &owner).await?;
    upsert(&services, mutator.service, &owner).await?;
    // Conflicts here are routine while the API server races us on the
    // configuration; the next tick converges it.
    match upsert(&mutating, mutator.webhook, &owner).await {
        Ok(()) => {}
        Err(err) if err.is_conflict() => {
            info!(overcommit = %name, "conflict on pod mutator webhook configuration, will retry next tick");
        }
        Err(err) => return Err(err),
    }

    upsert(
        &deployments,
        resources::class_controller_deployment(&overcommit),
        &owner,
    )
    .await?;

    if let Err(err) = status::update_overcommit_status(client).await {
        warn!(overcommit = %name, error = %err, "failed to update Overcommit status");
    }

    Ok(Action::requeue(Duration::from_secs(10)))
}

/// Error policy - requeue with backoff
pub fn error_policy(overcommit: Arc<Overcommit>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(overcommit = %overcommit.name_any(), error = %error, "reconcile error, will retry");
    Action::requeue(Duration::from_secs(5))
}
