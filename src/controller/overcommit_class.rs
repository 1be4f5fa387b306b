//! OvercommitClass reconciliation controller
//!
//! Drives each class's dedicated webhook stack (deployment, service,
//! certificate, mutating webhook configuration), the lifecycle finalizer, the
//! owner linkage back to the singleton, and per-resource status.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{error, info, warn};

use crate::controller::{has_controller_owner, owner_reference, set_controller_owner, status, upsert, Context};
use crate::crd::{self, Certificate, OvercommitClass};
use crate::{metrics, operator_namespace, resources, Error, CLASS_FINALIZER};

/// Reconcile one OvercommitClass
pub async fn reconcile(class: Arc<OvercommitClass>, ctx: Arc<Context>) -> Result<Action, Error> {
    let client = &ctx.client;
    let name = class.name_any();
    info!(class = %name, "reconciling OvercommitClass");

    let label = crd::overcommit_label(client).await;

    let api: Api<OvercommitClass> = Api::all(client.clone());
    let Some(class) = api.get_opt(&name).await? else {
        info!(class = %name, "OvercommitClass not found, skipping reconciliation");
        return Ok(Action::await_change());
    };

    if class.meta().deletion_timestamp.is_some() {
        info!(class = %name, "OvercommitClass is being deleted, cleaning up resources");
        cleanup_resources(client, &name).await?;
        remove_finalizer(&api, &class).await?;
        return Ok(Action::await_change());
    }

    if !class.finalizers().iter().any(|f| f == CLASS_FINALIZER) {
        info!(class = %name, "adding finalizer");
        add_finalizer(&api, &class).await?;
        return Ok(Action::await_change());
    }

    // The singleton garbage-collects every class when it goes away.
    let overcommit = crd::get_overcommit(client).await?;
    let singleton_owner = owner_reference(&overcommit)?;
    if !has_controller_owner(class.meta(), &singleton_owner) {
        info!(class = %name, "setting controller reference to the Overcommit singleton");
        let mut updated = class.clone();
        set_controller_owner(updated.meta_mut(), &singleton_owner);
        api.replace(&name, &PostParams::default(), &updated).await?;
        return Ok(Action::await_change());
    }

    let owner = owner_reference(&class)?;
    let namespace = operator_namespace();
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let certificates: Api<Certificate> = Api::namespaced(client.clone(), &namespace);
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());

    let stack = resources::class_workload_stack(&class, &overcommit.spec.deployment, &label);
    upsert(&deployments, stack.deployment, &owner).await?;
    upsert(&services, stack.service, &owner).await?;
    upsert(&certificates, stack.certificate, &owner).await?;
    upsert(&mutating, stack.webhook, &owner).await?;

    refresh_class_gauges(client).await?;

    if let Err(err) = status::update_class_status(client, &name).await {
        warn!(class = %name, error = %err, "failed to update class status");
    }

    Ok(Action::requeue(Duration::from_secs(10)))
}

/// Error policy - requeue with backoff
pub fn error_policy(class: Arc<OvercommitClass>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(class = %class.name_any(), error = %error, "reconcile error, will retry");
    Action::requeue(Duration::from_secs(5))
}

/// Delete the four managed objects, tolerating objects that are already gone.
async fn cleanup_resources(client: &Client, class_name: &str) -> Result<(), Error> {
    let namespace = operator_namespace();

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    delete_ignoring_missing(&deployments, class_name).await?;

    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    delete_ignoring_missing(&services, &resources::service_name(class_name)).await?;

    let certificates: Api<Certificate> = Api::namespaced(client.clone(), &namespace);
    delete_ignoring_missing(&certificates, &resources::certificate_name(class_name)).await?;

    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    delete_ignoring_missing(&mutating, &resources::webhook_config_name(class_name)).await?;

    info!(class = %class_name, "cleaned up managed objects");
    Ok(())
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Recompute the class-count and default-presence gauges from a fresh list.
async fn refresh_class_gauges(client: &Client) -> Result<(), Error> {
    let api: Api<OvercommitClass> = Api::all(client.clone());
    let classes = api.list(&ListParams::default()).await?;
    let default_present = classes.items.iter().any(|c| c.spec.is_default);
    metrics::set_class_gauges(classes.items.len() as i64, default_present);
    Ok(())
}

async fn add_finalizer(api: &Api<OvercommitClass>, class: &OvercommitClass) -> Result<(), Error> {
    let patch = if class.finalizers().is_empty() {
        json!([
            { "op": "test", "path": "/metadata/finalizers", "value": null },
            { "op": "add", "path": "/metadata/finalizers", "value": [CLASS_FINALIZER] }
        ])
    } else {
        json!([
            { "op": "test", "path": "/metadata/finalizers", "value": class.finalizers() },
            { "op": "add", "path": "/metadata/finalizers/-", "value": CLASS_FINALIZER }
        ])
    };

    api.patch(
        &class.name_any(),
        &PatchParams::default(),
        &Patch::Json::<()>(serde_json::from_value(patch)?),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<OvercommitClass>, class: &OvercommitClass) -> Result<(), Error> {
    let Some(index) = class
        .finalizers()
        .iter()
        .position(|f| f == CLASS_FINALIZER)
    else {
        return Ok(());
    };

    let path = format!("/metadata/finalizers/{index}");
    let patch = json!([
        { "op": "test", "path": path, "value": CLASS_FINALIZER },
        { "op": "remove", "path": path }
    ]);

    api.patch(
        &class.name_any(),
        &PatchParams::default(),
        &Patch::Json::<()>(serde_json::from_value(patch)?),
    )
    .await?;
    Ok(())
}
