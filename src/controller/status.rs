//! Conflict-aware status publication for both custom resources
//!
//! Status writes use read-modify-write with retry: the latest object is
//! re-fetched on each attempt and only 409 conflicts are retried, with
//! exponential backoff. Status never gates convergence - callers log and
//! carry on when these functions fail.

use std::fmt::Debug;
use std::time::Duration;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::crd::{
    set_condition, Certificate, Condition, ConditionStatus, Issuer, Overcommit, OvercommitClass,
    ResourceStatus,
};
use crate::{operator_namespace, resources, Error, SINGLETON_NAME};

/// Maximum status write attempts before giving up
const MAX_STATUS_RETRIES: u32 = 5;

fn conflict_backoff(attempt: u32) -> Duration {
    Duration::from_millis(50 * (1 << attempt))
}

async fn object_ready<K>(api: &Api<K>, name: &str) -> bool
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    matches!(api.get_opt(name).await, Ok(Some(_)))
}

async fn row<K>(api: &Api<K>, name: &str) -> ResourceStatus
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    ResourceStatus {
        name: name.to_string(),
        ready: object_ready(api, name).await,
    }
}

/// Build the aggregate `ResourcesReady` condition from readiness rows.
fn aggregate_condition(rows: &[ResourceStatus], generation: Option<i64>) -> Condition {
    let total = rows.len();
    let ready = rows.iter().filter(|r| r.ready).count();

    let condition = if ready == total {
        Condition::new(
            "ResourcesReady",
            ConditionStatus::True,
            "AllResourcesReady",
            format!("All {total} managed resources are ready"),
        )
    } else {
        Condition::new(
            "ResourcesReady",
            ConditionStatus::False,
            "ResourcesNotReady",
            format!("{ready} of {total} resources are ready"),
        )
    };
    condition.with_observed_generation(generation)
}

/// Readiness rows for every object the singleton reconciler manages.
async fn overcommit_rows(client: &Client) -> Vec<ResourceStatus> {
    let namespace = operator_namespace();
    let issuers: Api<Issuer> = Api::namespaced(client.clone(), &namespace);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let certificates: Api<Certificate> = Api::namespaced(client.clone(), &namespace);
    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());

    let mut rows = vec![row(&issuers, resources::ISSUER_NAME).await];
    for workload in [resources::CLASS_VALIDATOR_NAME, resources::POD_MUTATOR_NAME] {
        rows.push(row(&deployments, workload).await);
        rows.push(row(&services, &resources::service_name(workload)).await);
        rows.push(row(&certificates, &resources::certificate_name(workload)).await);
    }
    rows.push(
        row(
            &validating,
            &resources::webhook_config_name(resources::CLASS_VALIDATOR_NAME),
        )
        .await,
    );
    rows.push(
        row(
            &mutating,
            &resources::webhook_config_name(resources::POD_MUTATOR_NAME),
        )
        .await,
    );
    rows.push(row(&deployments, resources::CLASS_CONTROLLER_NAME).await);
    rows
}

/// Readiness rows for the four objects a class reconciler manages.
async fn class_rows(client: &Client, class_name: &str) -> Vec<ResourceStatus> {
    let namespace = operator_namespace();
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let certificates: Api<Certificate> = Api::namespaced(client.clone(), &namespace);
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());

    vec![
        row(&deployments, class_name).await,
        row(&services, &resources::service_name(class_name)).await,
        row(&certificates, &resources::certificate_name(class_name)).await,
        row(&mutating, &resources::webhook_config_name(class_name)).await,
    ]
}

/// Refresh the singleton's status block.
pub async fn update_overcommit_status(client: &Client) -> Result<(), Error> {
    let api: Api<Overcommit> = Api::all(client.clone());

    for attempt in 0..MAX_STATUS_RETRIES {
        let Some(mut fresh) = api.get_opt(SINGLETON_NAME).await? else {
            debug!("singleton not found, skipping status update");
            return Ok(());
        };

        let rows = overcommit_rows(client).await;
        let condition = aggregate_condition(&rows, fresh.metadata.generation);

        let mut status = fresh.status.take().unwrap_or_default();
        status.resources = rows;
        set_condition(&mut status.conditions, condition);
        fresh.status = Some(status);

        match api
            .replace_status(
                SINGLETON_NAME,
                &PostParams::default(),
                serde_json::to_vec(&fresh)?,
            )
            .await
        {
            Ok(_) => {
                debug!(attempts = attempt + 1, "updated Overcommit status");
                return Ok(());
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 && attempt + 1 < MAX_STATUS_RETRIES => {
                debug!(attempt = attempt + 1, "status conflict, retrying");
                tokio::time::sleep(conflict_backoff(attempt)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::internal(
        format!("failed to update status after {MAX_STATUS_RETRIES} attempts"),
        "status",
    ))
}

/// Refresh one class's status block.
pub async fn update_class_status(client: &Client, class_name: &str) -> Result<(), Error> {
    let api: Api<OvercommitClass> = Api::all(client.clone());

    for attempt in 0..MAX_STATUS_RETRIES {
        let Some(mut fresh) = api.get_opt(class_name).await? else {
            debug!(class = %class_name, "class not found, skipping status update");
            return Ok(());
        };

        let rows = class_rows(client, &fresh.name_any()).await;
        let condition = aggregate_condition(&rows, fresh.metadata.generation);

        let mut status = fresh.status.take().unwrap_or_default();
        status.resources = rows;
        set_condition(&mut status.conditions, condition);
        fresh.status = Some(status);

        match api
            .replace_status(class_name, &PostParams::default(), serde_json::to_vec(&fresh)?)
            .await
        {
            Ok(_) => {
                debug!(class = %class_name, attempts = attempt + 1, "updated class status");
                return Ok(());
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 && attempt + 1 < MAX_STATUS_RETRIES => {
                debug!(class = %class_name, attempt = attempt + 1, "status conflict, retrying");
                tokio::time::sleep(conflict_backoff(attempt)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::internal(
        format!("failed to update status after {MAX_STATUS_RETRIES} attempts"),
        "status",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ready: &[bool]) -> Vec<ResourceStatus> {
        ready
            .iter()
            .enumerate()
            .map(|(i, r)| ResourceStatus {
                name: format!("object-{i}"),
                ready: *r,
            })
            .collect()
    }

    #[test]
    fn all_ready_yields_true_condition() {
        let condition = aggregate_condition(&rows(&[true, true, true]), Some(4));
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, "AllResourcesReady");
        assert_eq!(condition.observed_generation, Some(4));
    }

    #[test]
    fn partial_readiness_counts_ready_resources() {
        let condition = aggregate_condition(&rows(&[true, false, true, false]), None);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "ResourcesNotReady");
        assert_eq!(condition.message, "2 of 4 resources are ready");
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(conflict_backoff(0), Duration::from_millis(50));
        assert_eq!(conflict_backoff(1), Duration::from_millis(100));
        assert_eq!(conflict_backoff(4), Duration::from_millis(800));
    }
}
