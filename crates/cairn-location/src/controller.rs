//! DataProtection controller
//!
//! Reconciles the backup locations of every DataProtection parent and
//! reports the result through the `LocationsReady` condition.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use cairn_common::crd::{set_condition, Condition, ConditionStatus, DataProtection};
use cairn_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use cairn_common::{
    Error, Settings, REQUEUE_ERROR_SECS, REQUEUE_SUCCESS_SECS, REQUEUE_VALIDATION_SECS,
};
use cairn_credentials::{CredentialCache, CredentialResolver};

use crate::kube_client::{KubeClientImpl, LocationKubeClient, FIELD_MANAGER};
use crate::orchestrator::{ReconcileOrchestrator, ReconcileOutcome};
use crate::region::{BucketRegionLocator, HttpRegionLocator};
use crate::resolver::ConfigResolver;

/// Condition type reporting whether every location was reconciled
pub const CONDITION_LOCATIONS_READY: &str = "LocationsReady";

/// Reason for a fully reconciled parent
pub const REASON_LOCATIONS_RECONCILED: &str = "LocationsReconciled";

/// Shared state for DataProtection reconciliation
pub struct Context {
    /// Kubernetes access
    pub kube: Arc<dyn LocationKubeClient>,
    /// Location reconciliation
    pub orchestrator: ReconcileOrchestrator,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Create a context talking to the cluster and to S3 for region lookups
    pub fn new(client: Client, settings: Settings) -> Result<Self, Error> {
        let kube: Arc<dyn LocationKubeClient> = Arc::new(KubeClientImpl::new(client.clone()));
        let regions: Arc<dyn BucketRegionLocator> = Arc::new(HttpRegionLocator::new()?);
        let resolver = ConfigResolver::new(
            kube.clone(),
            regions,
            CredentialResolver::default(),
            settings.clone(),
        )
        .with_cache(Arc::new(CredentialCache::new(settings.credential_cache_ttl)));
        Ok(Self {
            orchestrator: ReconcileOrchestrator::new(kube.clone(), resolver, settings),
            kube,
            events: Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER)),
        })
    }

    /// Create a context from explicit parts
    pub fn for_testing(
        kube: Arc<dyn LocationKubeClient>,
        regions: Arc<dyn BucketRegionLocator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let settings = Settings::default();
        let resolver = ConfigResolver::new(
            kube.clone(),
            regions,
            CredentialResolver::default(),
            settings.clone(),
        );
        Self {
            orchestrator: ReconcileOrchestrator::new(kube.clone(), resolver, settings),
            kube,
            events,
        }
    }
}

fn requeue_for(error: &Error) -> Action {
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
    } else {
        Action::requeue(Duration::from_secs(REQUEUE_VALIDATION_SECS))
    }
}

/// Reconcile a DataProtection
#[instrument(skip(parent, ctx), fields(data_protection = %parent.name_any(), namespace = ?parent.namespace()))]
pub async fn reconcile(parent: Arc<DataProtection>, ctx: Arc<Context>) -> Result<Action, Error> {
    let outcome = match ctx.orchestrator.reconcile(&parent).await {
        Ok(outcome) => outcome,
        Err(e) => return report_failure(&parent, &ctx, e).await,
    };

    info!(
        locations = outcome.locations.len(),
        deleted = outcome.deleted.len(),
        "Backup locations reconciled"
    );
    let message = format!("{} backup location(s) reconciled", outcome.locations.len());
    update_status(
        &parent,
        &ctx,
        Condition::new(
            CONDITION_LOCATIONS_READY,
            ConditionStatus::True,
            REASON_LOCATIONS_RECONCILED,
            message,
        ),
        Some(&outcome),
    )
    .await?;

    Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
}

/// Requeue after an error escaping reconcile
pub fn error_policy(parent: Arc<DataProtection>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        data_protection = %parent.name_any(),
        "reconciliation failed"
    );
    requeue_for(error)
}

/// Run the DataProtection controller until shutdown
pub async fn run(client: Client, settings: Settings) -> Result<(), Error> {
    let parents: Api<DataProtection> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(client, settings)?);
    Controller::new(parents, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => debug!(?action, "DataProtection reconciliation completed"),
                Err(e) => error!(error = ?e, "DataProtection reconciliation error"),
            }
        })
        .await;
    Ok(())
}

fn object_ref(parent: &DataProtection) -> ObjectReference {
    parent.object_ref(&())
}

async fn report_failure(parent: &DataProtection, ctx: &Context, e: Error) -> Result<Action, Error> {
    warn!(data_protection = %parent.name_any(), error = %e, "Backup locations are not ready");
    let message = e.to_string();
    ctx.events
        .publish(
            &object_ref(parent),
            EventType::Warning,
            reasons::LOCATION_RESOLUTION_FAILED,
            actions::RECONCILE,
            Some(message.clone()),
        )
        .await;
    update_status(
        parent,
        ctx,
        Condition::new(
            CONDITION_LOCATIONS_READY,
            ConditionStatus::False,
            reasons::LOCATION_RESOLUTION_FAILED,
            message,
        ),
        None,
    )
    .await?;
    Ok(requeue_for(&e))
}

/// Write status when anything but a condition timestamp changed.
///
/// Without an outcome the previously reported locations are kept.
async fn update_status(
    parent: &DataProtection,
    ctx: &Context,
    condition: Condition,
    outcome: Option<&ReconcileOutcome>,
) -> Result<(), Error> {
    let current = parent.status.clone().unwrap_or_default();
    let mut status = current.clone();
    let condition_changed = set_condition(&mut status.conditions, condition);
    if let Some(outcome) = outcome {
        status.locations = outcome.location_names();
        status.ca_bundle = Some(outcome.ca_bundle.clone()).filter(|n| !n.is_empty());
    }
    status.observed_generation = parent.metadata.generation;

    if !condition_changed && status == current {
        debug!(data_protection = %parent.name_any(), "status unchanged, skipping update");
        return Ok(());
    }

    ctx.kube
        .patch_status(
            &parent.name_any(),
            &parent.namespace().unwrap_or_default(),
            &status,
        )
        .await
}
