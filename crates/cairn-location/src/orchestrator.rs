//! Location reconciliation
//!
//! Drives resolution over every intent of a DataProtection parent and makes
//! the cluster match: BackupStorageLocations are created or replaced only
//! when their content changes, ones no longer produced by any intent are
//! deleted, and the CA bundle is rebuilt. An intent that fails to resolve
//! keeps its existing location, and that location's CA stays in the bundle.
//!
//! Velero may flip `spec.default` on an existing location when it settles
//! which location is the default. Once a location exists, its current
//! `default` is carried over instead of the computed one, as are the spec
//! and metadata fields cairn does not manage.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use tracing::{debug, info, warn};

use cairn_common::crd::DataProtection;
use cairn_common::kube_utils::owned_labels;
use cairn_common::velero::{BackupStorageLocation, BackupStorageLocationSpec};
use cairn_common::{Error, Settings, COMPONENT_BSL};

use crate::ca_bundle;
use crate::kube_client::LocationKubeClient;
use crate::resolver::{ConfigResolver, ResolveContext, ResolvedLocation};
use crate::validation::{parse_intents, target_names, validate_intents};

/// What happened to one BackupStorageLocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationChange {
    /// It did not exist and was created
    Created,
    /// It existed with different content and was replaced
    Updated,
    /// It already matched
    Unchanged,
}

/// Result of reconciling one parent
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Every location written or confirmed, in intent order
    pub locations: Vec<(String, LocationChange)>,
    /// Stale locations that were deleted
    pub deleted: Vec<String>,
    /// CA bundle ConfigMap name; empty when no location carries a CA
    pub ca_bundle: String,
}

impl ReconcileOutcome {
    /// Names of the locations, in intent order
    pub fn location_names(&self) -> Vec<String> {
        self.locations.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Reconciles the BackupStorageLocations of DataProtection parents
pub struct ReconcileOrchestrator {
    kube: Arc<dyn LocationKubeClient>,
    resolver: ConfigResolver,
    settings: Settings,
}

impl ReconcileOrchestrator {
    /// Create an orchestrator
    pub fn new(kube: Arc<dyn LocationKubeClient>, resolver: ConfigResolver, settings: Settings) -> Self {
        Self {
            kube,
            resolver,
            settings,
        }
    }

    /// Reconcile every location of `parent`.
    ///
    /// Batch validation failures stop before anything is written. A failing
    /// intent does not stop the others; the first such error is returned
    /// after the rest have been processed.
    pub async fn reconcile(&self, parent: &DataProtection) -> Result<ReconcileOutcome, Error> {
        let ctx = ResolveContext::for_parent(parent);
        let intents = parse_intents(&ctx.resource(), &parent.spec.backup_locations)?;
        let intents = &intents;
        validate_intents(&ctx.resource(), &ctx.parent, intents, ctx.backup_images)?;

        let owner_ref = parent.controller_owner_ref(&());
        if owner_ref.is_none() {
            warn!(parent = %ctx.resource(), "Parent has no uid, writing locations without owner reference");
        }

        // failed intents keep their names so their existing objects survive
        let desired = target_names(&ctx.parent, intents);

        let mut first_error: Option<Error> = None;
        let mut resolved: Vec<ResolvedLocation> = Vec::new();
        // CA sources in intent order; failed intents contribute their live location
        let mut bundled: Vec<ResolvedLocation> = Vec::new();
        let mut bundle_complete = true;
        for (index, intent) in intents.iter().enumerate() {
            match self.resolver.resolve(&ctx, index, intent).await {
                Ok(location) => {
                    bundled.push(location.clone());
                    resolved.push(location);
                }
                Err(e) => {
                    warn!(parent = %ctx.resource(), index, error = %e, "Failed to resolve backup location");
                    first_error.get_or_insert(e);
                    match self.live_location(&ctx, &desired[index]).await {
                        Ok(live) => bundled.extend(live),
                        Err(e) => {
                            warn!(location = %desired[index], error = %e, "Failed to read BackupStorageLocation, keeping CA bundle");
                            bundle_complete = false;
                        }
                    }
                }
            }
        }

        let mut outcome = ReconcileOutcome::default();
        for location in &resolved {
            match self
                .ensure_location(&ctx, location, owner_ref.clone())
                .await
            {
                Ok(change) => outcome.locations.push((location.name.clone(), change)),
                Err(e) => {
                    warn!(location = %location.name, error = %e, "Failed to write BackupStorageLocation");
                    first_error.get_or_insert(e);
                }
            }
        }

        match self.delete_stale(&ctx, &desired).await {
            Ok(deleted) => outcome.deleted = deleted,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }

        if bundle_complete {
            match ca_bundle::aggregate(
                self.kube.as_ref(),
                &ctx.namespace,
                &ctx.parent,
                owner_ref,
                &bundled,
                &self.settings,
            )
            .await
            {
                Ok(name) => outcome.ca_bundle = name,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Create or update the BackupStorageLocation for one resolved location
    pub async fn ensure_location(
        &self,
        ctx: &ResolveContext,
        location: &ResolvedLocation,
        owner_ref: Option<OwnerReference>,
    ) -> Result<LocationChange, Error> {
        let labels = owned_labels(&location.name, COMPONENT_BSL, &ctx.parent);
        let spec = location.to_spec();

        let Some(current) = self
            .kube
            .get_backup_location(&location.name, &ctx.namespace)
            .await?
        else {
            let mut bsl = BackupStorageLocation::new(&location.name, &ctx.namespace, spec);
            bsl.metadata.labels = labels;
            bsl.metadata.owner_references = owner_ref.into_iter().collect();
            self.kube.create_backup_location(&bsl).await?;
            info!(location = %location.name, namespace = %ctx.namespace, "Created BackupStorageLocation");
            return Ok(LocationChange::Created);
        };

        let desired = BackupStorageLocationSpec {
            default: current.spec.default,
            other: current.spec.other.clone(),
            ..spec
        };
        let labels_match = labels
            .iter()
            .all(|(k, v)| current.metadata.labels.get(k) == Some(v));
        if current.spec == desired && labels_match {
            debug!(location = %location.name, "BackupStorageLocation unchanged");
            return Ok(LocationChange::Unchanged);
        }

        let mut bsl = current;
        bsl.spec = desired;
        merge_labels(&mut bsl.metadata.labels, labels);
        if let Some(owner_ref) = owner_ref {
            if !bsl.metadata.owner_references.iter().any(|r| r.uid == owner_ref.uid) {
                bsl.metadata.owner_references.push(owner_ref);
            }
        }
        self.kube.replace_backup_location(&bsl).await?;
        info!(location = %location.name, namespace = %ctx.namespace, "Updated BackupStorageLocation");
        Ok(LocationChange::Updated)
    }

    /// The location currently written under `name`, as last resolved
    async fn live_location(
        &self,
        ctx: &ResolveContext,
        name: &str,
    ) -> Result<Option<ResolvedLocation>, Error> {
        let Some(bsl) = self.kube.get_backup_location(name, &ctx.namespace).await? else {
            return Ok(None);
        };
        match ResolvedLocation::from_spec(name, &bsl.spec) {
            Ok(location) => Ok(Some(location)),
            Err(e) => {
                debug!(location = %name, error = %e, "Existing BackupStorageLocation not usable for CA bundle");
                Ok(None)
            }
        }
    }

    async fn delete_stale(
        &self,
        ctx: &ResolveContext,
        desired: &[String],
    ) -> Result<Vec<String>, Error> {
        let mut deleted = Vec::new();
        for bsl in self
            .kube
            .list_backup_locations(&ctx.namespace, &ctx.parent)
            .await?
        {
            let name = bsl.metadata.name;
            if desired.contains(&name) {
                continue;
            }
            self.kube
                .delete_backup_location(&name, &ctx.namespace)
                .await?;
            info!(location = %name, namespace = %ctx.namespace, "Deleted stale BackupStorageLocation");
            deleted.push(name);
        }
        Ok(deleted)
    }
}

fn merge_labels(labels: &mut BTreeMap<String, String>, ours: BTreeMap<String, String>) {
    for (k, v) in ours {
        labels.insert(k, v);
    }
}
