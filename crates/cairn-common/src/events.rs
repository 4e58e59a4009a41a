//! Kubernetes Event recording for cairn controllers.
//!
//! Controllers publish through [`EventPublisher`]: in the cluster via the
//! kube-rs `Recorder`, in tests into a [`RecordingEventPublisher`].
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Sink for Events attached to cairn resources
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Attach an Event to `regarding`. `reason` is a CamelCase code such as
    /// `BucketCreated`; `note` is free text for humans.
    async fn publish(
        &self,
        regarding: &ObjectReference,
        kind: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] backed by the kube-rs event `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Events are reported as coming from `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let recorder = Recorder::new(
            client,
            Reporter {
                controller: controller_name.into(),
                instance: None,
            },
        );
        Self { recorder }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        kind: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_: kind,
            reason: reason.into(),
            note,
            action: action.into(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(reason, action, error = %e, "Dropping event the API server rejected");
        }
    }
}

/// One event kept by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// Whether the event was a Warning
    pub warning: bool,
    /// Event reason
    pub reason: String,
    /// Event action
    pub action: String,
    /// Event note
    pub note: Option<String>,
}

/// Publisher keeping events in memory instead of writing them to the cluster
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Every event published so far, oldest first
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    /// `(warning, reason)` of every event published so far
    pub fn reasons(&self) -> Vec<(bool, String)> {
        self.lock()
            .iter()
            .map(|e| (e.warning, e.reason.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _regarding: &ObjectReference,
        kind: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.lock().push(RecordedEvent {
            warning: matches!(kind, EventType::Warning),
            reason: reason.into(),
            action: action.into(),
            note,
        });
    }
}

/// Event reasons cairn emits
pub mod reasons {
    /// The cloud bucket was created by this reconcile
    pub const BUCKET_CREATED: &str = "BucketCreated";
    /// Bucket creation failed
    pub const BUCKET_CREATION_FAILED: &str = "BucketCreationFailed";
    /// The cloud bucket was deleted along with its CloudBucket
    pub const BUCKET_DELETED: &str = "BucketDeleted";
    /// Bucket deletion failed
    pub const BUCKET_DELETION_FAILED: &str = "BucketDeletionFailed";
    /// The delete-confirmation annotation is not a boolean
    pub const DELETE_ANNOTATION_INVALID: &str = "DeleteAnnotationInvalid";
    /// A backup location could not be resolved
    pub const LOCATION_RESOLUTION_FAILED: &str = "LocationResolutionFailed";
}

/// Event actions cairn reports
pub mod actions {
    /// A reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Creating a cloud bucket
    pub const CREATE: &str = "Create";
    /// Deleting a cloud bucket
    pub const DELETE: &str = "Delete";
}
