//! CloudBucket controller
//!
//! Ensures the bucket described by a CloudBucket exists at its provider and
//! reports the outcome through the `BucketReady` condition. A finalizer guards
//! deletion: the cloud bucket itself is only deleted when the CloudBucket
//! carries the delete-confirmation annotation set to true.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use cairn_common::crd::{
    set_condition, CloudBucket, CloudBucketStatus, Condition, ConditionStatus,
    CONDITION_BUCKET_READY, REASON_BUCKET_CREATED, REASON_BUCKET_CREATION_FAILED,
    REASON_BUCKET_READY,
};
use cairn_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use cairn_common::kube_utils::{namespaced_name, parse_bool};
use cairn_common::{
    Error, Settings, CLOUD_BUCKET_FINALIZER, REQUEUE_ERROR_SECS, REQUEUE_SUCCESS_SECS,
    REQUEUE_VALIDATION_SECS,
};
use cairn_credentials::{CredentialCache, CredentialResolver};

use crate::client::{BucketClient, BucketTarget};
use crate::factory::{BucketClientFactory, DefaultBucketClientFactory};

const FIELD_MANAGER: &str = "cairn-cloudbucket-controller";

/// Kubernetes operations needed by the CloudBucket controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudBucketKubeClient: Send + Sync {
    /// Get a Secret, or None if it does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Add a finalizer to a CloudBucket
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from a CloudBucket
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Replace the status of a CloudBucket
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudBucketStatus,
    ) -> Result<(), Error>;
}

/// [`CloudBucketKubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<CloudBucket> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CloudBucketKubeClient for KubeClientImpl {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<CloudBucket> = Api::namespaced(self.client.clone(), namespace);
        let bucket = api.get(name).await?;
        let mut finalizers = bucket.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(name, namespace, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<CloudBucket> = Api::namespaced(self.client.clone(), namespace);
        let bucket = match api.get_opt(name).await? {
            Some(bucket) => bucket,
            None => return Ok(()),
        };
        let finalizers: Vec<String> = bucket
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        self.patch_finalizers(name, namespace, finalizers).await
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudBucketStatus,
    ) -> Result<(), Error> {
        let api: Api<CloudBucket> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared state for CloudBucket reconciliation
pub struct Context {
    /// Kubernetes access
    pub kube: Arc<dyn CloudBucketKubeClient>,
    /// Builds provider clients
    pub clients: Arc<dyn BucketClientFactory>,
    /// Parses credential secrets
    pub credentials: CredentialResolver,
    /// Parsed credentials, keyed by secret
    pub cache: Arc<CredentialCache>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Runtime settings
    pub settings: Settings,
}

impl Context {
    /// Create a context talking to the cluster and the real providers
    pub fn new(client: Client, settings: Settings) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client.clone())),
            clients: Arc::new(DefaultBucketClientFactory::new(settings.clone())),
            credentials: CredentialResolver::default(),
            cache: Arc::new(CredentialCache::new(settings.credential_cache_ttl)),
            events: Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER)),
            settings,
        }
    }

    /// Create a context from explicit parts
    pub fn for_testing(
        kube: Arc<dyn CloudBucketKubeClient>,
        clients: Arc<dyn BucketClientFactory>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let settings = Settings::default();
        Self {
            kube,
            clients,
            credentials: CredentialResolver::default(),
            cache: Arc::new(CredentialCache::new(settings.credential_cache_ttl)),
            events,
            settings,
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

/// Reconcile a CloudBucket
#[instrument(skip(bucket, ctx), fields(cloud_bucket = %bucket.name_any(), provider = %bucket.spec.provider))]
pub async fn reconcile(bucket: Arc<CloudBucket>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = bucket.name_any();
    let namespace = bucket.namespace().unwrap_or_default();

    if bucket.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&bucket, &ctx).await;
    }

    if !bucket.has_finalizer() {
        info!(cloud_bucket = %name, "Adding finalizer");
        ctx.kube
            .add_finalizer(&name, &namespace, CLOUD_BUCKET_FINALIZER)
            .await?;
    }

    let client = match bucket_client(&bucket, &ctx).await {
        Ok(client) => client,
        Err(e) => return report_failure(&bucket, &ctx, e).await,
    };

    let reason = match ensure_bucket(client.as_ref()).await {
        Ok(reason) => reason,
        Err(e) => return report_failure(&bucket, &ctx, e).await,
    };

    if reason == REASON_BUCKET_CREATED {
        ctx.events
            .publish(
                &object_ref(&bucket),
                EventType::Normal,
                reasons::BUCKET_CREATED,
                actions::CREATE,
                Some(format!("Created bucket {}", bucket.spec.name)),
            )
            .await;
    }

    let message = if reason == REASON_BUCKET_CREATED {
        format!("bucket {} created", bucket.spec.name)
    } else {
        format!("bucket {} exists", bucket.spec.name)
    };
    update_status(
        &bucket,
        &ctx,
        Condition::new(CONDITION_BUCKET_READY, ConditionStatus::True, reason, message),
        Some(bucket.spec.name.clone()),
    )
    .await?;

    Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
}

/// Requeue after an error escaping reconcile
pub fn error_policy(bucket: Arc<CloudBucket>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cloud_bucket = %bucket.name_any(),
        "reconciliation failed"
    );
    requeue_for(error)
}

/// Run the CloudBucket controller until shutdown
pub async fn run(client: Client, settings: Settings) {
    let buckets: Api<CloudBucket> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(client, settings));
    Controller::new(buckets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => debug!(?action, "CloudBucket reconciliation completed"),
                Err(e) => error!(error = ?e, "CloudBucket reconciliation error"),
            }
        })
        .await;
}

fn object_ref(bucket: &CloudBucket) -> ObjectReference {
    bucket.object_ref(&())
}

/// Resolve the creation secret and build a provider client
async fn bucket_client(
    bucket: &CloudBucket,
    ctx: &Context,
) -> Result<Box<dyn BucketClient>, Error> {
    let namespace = bucket.namespace().unwrap_or_default();
    let secret_ref = &bucket.spec.creation_secret;
    let provider = bucket.spec.provider;

    if secret_ref.name.trim().is_empty() || secret_ref.key.trim().is_empty() {
        return Err(Error::validation_for_field(
            namespaced_name(&namespace, &bucket.name_any()),
            "spec.creationSecret",
            "creation secret name and key must not be empty",
        ));
    }

    let secret = ctx
        .kube
        .get_secret(&secret_ref.name, &namespace)
        .await?
        .ok_or_else(|| {
            Error::not_found(
                format!("Secret {}", namespaced_name(&namespace, &secret_ref.name)),
                provider.as_str(),
                "creation secret does not exist",
            )
        })?;

    let credential = ctx.credentials.parse_secret(
        &secret,
        &secret_ref.key,
        provider,
        &bucket.spec.config,
        Some(ctx.cache.as_ref()),
    )?;
    ctx.clients.client(BucketTarget::from(&bucket.spec), &credential)
}

/// Exists, then Create; returns the BucketReady reason
async fn ensure_bucket(client: &dyn BucketClient) -> Result<&'static str, Error> {
    if client.exists().await? {
        return Ok(REASON_BUCKET_READY);
    }
    client.create().await?;
    Ok(REASON_BUCKET_CREATED)
}

async fn report_failure(bucket: &CloudBucket, ctx: &Context, e: Error) -> Result<Action, Error> {
    warn!(cloud_bucket = %bucket.name_any(), error = %e, "Bucket is not ready");
    let message = e.to_string();
    ctx.events
        .publish(
            &object_ref(bucket),
            EventType::Warning,
            reasons::BUCKET_CREATION_FAILED,
            actions::CREATE,
            Some(message.clone()),
        )
        .await;
    update_status(
        bucket,
        ctx,
        Condition::new(
            CONDITION_BUCKET_READY,
            ConditionStatus::False,
            REASON_BUCKET_CREATION_FAILED,
            message,
        ),
        bucket.status.as_ref().and_then(|s| s.name.clone()),
    )
    .await?;
    Ok(requeue_for(&e))
}

async fn handle_deletion(bucket: &CloudBucket, ctx: &Context) -> Result<Action, Error> {
    let name = bucket.name_any();
    let namespace = bucket.namespace().unwrap_or_default();
    if !bucket.has_finalizer() {
        return Ok(Action::await_change());
    }

    let delete_bucket = match bucket.delete_annotation().map(parse_bool) {
        None => false,
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!(cloud_bucket = %name, error = %e, "Invalid delete annotation");
            ctx.events
                .publish(
                    &object_ref(bucket),
                    EventType::Warning,
                    reasons::DELETE_ANNOTATION_INVALID,
                    actions::DELETE,
                    Some(e),
                )
                .await;
            return Ok(Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS)));
        }
    };

    if delete_bucket {
        let deleted = match bucket_client(bucket, ctx).await {
            Ok(client) => client.delete().await,
            Err(e) => Err(e),
        };
        if let Err(e) = deleted {
            ctx.events
                .publish(
                    &object_ref(bucket),
                    EventType::Warning,
                    reasons::BUCKET_DELETION_FAILED,
                    actions::DELETE,
                    Some(e.to_string()),
                )
                .await;
            return Err(e);
        }
        info!(cloud_bucket = %name, bucket = %bucket.spec.name, "Deleted cloud bucket");
        ctx.events
            .publish(
                &object_ref(bucket),
                EventType::Normal,
                reasons::BUCKET_DELETED,
                actions::DELETE,
                Some(format!("Deleted bucket {}", bucket.spec.name)),
            )
            .await;
    } else {
        debug!(cloud_bucket = %name, "Leaving cloud bucket in place");
    }

    ctx.kube
        .remove_finalizer(&name, &namespace, CLOUD_BUCKET_FINALIZER)
        .await?;
    Ok(Action::await_change())
}

/// Write status when the condition or bucket name changed
async fn update_status(
    bucket: &CloudBucket,
    ctx: &Context,
    condition: Condition,
    bucket_name: Option<String>,
) -> Result<(), Error> {
    let current = bucket.status.clone().unwrap_or_default();
    let mut status = current.clone();
    let condition_changed = set_condition(&mut status.conditions, condition);
    status.name = bucket_name;
    status.observed_generation = bucket.metadata.generation;

    if !condition_changed && status == current {
        debug!(cloud_bucket = %bucket.name_any(), "status unchanged, skipping update");
        return Ok(());
    }
    status.last_synced = Some(Utc::now());

    ctx.kube
        .patch_status(
            &bucket.name_any(),
            &bucket.namespace().unwrap_or_default(),
            &status,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockBucketClient;
    use crate::factory::MockBucketClientFactory;
    use cairn_common::events::RecordingEventPublisher;
    use cairn_common::crd::{CloudBucketSpec, CloudProvider, SecretKeyRef};
    use cairn_common::{ProviderFailure, CLOUD_BUCKET_DELETE_ANNOTATION};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    const AWS_CREDENTIALS: &str =
        "[default]\naws_access_key_id = AKIA\naws_secret_access_key = secret\n";

    fn sample_bucket() -> CloudBucket {
        let mut bucket = CloudBucket::new(
            "backups",
            CloudBucketSpec {
                name: "test-aws-bucket".to_string(),
                provider: CloudProvider::Aws,
                region: Some("us-east-1".to_string()),
                config: BTreeMap::new(),
                tags: BTreeMap::new(),
                creation_secret: SecretKeyRef::new("cloud-credentials", "cloud"),
                enable_shared_config: None,
            },
        );
        bucket.metadata.namespace = Some("velero".to_string());
        bucket.metadata.generation = Some(1);
        bucket.metadata.finalizers = Some(vec![CLOUD_BUCKET_FINALIZER.to_string()]);
        bucket
    }

    fn deleting(annotation: Option<&str>) -> CloudBucket {
        let mut bucket = sample_bucket();
        bucket.metadata.deletion_timestamp = Some(Time(Utc::now()));
        if let Some(value) = annotation {
            bucket.metadata.annotations = Some(BTreeMap::from([(
                CLOUD_BUCKET_DELETE_ANNOTATION.to_string(),
                value.to_string(),
            )]));
        }
        bucket
    }

    fn aws_secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("cloud-credentials".to_string()),
                namespace: Some("velero".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "cloud".to_string(),
                ByteString(AWS_CREDENTIALS.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    fn kube_with_secret() -> MockCloudBucketKubeClient {
        let mut kube = MockCloudBucketKubeClient::new();
        kube.expect_get_secret()
            .returning(|_, _| Ok(Some(aws_secret())));
        kube
    }

    fn factory_with(client: MockBucketClient) -> MockBucketClientFactory {
        let mut factory = MockBucketClientFactory::new();
        factory
            .expect_client()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(client)));
        factory
    }

    fn context(
        kube: MockCloudBucketKubeClient,
        factory: MockBucketClientFactory,
        events: Arc<RecordingEventPublisher>,
    ) -> Arc<Context> {
        Arc::new(Context::for_testing(Arc::new(kube), Arc::new(factory), events))
    }

    #[tokio::test]
    async fn creates_missing_bucket_and_reports_ready() {
        let mut client = MockBucketClient::new();
        client.expect_exists().times(1).returning(|| Ok(false));
        client.expect_create().times(1).returning(|| Ok(true));

        let mut kube = kube_with_secret();
        kube.expect_patch_status()
            .withf(|name, namespace, status| {
                let ready = &status.conditions[0];
                name == "backups"
                    && namespace == "velero"
                    && status.name.as_deref() == Some("test-aws-bucket")
                    && status.last_synced.is_some()
                    && ready.status == ConditionStatus::True
                    && ready.reason == REASON_BUCKET_CREATED
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let events = Arc::new(RecordingEventPublisher::default());
        let action = reconcile(
            Arc::new(sample_bucket()),
            context(kube, factory_with(client), events.clone()),
        )
        .await
        .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)));
        assert_eq!(events.reasons(), vec![(false, reasons::BUCKET_CREATED.to_string())]);
    }

    #[tokio::test]
    async fn adds_finalizer_on_first_reconcile() {
        let mut client = MockBucketClient::new();
        client.expect_exists().times(1).returning(|| Ok(true));
        client.expect_create().times(0);

        let mut kube = kube_with_secret();
        kube.expect_add_finalizer()
            .withf(|name, namespace, finalizer| {
                name == "backups" && namespace == "velero" && finalizer == CLOUD_BUCKET_FINALIZER
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        kube.expect_patch_status()
            .withf(|_, _, status| status.conditions[0].reason == REASON_BUCKET_READY)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut bucket = sample_bucket();
        bucket.metadata.finalizers = None;
        let events = Arc::new(RecordingEventPublisher::default());
        reconcile(Arc::new(bucket), context(kube, factory_with(client), events.clone()))
            .await
            .unwrap();
        assert!(events.reasons().is_empty());
    }

    #[tokio::test]
    async fn unchanged_status_is_not_rewritten() {
        let mut client = MockBucketClient::new();
        client.expect_exists().times(1).returning(|| Ok(true));

        let mut kube = kube_with_secret();
        kube.expect_patch_status().times(0);

        let mut bucket = sample_bucket();
        let mut status = CloudBucketStatus {
            name: Some("test-aws-bucket".to_string()),
            last_synced: Some(Utc::now()),
            conditions: Vec::new(),
            observed_generation: Some(1),
        };
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_BUCKET_READY,
                ConditionStatus::True,
                REASON_BUCKET_READY,
                "bucket test-aws-bucket exists",
            ),
        );
        bucket.status = Some(status);

        reconcile(
            Arc::new(bucket),
            context(kube, factory_with(client), Arc::new(RecordingEventPublisher::default())),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn creation_failure_sets_condition_with_provider_text() {
        let mut client = MockBucketClient::new();
        client.expect_exists().times(1).returning(|| Ok(false));
        client.expect_create().times(1).returning(|| {
            Err(Error::provider(
                "aws",
                "create",
                ProviderFailure::Authorization,
                Some(403),
                "AccessDenied: not allowed",
            ))
        });

        let mut kube = kube_with_secret();
        kube.expect_patch_status()
            .withf(|_, _, status| {
                let ready = &status.conditions[0];
                ready.status == ConditionStatus::False
                    && ready.reason == REASON_BUCKET_CREATION_FAILED
                    && ready.message.contains("AccessDenied")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let events = Arc::new(RecordingEventPublisher::default());
        let action = reconcile(
            Arc::new(sample_bucket()),
            context(kube, factory_with(client), events.clone()),
        )
        .await
        .unwrap();

        assert_eq!(
            action,
            Action::requeue(Duration::from_secs(REQUEUE_VALIDATION_SECS))
        );
        assert_eq!(
            events.reasons(),
            vec![(true, reasons::BUCKET_CREATION_FAILED.to_string())]
        );
    }

    #[tokio::test]
    async fn missing_secret_is_reported_without_provider_calls() {
        let mut kube = MockCloudBucketKubeClient::new();
        kube.expect_get_secret().returning(|_, _| Ok(None));
        kube.expect_patch_status()
            .withf(|_, _, status| status.conditions[0].message.contains("cloud-credentials"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut factory = MockBucketClientFactory::new();
        factory.expect_client().times(0);

        reconcile(
            Arc::new(sample_bucket()),
            context(kube, factory, Arc::new(RecordingEventPublisher::default())),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn deletion_with_true_annotation_deletes_bucket() {
        let mut client = MockBucketClient::new();
        client.expect_delete().times(1).returning(|| Ok(true));

        let mut kube = kube_with_secret();
        kube.expect_remove_finalizer()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let events = Arc::new(RecordingEventPublisher::default());
        let action = reconcile(
            Arc::new(deleting(Some("true"))),
            context(kube, factory_with(client), events.clone()),
        )
        .await
        .unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(events.reasons(), vec![(false, reasons::BUCKET_DELETED.to_string())]);
    }

    #[tokio::test]
    async fn deletion_without_annotation_keeps_bucket() {
        for annotation in [None, Some("false"), Some("0")] {
            let mut kube = MockCloudBucketKubeClient::new();
            kube.expect_remove_finalizer()
                .times(1)
                .returning(|_, _, _| Ok(()));
            let mut factory = MockBucketClientFactory::new();
            factory.expect_client().times(0);

            reconcile(
                Arc::new(deleting(annotation)),
                context(kube, factory, Arc::new(RecordingEventPublisher::default())),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn invalid_annotation_keeps_finalizer_and_warns() {
        let mut kube = MockCloudBucketKubeClient::new();
        kube.expect_remove_finalizer().times(0);
        let mut factory = MockBucketClientFactory::new();
        factory.expect_client().times(0);

        let events = Arc::new(RecordingEventPublisher::default());
        let action = reconcile(
            Arc::new(deleting(Some("maybe"))),
            context(kube, factory, events.clone()),
        )
        .await
        .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS)));
        assert_eq!(
            events.reasons(),
            vec![(true, reasons::DELETE_ANNOTATION_INVALID.to_string())]
        );
    }

    #[tokio::test]
    async fn failed_delete_keeps_finalizer() {
        let mut client = MockBucketClient::new();
        client.expect_delete().times(1).returning(|| {
            Err(Error::provider(
                "aws",
                "delete",
                ProviderFailure::Conflict,
                Some(409),
                "BucketNotEmpty",
            ))
        });
        let mut kube = kube_with_secret();
        kube.expect_remove_finalizer().times(0);

        let events = Arc::new(RecordingEventPublisher::default());
        let result = reconcile(
            Arc::new(deleting(Some("true"))),
            context(kube, factory_with(client), events.clone()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            events.reasons(),
            vec![(true, reasons::BUCKET_DELETION_FAILED.to_string())]
        );
    }

    #[test]
    fn requeue_intervals_follow_retryability() {
        assert_eq!(
            requeue_for(&Error::validation("bad")),
            Action::requeue(Duration::from_secs(REQUEUE_VALIDATION_SECS))
        );
        assert_eq!(
            requeue_for(&Error::provider("gcp", "create", ProviderFailure::Transient, Some(503), "x")),
            Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
        );
    }
}
