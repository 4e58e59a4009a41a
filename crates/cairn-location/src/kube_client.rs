//! Cluster access for location reconciliation
//!
//! Velero's BackupStorageLocation is a foreign CRD, so it is read and written
//! through `DynamicObject` with the API resource derived from
//! [`HasApiResource`] and converted to and from the typed struct via JSON.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use cairn_common::crd::{CloudBucket, DataProtection, DataProtectionStatus};
use cairn_common::kube_utils::HasApiResource;
use cairn_common::velero::BackupStorageLocation;
use cairn_common::{Error, COMPONENT_BSL, LABEL_COMPONENT, LABEL_OWNER};

/// Field manager for every write made by location reconciliation
pub const FIELD_MANAGER: &str = "cairn-location-controller";

/// Kubernetes operations needed to resolve and write backup locations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocationKubeClient: Send + Sync {
    /// Get a CloudBucket, or None if it does not exist
    async fn get_cloud_bucket(&self, name: &str, namespace: &str)
        -> Result<Option<CloudBucket>, Error>;

    /// Get a Secret, or None if it does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Overwrite one key of a Secret's data
    async fn update_secret_data(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), Error>;

    /// Get a BackupStorageLocation, or None if it does not exist
    async fn get_backup_location(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BackupStorageLocation>, Error>;

    /// Create a BackupStorageLocation
    async fn create_backup_location(&self, bsl: &BackupStorageLocation) -> Result<(), Error>;

    /// Replace a BackupStorageLocation; the metadata must carry its resourceVersion
    async fn replace_backup_location(&self, bsl: &BackupStorageLocation) -> Result<(), Error>;

    /// List the BackupStorageLocations labelled as owned by `owner`
    async fn list_backup_locations(
        &self,
        namespace: &str,
        owner: &str,
    ) -> Result<Vec<BackupStorageLocation>, Error>;

    /// Delete a BackupStorageLocation; absent objects are not an error
    async fn delete_backup_location(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Server-side apply a ConfigMap
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    /// Replace the status of a DataProtection
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &DataProtectionStatus,
    ) -> Result<(), Error>;
}

/// [`LocationKubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn bsl_api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &BackupStorageLocation::api_resource(),
        )
    }
}

fn to_dynamic(bsl: &BackupStorageLocation) -> Result<DynamicObject, Error> {
    let value = serde_json::to_value(bsl)
        .map_err(|e| Error::serialization_for_kind(BackupStorageLocation::KIND, e.to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| Error::serialization_for_kind(BackupStorageLocation::KIND, e.to_string()))
}

fn from_dynamic(obj: DynamicObject) -> Result<BackupStorageLocation, Error> {
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(BackupStorageLocation::KIND, e.to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| Error::serialization_for_kind(BackupStorageLocation::KIND, e.to_string()))
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl LocationKubeClient for KubeClientImpl {
    async fn get_cloud_bucket(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CloudBucket>, Error> {
        let api: Api<CloudBucket> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_secret_data(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "data": {
                key: ByteString(value)
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_backup_location(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BackupStorageLocation>, Error> {
        match self.bsl_api(namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(from_dynamic(obj)?)),
            None => Ok(None),
        }
    }

    async fn create_backup_location(&self, bsl: &BackupStorageLocation) -> Result<(), Error> {
        self.bsl_api(&bsl.metadata.namespace)
            .create(&PostParams::default(), &to_dynamic(bsl)?)
            .await?;
        Ok(())
    }

    async fn replace_backup_location(&self, bsl: &BackupStorageLocation) -> Result<(), Error> {
        self.bsl_api(&bsl.metadata.namespace)
            .replace(&bsl.metadata.name, &PostParams::default(), &to_dynamic(bsl)?)
            .await?;
        Ok(())
    }

    async fn list_backup_locations(
        &self,
        namespace: &str,
        owner: &str,
    ) -> Result<Vec<BackupStorageLocation>, Error> {
        let selector = format!(
            "{}={},{}={}",
            LABEL_OWNER, owner, LABEL_COMPONENT, COMPONENT_BSL
        );
        let list = self
            .bsl_api(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn delete_backup_location(&self, name: &str, namespace: &str) -> Result<(), Error> {
        match self
            .bsl_api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let namespace = config_map.metadata.namespace.as_deref().unwrap_or_default();
        let name = config_map.metadata.name.as_deref().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(config_map),
        )
        .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &DataProtectionStatus,
    ) -> Result<(), Error> {
        let api: Api<DataProtection> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
