//! CA bundle aggregation
//!
//! Every resolved location may carry CA certificates for its storage
//! endpoint. They are validated, de-duplicated, and written as one PEM file
//! into a single ConfigMap so that consumers trust every endpoint at once.
//! The bundle is rebuilt from scratch on every reconcile.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::{debug, info};
use x509_parser::prelude::{FromDer, X509Certificate};

use cairn_common::settings::CA_BUNDLE_KEY;
use cairn_common::{Error, Settings, COMPONENT_CA_BUNDLE};
use cairn_common::kube_utils::owned_labels;

use crate::kube_client::LocationKubeClient;
use crate::resolver::ResolvedLocation;

const PEM_CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Check that `pem` holds one or more well-formed X.509 certificates
pub fn validate_ca_pem(pem_data: &[u8]) -> Result<(), String> {
    if pem_data.iter().all(u8::is_ascii_whitespace) {
        return Err("CA certificate is empty".to_string());
    }
    let blocks = pem::parse_many(pem_data).map_err(|e| format!("malformed PEM: {}", e))?;
    if blocks.is_empty() {
        return Err("no PEM blocks found".to_string());
    }
    for (i, block) in blocks.iter().enumerate() {
        if block.tag() != PEM_CERTIFICATE_TAG {
            return Err(format!(
                "PEM block {} is {:?}, expected {}",
                i,
                block.tag(),
                PEM_CERTIFICATE_TAG
            ));
        }
        X509Certificate::from_der(block.contents())
            .map_err(|e| format!("PEM block {} is not a valid certificate: {}", i, e))?;
    }
    Ok(())
}

/// Concatenate the distinct CA certificates of `locations`, in encounter order.
///
/// Locations without a CA and providers excluded by `settings` contribute
/// nothing. Returns an empty string when no certificate remains.
pub fn collect_ca_bundle(
    locations: &[ResolvedLocation],
    settings: &Settings,
) -> Result<String, Error> {
    let mut seen: HashSet<&[u8]> = HashSet::new();
    let mut bundle = String::new();

    for location in locations {
        let Some(ca) = location.ca_cert.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };
        if !settings.bundles_ca_for(location.provider) {
            info!(
                location = %location.name,
                provider = %location.provider,
                "Provider is excluded from the CA bundle, skipping its CA certificate"
            );
            continue;
        }
        validate_ca_pem(ca).map_err(|e| {
            Error::validation_for_field(
                format!("location {}", location.name),
                "caCert",
                e,
            )
        })?;
        if !seen.insert(ca) {
            debug!(location = %location.name, "Duplicate CA certificate");
            continue;
        }

        let text = std::str::from_utf8(ca).map_err(|_| {
            Error::validation_for_field(
                format!("location {}", location.name),
                "caCert",
                "CA certificate is not valid UTF-8",
            )
        })?;
        bundle.push_str(text);
        if !text.ends_with('\n') {
            bundle.push('\n');
        }
    }
    Ok(bundle)
}

/// The CA bundle ConfigMap
pub fn bundle_config_map(
    name: &str,
    namespace: &str,
    owner: &str,
    owner_ref: Option<OwnerReference>,
    bundle: String,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(owned_labels(name, COMPONENT_CA_BUNDLE, owner)),
            owner_references: owner_ref.map(|r| vec![r]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(CA_BUNDLE_KEY.to_string(), bundle)])),
        ..Default::default()
    }
}

/// Build and write the CA bundle for `locations`.
///
/// Returns the ConfigMap name, or an empty string when no location carries a
/// CA certificate (nothing is written in that case).
pub async fn aggregate(
    kube: &dyn LocationKubeClient,
    namespace: &str,
    owner: &str,
    owner_ref: Option<OwnerReference>,
    locations: &[ResolvedLocation],
    settings: &Settings,
) -> Result<String, Error> {
    let bundle = collect_ca_bundle(locations, settings)?;
    if bundle.is_empty() {
        return Ok(String::new());
    }

    let name = settings.ca_bundle_name.clone();
    kube.apply_config_map(&bundle_config_map(&name, namespace, owner, owner_ref, bundle))
        .await?;
    info!(config_map = %name, namespace, "CA bundle written");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_client::MockLocationKubeClient;
    use cairn_common::crd::CloudProvider;
    use rcgen::{CertificateParams, KeyPair};

    fn cert_pem(cn: &str) -> String {
        let key = KeyPair::generate().unwrap();
        CertificateParams::new(vec![cn.to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap()
            .pem()
    }

    fn location(name: &str, provider: CloudProvider, ca: Option<&str>) -> ResolvedLocation {
        ResolvedLocation {
            name: name.to_string(),
            provider,
            bucket: "cairn-backups".to_string(),
            prefix: Some("velero".to_string()),
            ca_cert: ca.map(|c| c.as_bytes().to_vec()),
            credential: None,
            config: BTreeMap::new(),
            default: false,
            backup_sync_period: None,
        }
    }

    fn count_certs(bundle: &str) -> usize {
        bundle.matches("-----BEGIN CERTIFICATE-----").count()
    }

    #[test]
    fn identical_certs_are_bundled_once() {
        let ca = cert_pem("minio.local");
        let bundle = collect_ca_bundle(
            &[
                location("a", CloudProvider::Aws, Some(&ca)),
                location("b", CloudProvider::Aws, Some(&ca)),
            ],
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(count_certs(&bundle), 1);
        assert_eq!(bundle.matches(ca.trim_end()).count(), 1);
    }

    #[test]
    fn distinct_certs_are_concatenated_in_order() {
        let first = cert_pem("one.local");
        let second = cert_pem("two.local");
        let third = cert_pem("three.local");
        let bundle = collect_ca_bundle(
            &[
                location("a", CloudProvider::Aws, Some(&first)),
                location("none", CloudProvider::Gcp, None),
                location("b", CloudProvider::Azure, Some(&second)),
                location("c", CloudProvider::Gcp, Some(&third)),
            ],
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(count_certs(&bundle), 3);
        let pos = |pem: &str| bundle.find(pem.trim_end()).unwrap();
        assert!(pos(&first) < pos(&second));
        assert!(pos(&second) < pos(&third));
    }

    #[test]
    fn locations_without_ca_yield_empty_bundle() {
        let bundle = collect_ca_bundle(
            &[
                location("a", CloudProvider::Aws, None),
                location("b", CloudProvider::Aws, Some("")),
            ],
            &Settings::default(),
        )
        .unwrap();
        assert!(bundle.is_empty());
    }

    #[test]
    fn excluded_providers_are_skipped() {
        let settings = Settings {
            ca_bundle_excluded_providers: vec![CloudProvider::Azure],
            ..Default::default()
        };
        let aws = cert_pem("aws.local");
        let azure = cert_pem("azure.local");
        let bundle = collect_ca_bundle(
            &[
                location("a", CloudProvider::Aws, Some(&aws)),
                location("b", CloudProvider::Azure, Some(&azure)),
            ],
            &settings,
        )
        .unwrap();
        assert_eq!(count_certs(&bundle), 1);
        assert!(bundle.contains(aws.trim_end()));
    }

    #[test]
    fn invalid_pem_is_rejected() {
        assert!(validate_ca_pem(b"  \n").is_err());
        assert!(validate_ca_pem(b"not pem at all").is_err());

        let key = KeyPair::generate().unwrap();
        let err = validate_ca_pem(key.serialize_pem().as_bytes()).unwrap_err();
        assert!(err.contains("expected CERTIFICATE"));

        let garbage = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(validate_ca_pem(garbage.as_bytes()).is_err());

        let two = format!("{}{}", cert_pem("a.local"), cert_pem("b.local"));
        assert!(validate_ca_pem(two.as_bytes()).is_ok());
    }

    #[test]
    fn invalid_location_ca_names_the_location() {
        let err = collect_ca_bundle(
            &[location("broken", CloudProvider::Aws, Some("garbage"))],
            &Settings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("location broken"));
    }

    #[tokio::test]
    async fn aggregate_writes_labelled_config_map() {
        let ca = cert_pem("minio.local");
        let mut kube = MockLocationKubeClient::new();
        kube.expect_apply_config_map()
            .withf(|cm| {
                let labels = cm.metadata.labels.clone().unwrap_or_default();
                cm.metadata.name.as_deref() == Some("cairn-ca-bundle")
                    && cm.metadata.namespace.as_deref() == Some("velero")
                    && labels.get(cairn_common::LABEL_COMPONENT).map(String::as_str)
                        == Some("ca-bundle")
                    && labels.get(cairn_common::LABEL_OWNER).map(String::as_str) == Some("dp")
                    && cm
                        .data
                        .as_ref()
                        .and_then(|d| d.get(CA_BUNDLE_KEY))
                        .is_some_and(|b| b.contains("BEGIN CERTIFICATE"))
            })
            .times(1)
            .returning(|_| Ok(()));

        let name = aggregate(
            &kube,
            "velero",
            "dp",
            None,
            &[location("a", CloudProvider::Aws, Some(&ca))],
            &Settings::default(),
        )
        .await
        .unwrap();
        assert_eq!(name, "cairn-ca-bundle");
    }

    #[tokio::test]
    async fn aggregate_without_certs_writes_nothing() {
        let mut kube = MockLocationKubeClient::new();
        kube.expect_apply_config_map().times(0);
        let name = aggregate(
            &kube,
            "velero",
            "dp",
            None,
            &[location("a", CloudProvider::Aws, None)],
            &Settings::default(),
        )
        .await
        .unwrap();
        assert_eq!(name, "");
    }
}
