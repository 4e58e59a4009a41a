//! Write-back patches for STS credential secrets
//!
//! Secrets created for short-lived federated credentials are labelled
//! `cairn.dev/secret-type=sts-credentials`. For those secrets only, the
//! resolved region (AWS) or resource group (Azure) is written into the
//! credential payload so that consumers reading the secret see it. Plain
//! static-key secrets are never modified.

use std::collections::BTreeMap;

use cairn_common::crd::CloudProvider;
use cairn_common::kube_utils::secret_data;
use cairn_common::{STS_SECRET_LABEL, STS_SECRET_LABEL_VALUE};
use k8s_openapi::api::core::v1::Secret;

use crate::aws::DEFAULT_PROFILE;
use crate::azure::RESOURCE_GROUP;

/// Whether a Secret carries the STS marker label
pub fn is_sts_secret(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(STS_SECRET_LABEL))
        .is_some_and(|v| v == STS_SECRET_LABEL_VALUE)
}

/// Set `region = <region>` inside one profile section of an ini document.
///
/// Returns `None` when the section is absent or already carries the value.
pub fn patch_aws_region(text: &str, profile: &str, region: &str) -> Option<String> {
    let mut out: Vec<String> = Vec::new();
    let mut in_section = false;
    let mut section_found = false;
    let mut region_written = false;
    let mut changed = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            if in_section && !region_written {
                out.push(format!("region = {}", region));
                region_written = true;
                changed = true;
            }
            let name = header.trim();
            let name = name.strip_prefix("profile ").map(str::trim).unwrap_or(name);
            in_section = name == profile;
            section_found |= in_section;
            out.push(line.to_string());
            continue;
        }
        if in_section {
            if let Some((key, value)) = trimmed.split_once('=') {
                if key.trim() == "region" {
                    region_written = true;
                    if value.trim() != region {
                        out.push(format!("region = {}", region));
                        changed = true;
                        continue;
                    }
                }
            }
        }
        out.push(line.to_string());
    }
    if in_section && !region_written {
        out.push(format!("region = {}", region));
        changed = true;
    }

    if !section_found || !changed {
        return None;
    }
    let mut patched = out.join("\n");
    patched.push('\n');
    Some(patched)
}

/// Set `AZURE_RESOURCE_GROUP=<group>` in a `KEY=VALUE` blob.
///
/// Returns `None` when the blob already carries the value.
pub fn patch_azure_resource_group(text: &str, resource_group: &str) -> Option<String> {
    let entry = format!("{}={}", RESOURCE_GROUP, resource_group);
    let mut found = false;
    let mut changed = false;
    let mut out: Vec<String> = Vec::new();

    for line in text.lines() {
        match line.trim().split_once('=') {
            Some((key, value)) if key.trim() == RESOURCE_GROUP => {
                found = true;
                if value.trim().trim_matches('"') != resource_group {
                    out.push(entry.clone());
                    changed = true;
                } else {
                    out.push(line.to_string());
                }
            }
            _ => out.push(line.to_string()),
        }
    }
    if !found {
        while out.last().is_some_and(|l| l.trim().is_empty()) {
            out.pop();
        }
        out.push(entry);
        changed = true;
    }

    if !changed {
        return None;
    }
    let mut patched = out.join("\n");
    patched.push('\n');
    Some(patched)
}

/// Compute the patched payload for a location's credential key.
///
/// `config` is the resolved location config; AWS reads `region` and
/// `profile`, Azure reads `resourceGroup`. Returns `None` when the secret is
/// not an STS secret, the value is unknown, or nothing would change.
pub fn sts_patch(
    secret: &Secret,
    key: &str,
    provider: CloudProvider,
    config: &BTreeMap<String, String>,
) -> Option<Vec<u8>> {
    if !is_sts_secret(secret) {
        return None;
    }
    let data = secret_data(secret);
    let current = std::str::from_utf8(data.get(key)?).ok()?;
    let value = |k: &str| config.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());

    let patched = match provider {
        CloudProvider::Aws => {
            let profile = value("profile").unwrap_or(DEFAULT_PROFILE);
            patch_aws_region(current, profile, value("region")?)
        }
        CloudProvider::Azure => patch_azure_resource_group(current, value("resourceGroup")?),
        CloudProvider::Gcp => None,
    }?;
    Some(patched.into_bytes())
}
