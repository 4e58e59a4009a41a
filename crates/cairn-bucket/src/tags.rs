//! Tag, metadata, and label limits per provider
//!
//! S3 tags and Azure container metadata are validated as given. GCS labels
//! have a restricted character set, so they are sanitized first and then
//! validated.

use std::collections::BTreeMap;

use cairn_common::crd::CloudProvider;
use cairn_common::Error;

/// Per-provider limits on tag count and lengths
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagLimits {
    /// Maximum number of tags
    pub max_count: usize,
    /// Maximum key length in characters
    pub max_key_len: usize,
    /// Maximum value length in characters
    pub max_value_len: usize,
}

/// S3 bucket tagging limits
pub const S3_LIMITS: TagLimits = TagLimits {
    max_count: 50,
    max_key_len: 128,
    max_value_len: 256,
};

/// Azure container metadata limits
pub const AZURE_LIMITS: TagLimits = TagLimits {
    max_count: 50,
    max_key_len: 512,
    max_value_len: 256,
};

/// GCS bucket label limits
pub const GCS_LIMITS: TagLimits = TagLimits {
    max_count: 64,
    max_key_len: 63,
    max_value_len: 63,
};

/// Limits for a provider
pub fn limits_for(provider: CloudProvider) -> TagLimits {
    match provider {
        CloudProvider::Aws => S3_LIMITS,
        CloudProvider::Azure => AZURE_LIMITS,
        CloudProvider::Gcp => GCS_LIMITS,
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::validation_for_field("bucket tags", "spec.tags", message)
}

/// Validate tag count and key/value lengths
pub fn validate_tags(provider: CloudProvider, tags: &BTreeMap<String, String>) -> Result<(), Error> {
    let limits = limits_for(provider);
    if tags.len() > limits.max_count {
        return Err(invalid(format!(
            "{} tags exceed the {} limit of {}",
            tags.len(),
            provider,
            limits.max_count
        )));
    }
    for (key, value) in tags {
        if key.is_empty() {
            return Err(invalid("tag keys must not be empty"));
        }
        if key.chars().count() > limits.max_key_len {
            return Err(invalid(format!(
                "tag key {:?} exceeds {} characters",
                key, limits.max_key_len
            )));
        }
        if value.chars().count() > limits.max_value_len {
            return Err(invalid(format!(
                "value of tag {:?} exceeds {} characters",
                key, limits.max_value_len
            )));
        }
    }
    if provider == CloudProvider::Azure {
        if let Some(key) = tags.keys().find(|k| !is_azure_metadata_name(k)) {
            return Err(invalid(format!(
                "metadata name {:?} must be a valid C# identifier",
                key
            )));
        }
    }
    Ok(())
}

fn is_azure_metadata_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sanitize_label_part(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(GCS_LIMITS.max_key_len)
        .collect()
}

/// Convert tags to GCS labels.
///
/// Keys and values are lowercased, characters outside `[a-z0-9_-]` become
/// `_`, and both are truncated to 63 characters. Keys must start with a
/// letter, so keys starting otherwise get an `l` prefix. When two tags
/// collapse to the same key, the later one (in key order) wins.
pub fn sanitize_gcs_labels(tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|(key, value)| {
            let mut key = sanitize_label_part(key);
            if key.is_empty() {
                return None;
            }
            if !key.starts_with(|c: char| c.is_ascii_lowercase()) {
                key.insert(0, 'l');
                key.truncate(GCS_LIMITS.max_key_len);
            }
            Some((key, sanitize_label_part(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn count_limits_per_provider() {
        let fifty_one: BTreeMap<String, String> =
            (0..51).map(|i| (format!("k{i}"), "v".to_string())).collect();
        assert!(validate_tags(CloudProvider::Aws, &fifty_one).is_err());
        assert!(validate_tags(CloudProvider::Azure, &fifty_one).is_err());
        assert!(validate_tags(CloudProvider::Gcp, &fifty_one).is_ok());
    }

    #[test]
    fn length_limits_per_provider() {
        let long_key = tags(&[("k".repeat(129).as_str(), "v")]);
        assert!(validate_tags(CloudProvider::Aws, &long_key).is_err());
        assert!(validate_tags(CloudProvider::Azure, &long_key).is_ok());

        let long_value = tags(&[("k", "v".repeat(257).as_str())]);
        assert!(validate_tags(CloudProvider::Aws, &long_value).is_err());
        assert!(validate_tags(CloudProvider::Azure, &long_value).is_err());
    }

    #[test]
    fn azure_metadata_names_must_be_identifiers() {
        assert!(validate_tags(CloudProvider::Azure, &tags(&[("team_name", "x")])).is_ok());
        assert!(validate_tags(CloudProvider::Azure, &tags(&[("team-name", "x")])).is_err());
        assert!(validate_tags(CloudProvider::Aws, &tags(&[("team-name", "x")])).is_ok());
    }

    #[test]
    fn gcs_labels_are_sanitized() {
        let labels = sanitize_gcs_labels(&tags(&[
            ("Team", "Storage Ops"),
            ("cost.center", "CC/42"),
            ("1st", "x"),
            ("long", "V".repeat(80).as_str()),
        ]));
        assert_eq!(labels.get("team").map(String::as_str), Some("storage_ops"));
        assert_eq!(labels.get("cost_center").map(String::as_str), Some("cc_42"));
        assert_eq!(labels.get("l1st").map(String::as_str), Some("x"));
        assert_eq!(labels["long"].len(), 63);
        assert!(labels["long"].chars().all(|c| c == 'v'));
        assert!(validate_tags(CloudProvider::Gcp, &labels).is_ok());
    }

    #[test]
    fn empty_keys_are_rejected() {
        assert!(validate_tags(CloudProvider::Aws, &tags(&[("", "v")])).is_err());
        assert!(sanitize_gcs_labels(&tags(&[("", "v")])).is_empty());
    }
}
