//! Bucket and container name validation
//!
//! Runs before any network call so that invalid names fail fast with a
//! validation error instead of a provider 400.

use std::net::Ipv4Addr;

use cairn_common::crd::CloudProvider;
use cairn_common::Error;

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 63;
const GCS_DOTTED_MAX_LEN: usize = 222;

fn invalid(name: &str, message: impl Into<String>) -> Error {
    Error::validation_for_field(format!("bucket {:?}", name), "spec.name", message)
}

fn alnum_edges(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
        }
        _ => false,
    }
}

fn check_length(name: &str, max: usize) -> Result<(), Error> {
    if name.len() < MIN_LEN || name.len() > max {
        return Err(invalid(
            name,
            format!("must be between {} and {} characters", MIN_LEN, max),
        ));
    }
    Ok(())
}

fn check_chars(name: &str, extra: &[char]) -> Result<(), Error> {
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || extra.contains(c)))
    {
        return Err(invalid(name, format!("invalid character {:?}", c)));
    }
    Ok(())
}

/// Validate an S3 bucket name
pub fn validate_s3_name(name: &str) -> Result<(), Error> {
    check_length(name, MAX_LEN)?;
    check_chars(name, &['.', '-'])?;
    if !alnum_edges(name) {
        return Err(invalid(name, "must start and end with a letter or digit"));
    }
    if name.contains("..") {
        return Err(invalid(name, "must not contain consecutive periods"));
    }
    if name.parse::<Ipv4Addr>().is_ok() {
        return Err(invalid(name, "must not be formatted as an IP address"));
    }
    if name.starts_with("xn--") || name.starts_with("sthree-") {
        return Err(invalid(name, "must not start with a reserved prefix"));
    }
    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return Err(invalid(name, "must not end with a reserved suffix"));
    }
    Ok(())
}

/// Validate an Azure Blob container name
pub fn validate_azure_name(name: &str) -> Result<(), Error> {
    check_length(name, MAX_LEN)?;
    check_chars(name, &['-'])?;
    if !alnum_edges(name) {
        return Err(invalid(name, "must not start or end with a hyphen"));
    }
    if name.contains("--") {
        return Err(invalid(name, "must not contain consecutive hyphens"));
    }
    Ok(())
}

/// Validate a GCS bucket name
pub fn validate_gcs_name(name: &str) -> Result<(), Error> {
    let dotted = name.contains('.');
    check_length(name, if dotted { GCS_DOTTED_MAX_LEN } else { MAX_LEN })?;
    check_chars(name, &['-', '_', '.'])?;
    if !alnum_edges(name) {
        return Err(invalid(name, "must start and end with a letter or digit"));
    }
    if dotted {
        if name.split('.').any(|part| part.is_empty() || part.len() > MAX_LEN) {
            return Err(invalid(
                name,
                format!("each dot-separated component must be 1 to {} characters", MAX_LEN),
            ));
        }
        if name.parse::<Ipv4Addr>().is_ok() {
            return Err(invalid(name, "must not be an IP address in dotted-decimal notation"));
        }
    }
    if name.starts_with("goog") {
        return Err(invalid(name, "must not start with \"goog\""));
    }
    if name.contains("google") || name.contains("g00gle") {
        return Err(invalid(name, "must not contain \"google\""));
    }
    Ok(())
}

/// Validate a bucket name for a provider
pub fn validate_bucket_name(provider: CloudProvider, name: &str) -> Result<(), Error> {
    match provider {
        CloudProvider::Aws => validate_s3_name(name),
        CloudProvider::Azure => validate_azure_name(name),
        CloudProvider::Gcp => validate_gcs_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_names() {
        for ok in ["test-aws-bucket", "my.bucket.name", "abc", "a1b2c3"] {
            assert!(validate_s3_name(ok).is_ok(), "{ok} should be valid");
        }
        for bad in [
            "ab",
            "a".repeat(64).as_str(),
            "My-Bucket",
            "-bucket",
            "bucket-",
            "my..bucket",
            "192.168.5.4",
            "xn--bucket",
            "bucket-s3alias",
            "under_score",
        ] {
            assert!(validate_s3_name(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn azure_names() {
        for ok in ["velero", "backup-container-1", "abc"] {
            assert!(validate_azure_name(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["ab", "-velero", "velero-", "vel--ero", "Velero", "vel.ero", "a".repeat(64).as_str()] {
            assert!(validate_azure_name(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn gcs_names() {
        for ok in [
            "my-gcs-bucket",
            "with_underscore",
            "example.com.backups",
            format!("{}.{}", "a".repeat(63), "b".repeat(63)).as_str(),
        ] {
            assert!(validate_gcs_name(ok).is_ok(), "{ok} should be valid");
        }
        for bad in [
            "ab",
            "a".repeat(64).as_str(),
            format!("{}.b", "a".repeat(64)).as_str(),
            "10.0.0.1",
            "goog-bucket",
            "my-google-bucket",
            "my-g00gle-bucket",
            "_bucket",
            "UPPER",
            "a..b",
        ] {
            assert!(validate_gcs_name(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn errors_are_validation_errors_naming_the_bucket() {
        let err = validate_bucket_name(CloudProvider::Azure, "-x-").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("\"-x-\""));
    }
}
