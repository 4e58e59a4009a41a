//! Batch checks over a parent's location intents
//!
//! These run once per reconcile over the whole list, before any intent is
//! resolved: every entry must name exactly one source, names must be usable
//! and unique, and image backup needs a prefix on every location.

use std::collections::HashMap;

use cairn_common::crd::{BackupLocation, LocationIntent, LocationSource};
use cairn_common::Error;

/// Name of the BackupStorageLocation written for the intent at `index`
///
/// Unnamed intents are numbered from one after their parent.
pub fn target_name(parent: &str, index: usize, intent: &LocationIntent) -> String {
    match &intent.name {
        Some(name) => name.clone(),
        None => format!("{}-{}", parent, index + 1),
    }
}

/// Names of every BackupStorageLocation the intents produce, in order
pub fn target_names(parent: &str, intents: &[LocationIntent]) -> Vec<String> {
    intents
        .iter()
        .enumerate()
        .map(|(i, intent)| target_name(parent, i, intent))
        .collect()
}

/// Turn the `spec.backupLocations` entries of `parent` into intents.
///
/// Fails on the first entry that sets both or neither of `velero` and
/// `bucket`, naming its index.
pub fn parse_intents(parent: &str, locations: &[BackupLocation]) -> Result<Vec<LocationIntent>, Error> {
    locations
        .iter()
        .enumerate()
        .map(|(i, location)| {
            LocationSource::from_parts(location.velero.clone(), location.bucket.clone())
                .map(|source| LocationIntent {
                    name: location.name.clone(),
                    source,
                })
                .map_err(|message| {
                    Error::validation_for_field(
                        parent,
                        format!("spec.backupLocations[{}]", i),
                        format!("backup location {}: {}", i, message),
                    )
                })
        })
        .collect()
}

fn prefix(intent: &LocationIntent) -> Option<&str> {
    match &intent.source {
        LocationSource::Inline(spec) => spec.object_storage.prefix.as_deref(),
        LocationSource::Bucket(bucket) => bucket.prefix.as_deref(),
    }
}

/// Validate the intent list of `parent` (a `namespace/name` string).
///
/// Fails on the first blank name, repeated target name, or, when
/// `backup_images` is set, missing prefix.
pub fn validate_intents(
    parent: &str,
    parent_name: &str,
    intents: &[LocationIntent],
    backup_images: bool,
) -> Result<(), Error> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (i, intent) in intents.iter().enumerate() {
        if let Some(name) = &intent.name {
            if name.trim().is_empty() {
                return Err(Error::validation_for_field(
                    parent,
                    format!("spec.backupLocations[{}].name", i),
                    "name must not be empty or whitespace",
                ));
            }
        }

        let name = target_name(parent_name, i, intent);
        if let Some(first) = seen.insert(name.clone(), i) {
            return Err(Error::validation_for_field(
                parent,
                format!("spec.backupLocations[{}].name", i),
                format!(
                    "location name {:?} is already used by backupLocations[{}]",
                    name, first
                ),
            ));
        }

        if backup_images && prefix(intent).map_or(true, |p| p.trim().is_empty()) {
            return Err(Error::validation_for_field(
                parent,
                format!("spec.backupLocations[{}].prefix", i),
                "a prefix is required when image backup is enabled",
            ));
        }
    }
    Ok(())
}
