//! Environment-provided GCP project hints
//!
//! Trait-based access to the process environment so project fallback can be
//! tested without touching global state.

/// Variables consulted, in order, for a GCP project id
pub const PROJECT_ENV_VARS: [&str; 3] = [
    "GOOGLE_CLOUD_PROJECT",
    "GCP_PROJECT_ID",
    "CLOUDSDK_CORE_PROJECT",
];

/// Trait for reading project hints from the environment
#[cfg_attr(test, mockall::automock)]
pub trait ProjectEnv: Send + Sync {
    /// Read a single variable
    fn var(&self, key: &str) -> Option<String>;
}

/// Default implementation that reads from environment variables
#[derive(Clone, Default)]
pub struct OsProjectEnv;

impl ProjectEnv for OsProjectEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// First non-empty project hint from the environment
pub fn project_from_env(env: &dyn ProjectEnv) -> Option<String> {
    PROJECT_ENV_VARS
        .iter()
        .filter_map(|key| env.var(key))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
