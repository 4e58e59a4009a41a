//! AWS shared-credentials (ini) parsing
//!
//! A secret holds an ini document with one or more `[profile]` sections.
//! A profile authenticates either with static keys or with an STS web
//! identity (`role_arn` + `web_identity_token_file`).

use std::collections::BTreeMap;

use cairn_common::Error;

const PROVIDER: &str = "aws";

/// Profile used when the location config does not name one
pub const DEFAULT_PROFILE: &str = "default";

/// Parsed ini document: section name to key/value pairs
pub type IniDocument = BTreeMap<String, BTreeMap<String, String>>;

/// How an AWS profile authenticates
#[derive(Clone, PartialEq)]
pub enum AwsAuth {
    /// Long-lived access keys
    StaticKeys {
        /// aws_access_key_id
        access_key_id: String,
        /// aws_secret_access_key
        secret_access_key: String,
        /// aws_session_token, for temporary keys
        session_token: Option<String>,
    },
    /// STS AssumeRoleWithWebIdentity using a projected token file
    WebIdentity {
        /// role_arn
        role_arn: String,
        /// web_identity_token_file
        web_identity_token_file: String,
    },
}

impl std::fmt::Debug for AwsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaticKeys {
                access_key_id,
                session_token,
                ..
            } => f
                .debug_struct("StaticKeys")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .field("session_token", &session_token.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::WebIdentity {
                role_arn,
                web_identity_token_file,
            } => f
                .debug_struct("WebIdentity")
                .field("role_arn", role_arn)
                .field("web_identity_token_file", web_identity_token_file)
                .finish(),
        }
    }
}

/// A resolved AWS profile
#[derive(Clone, Debug, PartialEq)]
pub struct AwsCredential {
    /// Profile section the credential came from
    pub profile: String,
    /// Authentication method
    pub auth: AwsAuth,
    /// `region` from the profile, if present
    pub region: Option<String>,
}

impl AwsCredential {
    /// Whether this profile uses STS web identity
    pub fn is_web_identity(&self) -> bool {
        matches!(self.auth, AwsAuth::WebIdentity { .. })
    }
}

/// Parse an ini document.
///
/// Section headers may be `[name]` or `[profile name]`; both map to `name`.
/// Lines starting with `#` or `;` are comments.
pub fn parse_ini(text: &str) -> Result<IniDocument, Error> {
    let mut doc = IniDocument::new();
    let mut current: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| {
                Error::credential(PROVIDER, format!("line {}: unterminated section header", idx + 1))
            })?;
            let name = name.trim();
            let name = name.strip_prefix("profile ").map(str::trim).unwrap_or(name);
            if name.is_empty() {
                return Err(Error::credential(
                    PROVIDER,
                    format!("line {}: empty section name", idx + 1),
                ));
            }
            doc.entry(name.to_string()).or_default();
            current = Some(name.to_string());
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::credential(PROVIDER, format!("line {}: expected key = value", idx + 1))
        })?;
        let section = current.as_ref().ok_or_else(|| {
            Error::credential(
                PROVIDER,
                format!("line {}: key {:?} outside of a profile section", idx + 1, key.trim()),
            )
        })?;
        doc.entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(doc)
}

/// Parse an AWS credential payload and select a profile
pub fn parse(data: &[u8], profile: Option<&str>) -> Result<AwsCredential, Error> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::credential(PROVIDER, "credentials file is not valid UTF-8"))?;
    if text.trim().is_empty() {
        return Err(Error::credential(PROVIDER, "credentials file is empty"));
    }
    let doc = parse_ini(text)?;
    let profile = profile.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PROFILE);
    let section = doc.get(profile).ok_or_else(|| {
        Error::credential(
            PROVIDER,
            format!("profile {:?} not found in credentials file", profile),
        )
    })?;

    let get = |key: &str| section.get(key).filter(|v| !v.is_empty()).cloned();

    let auth = match (
        get("aws_access_key_id"),
        get("aws_secret_access_key"),
        get("role_arn"),
        get("web_identity_token_file"),
    ) {
        (Some(access_key_id), Some(secret_access_key), _, _) => AwsAuth::StaticKeys {
            access_key_id,
            secret_access_key,
            session_token: get("aws_session_token"),
        },
        (_, _, Some(role_arn), Some(web_identity_token_file)) => AwsAuth::WebIdentity {
            role_arn,
            web_identity_token_file,
        },
        _ => {
            return Err(Error::credential(
                PROVIDER,
                format!(
                    "profile {:?} has no recognized credentials: expected aws_access_key_id \
                     and aws_secret_access_key, or role_arn and web_identity_token_file",
                    profile
                ),
            ))
        }
    };

    Ok(AwsCredential {
        profile: profile.to_string(),
        auth,
        region: get("region"),
    })
}
