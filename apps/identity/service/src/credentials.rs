use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated caller attached to a request once the scope gate admits it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub client_id: Option<String>,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing authorization header")]
    MissingAuthorization,
    #[error("invalid authorization scheme")]
    InvalidAuthorizationScheme,
    #[error("invalid access token")]
    InvalidToken,
    #[error("access token expired")]
    TokenExpired,
    #[error("access token revoked")]
    TokenRevoked,
    #[error("credential validator unavailable: {message}")]
    Unavailable { message: String },
}

impl CredentialError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAuthorization => "missing_authorization",
            Self::InvalidAuthorizationScheme => "invalid_authorization_scheme",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::Unavailable { .. } => "validator_unavailable",
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        !matches!(self, Self::Unavailable { .. })
    }
}

pub fn extract_bearer_token(header_value: Option<&str>) -> Result<&str, CredentialError> {
    let raw = header_value.ok_or(CredentialError::MissingAuthorization)?;
    let trimmed = raw.trim();
    let Some(token) = trimmed.strip_prefix("Bearer ") else {
        return Err(CredentialError::InvalidAuthorizationScheme);
    };
    let token = token.trim();
    if token.is_empty() {
        return Err(CredentialError::InvalidAuthorizationScheme);
    }
    Ok(token)
}

/// Resolves a bearer token into the principal it was issued to.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Principal, CredentialError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub token: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialTableError {
    #[error("failed to read credential table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse credential table {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("duplicate token for subject {subject}")]
    DuplicateToken { subject: String },
}

/// Token table issued out of band, keyed by the opaque token value.
#[derive(Clone, Default)]
pub struct StaticTokenValidator {
    credentials: Arc<HashMap<String, IssuedCredential>>,
}

impl StaticTokenValidator {
    pub fn new(credentials: Vec<IssuedCredential>) -> Result<Self, CredentialTableError> {
        let mut table = HashMap::with_capacity(credentials.len());
        for credential in credentials {
            let subject = credential.subject.clone();
            if table.insert(credential.token.clone(), credential).is_some() {
                return Err(CredentialTableError::DuplicateToken { subject });
            }
        }
        Ok(Self {
            credentials: Arc::new(table),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, CredentialTableError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialTableError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let credentials: Vec<IssuedCredential> =
            serde_json::from_str(&raw).map_err(|source| CredentialTableError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let validator = Self::new(credentials)?;
        tracing::info!(
            target: "identity.credentials",
            path = %path.display(),
            count = validator.credentials.len(),
            "loaded credential table",
        );
        Ok(validator)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<Principal, CredentialError> {
        let credential = self
            .credentials
            .get(token)
            .ok_or(CredentialError::InvalidToken)?;

        if credential.revoked {
            return Err(CredentialError::TokenRevoked);
        }
        if credential
            .expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now())
        {
            return Err(CredentialError::TokenExpired);
        }

        Ok(Principal {
            subject: credential.subject.clone(),
            client_id: credential.client_id.clone(),
            scopes: credential.scopes.iter().cloned().collect(),
        })
    }
}
