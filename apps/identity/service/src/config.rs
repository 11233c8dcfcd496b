use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_JSON: bool = false;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CREDENTIAL_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_INFO_SCOPE_FIELDS: &str =
    "user:admin=*,user:address=addresses,user:email=emails,user:phone=phones";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_json: bool,
    pub record_store_path: Option<PathBuf>,
    pub invitation_store_path: Option<PathBuf>,
    pub credentials_path: Option<PathBuf>,
    pub scope_table_path: Option<PathBuf>,
    pub store_timeout_ms: u64,
    pub credential_timeout_ms: u64,
    pub info_projection: InfoProjectionPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid IDS_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid {name} value '{value}': expected a positive integer")]
    InvalidTimeout { name: &'static str, value: String },
    #[error("invalid IDS_INFO_SCOPE_FIELDS entry '{entry}': {reason}")]
    InvalidInfoScopeFields { entry: String, reason: &'static str },
}

/// Profile sections that `/users/{username}/info` may reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfoField {
    Addresses,
    Emails,
    Phones,
}

impl InfoField {
    pub const ALL: [Self; 3] = [Self::Addresses, Self::Emails, Self::Phones];

    fn parse(value: &str) -> Option<Self> {
        match value {
            "addresses" => Some(Self::Addresses),
            "emails" => Some(Self::Emails),
            "phones" => Some(Self::Phones),
            _ => None,
        }
    }
}

/// Which info sections each scope unlocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoProjectionPolicy {
    fields_by_scope: BTreeMap<String, BTreeSet<InfoField>>,
}

impl InfoProjectionPolicy {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut fields_by_scope: BTreeMap<String, BTreeSet<InfoField>> = BTreeMap::new();
        for entry in parse_csv(raw.to_string()) {
            let Some((scope, field)) = entry.split_once('=') else {
                return Err(ConfigError::InvalidInfoScopeFields {
                    entry,
                    reason: "expected scope=field",
                });
            };
            let scope = scope.trim();
            let field = field.trim();
            if scope.is_empty() {
                return Err(ConfigError::InvalidInfoScopeFields {
                    entry,
                    reason: "scope is empty",
                });
            }
            let fields = fields_by_scope.entry(scope.to_string()).or_default();
            if field == "*" {
                fields.extend(InfoField::ALL);
                continue;
            }
            let Some(field) = InfoField::parse(field) else {
                return Err(ConfigError::InvalidInfoScopeFields {
                    entry,
                    reason: "field must be one of addresses, emails, phones or *",
                });
            };
            fields.insert(field);
        }
        Ok(Self { fields_by_scope })
    }

    pub fn visible_fields<'a>(
        &self,
        scopes: impl IntoIterator<Item = &'a String>,
    ) -> BTreeSet<InfoField> {
        scopes
            .into_iter()
            .filter_map(|scope| self.fields_by_scope.get(scope))
            .flatten()
            .copied()
            .collect()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("IDS_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter = env::var("IDS_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_json = env::var("IDS_LOG_JSON")
            .ok()
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(DEFAULT_LOG_JSON);

        let record_store_path = optional_path("IDS_RECORD_STORE_PATH");
        let invitation_store_path = optional_path("IDS_INVITATION_STORE_PATH");
        let credentials_path = optional_path("IDS_CREDENTIALS_PATH");
        let scope_table_path = optional_path("IDS_SCOPE_TABLE_PATH");

        let store_timeout_ms = timeout_ms("IDS_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;
        let credential_timeout_ms =
            timeout_ms("IDS_CREDENTIAL_TIMEOUT_MS", DEFAULT_CREDENTIAL_TIMEOUT_MS)?;

        let info_projection = InfoProjectionPolicy::parse(
            &env::var("IDS_INFO_SCOPE_FIELDS")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_INFO_SCOPE_FIELDS.to_string()),
        )?;

        Ok(Self {
            bind_addr,
            log_filter,
            log_json,
            record_store_path,
            invitation_store_path,
            credentials_path,
            scope_table_path,
            store_timeout_ms,
            credential_timeout_ms,
            info_projection,
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_json: false,
            record_store_path: None,
            invitation_store_path: None,
            credentials_path: None,
            scope_table_path: None,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            credential_timeout_ms: DEFAULT_CREDENTIAL_TIMEOUT_MS,
            info_projection: InfoProjectionPolicy::parse(DEFAULT_INFO_SCOPE_FIELDS)
                .unwrap_or_default(),
        }
    }
}

fn optional_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn timeout_ms(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = env::var(name).ok().filter(|value| !value.trim().is_empty()) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidTimeout { name, value: raw }),
    }
}

fn parse_csv(value: String) -> Vec<String> {
    value
        .split(',')
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_is_in_memory_with_default_policy() {
        let config = Config::for_tests();
        assert_eq!(config.bind_addr.port(), 0);
        assert!(config.record_store_path.is_none());
        assert_eq!(config.store_timeout(), Duration::from_millis(2_000));

        let admin = vec!["user:admin".to_string()];
        assert_eq!(
            config.info_projection.visible_fields(&admin).len(),
            InfoField::ALL.len()
        );
    }

    #[test]
    fn info_policy_unions_fields_across_scopes() {
        let policy =
            InfoProjectionPolicy::parse("user:email=emails, user:phone=phones").expect("policy");
        let scopes = vec!["user:email".to_string(), "user:phone".to_string()];
        let visible = policy.visible_fields(&scopes);
        assert!(visible.contains(&InfoField::Emails));
        assert!(visible.contains(&InfoField::Phones));
        assert!(!visible.contains(&InfoField::Addresses));

        let none = vec!["user:bank".to_string()];
        assert!(policy.visible_fields(&none).is_empty());
    }

    #[test]
    fn info_policy_rejects_unknown_fields_and_bare_entries() {
        assert!(matches!(
            InfoProjectionPolicy::parse("user:email=banks"),
            Err(ConfigError::InvalidInfoScopeFields { .. })
        ));
        assert!(matches!(
            InfoProjectionPolicy::parse("user:email"),
            Err(ConfigError::InvalidInfoScopeFields { .. })
        ));
    }
}
