//! Per-(route, verb) scope authorization.
//!
//! The table is loaded once at startup and handed to [`ScopeGate::new`]. The
//! gate is attached with `route_layer`, so it sees the matched route template
//! and runs before any handler. A request is admitted only when its bearer
//! credential validates and carries every scope listed for the pair; routes
//! with no entry are refused.
//!
//! Requirements on templates with a `:username` segment are owner-bound: the
//! credential subject must equal that path segment. A table file can opt a
//! route out with `owner_bound = false`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{MatchedPath, RawPathParams, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api_envelope::{ApiErrorCode, status_error, unauthorized_error};
use crate::credentials::{CredentialError, CredentialValidator, Principal, extract_bearer_token};
use crate::routes::{
    ROUTE_ADDRESS, ROUTE_ADDRESSES, ROUTE_BANK, ROUTE_BANKS, ROUTE_EMAIL, ROUTE_EMAILS,
    ROUTE_ORGANIZATION_ROLE, ROUTE_ORGANIZATIONS, ROUTE_PHONE, ROUTE_PHONES, ROUTE_USER,
    ROUTE_USER_INFO, ROUTE_USER_NOTIFICATIONS, ROUTE_USERS, normalize_template,
};

const SCOPE_ADMIN: &str = "user:admin";
const OWNER_PARAM: &str = "username";

/// Scopes a caller must hold, all of them, for one route and verb.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeRequirement {
    scopes: Vec<String>,
    owner_bound: bool,
}

impl ScopeRequirement {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let scopes = scopes
            .into_iter()
            .map(Into::into)
            .map(|scope: String| scope.trim().to_string())
            .filter(|scope| !scope.is_empty() && seen.insert(scope.clone()))
            .collect();
        Self {
            scopes,
            owner_bound: false,
        }
    }

    #[must_use]
    pub fn with_owner_binding(mut self, owner_bound: bool) -> Self {
        self.owner_bound = owner_bound;
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Whether the caller must be the user named in the path.
    pub fn owner_bound(&self) -> bool {
        self.owner_bound
    }

    /// Required scopes the principal lacks, in table order.
    pub fn missing_from(&self, principal: &Principal) -> Vec<String> {
        self.scopes
            .iter()
            .filter(|scope| !principal.has_scope(scope))
            .cloned()
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScopeTableError {
    #[error("failed to read scope table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse scope table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid method '{method}' for route {path}")]
    InvalidMethod { method: String, path: String },
    #[error("duplicate scope table entry for {method} {path}")]
    Duplicate { method: Method, path: String },
}

#[derive(Debug, Deserialize)]
struct ScopeTableFile {
    #[serde(default)]
    route: Vec<ScopeTableEntry>,
}

#[derive(Debug, Deserialize)]
struct ScopeTableEntry {
    method: String,
    path: String,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    owner_bound: Option<bool>,
}

/// Static map of (verb, route template) to required scopes.
#[derive(Debug, Clone, Default)]
pub struct ScopeTable {
    requirements: HashMap<(Method, String), ScopeRequirement>,
}

impl ScopeTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        table.set(Method::POST, ROUTE_USERS, [SCOPE_ADMIN]);
        table.set(Method::GET, ROUTE_USER, [SCOPE_ADMIN]);
        table.set(Method::PUT, ROUTE_USER, [SCOPE_ADMIN]);
        // Any valid credential; the handler projects by scope.
        table.set(Method::GET, ROUTE_USER_INFO, [] as [&str; 0]);
        table.set(Method::GET, ROUTE_USER_NOTIFICATIONS, [SCOPE_ADMIN]);

        for (collection, item, read_scope) in [
            (ROUTE_EMAILS, ROUTE_EMAIL, "user:email"),
            (ROUTE_PHONES, ROUTE_PHONE, "user:phone"),
            (ROUTE_ADDRESSES, ROUTE_ADDRESS, "user:address"),
            (ROUTE_BANKS, ROUTE_BANK, "user:bank"),
        ] {
            table.set(Method::GET, collection, [read_scope]);
            table.set(Method::GET, item, [read_scope]);
            table.set(Method::POST, collection, [SCOPE_ADMIN]);
            table.set(Method::PUT, item, [SCOPE_ADMIN]);
            table.set(Method::DELETE, item, [SCOPE_ADMIN]);
        }

        table.set(Method::GET, ROUTE_ORGANIZATIONS, [SCOPE_ADMIN]);
        table.set(Method::POST, ROUTE_ORGANIZATION_ROLE, [SCOPE_ADMIN]);
        table.set(Method::DELETE, ROUTE_ORGANIZATION_ROLE, [SCOPE_ADMIN]);
        table
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ScopeTableError> {
        let file: ScopeTableFile = toml::from_str(raw)?;
        let mut table = Self::default();
        for entry in file.route {
            let method = Method::from_bytes(entry.method.trim().to_uppercase().as_bytes())
                .map_err(|_| ScopeTableError::InvalidMethod {
                    method: entry.method.clone(),
                    path: entry.path.clone(),
                })?;
            let path = normalize_template(entry.path.trim());
            if table.requirement(&method, &path).is_some() {
                return Err(ScopeTableError::Duplicate { method, path });
            }
            let owner_bound = entry
                .owner_bound
                .unwrap_or_else(|| has_owner_segment(&path));
            table.set_requirement(
                method,
                &path,
                ScopeRequirement::new(entry.scopes).with_owner_binding(owner_bound),
            );
        }
        Ok(table)
    }

    pub fn from_path(path: &Path) -> Result<Self, ScopeTableError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScopeTableError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_toml_str(&raw)?;
        tracing::info!(
            target: "identity.scope_gate",
            path = %path.display(),
            routes = table.len(),
            "loaded scope table",
        );
        Ok(table)
    }

    /// Sets the scopes for a pair, owner-bound when the template names a user.
    pub fn set<I, S>(&mut self, method: Method, path: &str, scopes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requirement = ScopeRequirement::new(scopes).with_owner_binding(has_owner_segment(path));
        self.set_requirement(method, path, requirement);
    }

    pub fn set_requirement(&mut self, method: Method, path: &str, requirement: ScopeRequirement) {
        self.requirements
            .insert((method, path.to_string()), requirement);
    }

    pub fn requirement(&self, method: &Method, path: &str) -> Option<&ScopeRequirement> {
        self.requirements.get(&(method.clone(), path.to_string()))
    }

    /// True when some verb is configured for `path`.
    pub fn lists_route(&self, path: &str) -> bool {
        self.requirements
            .keys()
            .any(|(_, listed)| listed.as_str() == path)
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

fn has_owner_segment(path: &str) -> bool {
    path.split('/')
        .any(|segment| segment.strip_prefix(':') == Some(OWNER_PARAM))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    Unauthenticated(CredentialError),
    MissingScopes(Vec<String>),
    NotOwner,
    UnconfiguredRoute,
    MethodNotListed,
    ValidatorUnavailable,
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated(_) => unauthorized_error().into_response(),
            Self::MissingScopes(_) | Self::NotOwner | Self::UnconfiguredRoute => {
                status_error(ApiErrorCode::Forbidden).into_response()
            }
            Self::MethodNotListed => status_error(ApiErrorCode::MethodNotAllowed).into_response(),
            Self::ValidatorUnavailable => {
                status_error(ApiErrorCode::ServiceUnavailable).into_response()
            }
        }
    }
}

#[derive(Clone)]
pub struct ScopeGate {
    table: Arc<ScopeTable>,
    validator: Arc<dyn CredentialValidator>,
    validation_timeout: Duration,
}

impl ScopeGate {
    pub fn new(
        table: ScopeTable,
        validator: Arc<dyn CredentialValidator>,
        validation_timeout: Duration,
    ) -> Self {
        Self {
            table: Arc::new(table),
            validator,
            validation_timeout,
        }
    }

    /// Admits a request or says why not.
    ///
    /// Checks run in order: verb listed for the route (405), credential
    /// present and valid (401, or 503 when the validator is unavailable),
    /// route configured (403), scopes held (403), caller owns the path (403).
    pub async fn authorize(
        &self,
        method: &Method,
        route: Option<&str>,
        owner: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<Principal, GateRejection> {
        let Some(route) = route else {
            return Err(GateRejection::UnconfiguredRoute);
        };
        let requirement = self.table.requirement(method, route);
        if requirement.is_none() && self.table.lists_route(route) {
            return Err(GateRejection::MethodNotListed);
        }

        let header = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = extract_bearer_token(header).map_err(GateRejection::Unauthenticated)?;

        let principal =
            match tokio::time::timeout(self.validation_timeout, self.validator.validate(token))
                .await
            {
                Ok(Ok(principal)) => principal,
                Ok(Err(error)) if error.is_unauthorized() => {
                    tracing::info!(
                        target: "identity.scope_gate",
                        method = %method,
                        route,
                        reason = error.code(),
                        "credential rejected",
                    );
                    return Err(GateRejection::Unauthenticated(error));
                }
                Ok(Err(error)) => {
                    tracing::error!(
                        target: "identity.scope_gate",
                        method = %method,
                        route,
                        error = %error,
                        "credential validator failed",
                    );
                    return Err(GateRejection::ValidatorUnavailable);
                }
                Err(_) => {
                    tracing::error!(
                        target: "identity.scope_gate",
                        method = %method,
                        route,
                        budget_ms = u64::try_from(self.validation_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                        "credential validation timed out",
                    );
                    return Err(GateRejection::ValidatorUnavailable);
                }
            };

        let Some(requirement) = requirement else {
            tracing::warn!(
                target: "identity.scope_gate",
                method = %method,
                route,
                "no scope requirement configured; refusing request",
            );
            return Err(GateRejection::UnconfiguredRoute);
        };

        let missing = requirement.missing_from(&principal);
        if !missing.is_empty() {
            tracing::info!(
                target: "identity.scope_gate",
                method = %method,
                route,
                subject = %principal.subject,
                missing = ?missing,
                "insufficient scope",
            );
            return Err(GateRejection::MissingScopes(missing));
        }

        if requirement.owner_bound() && owner != Some(principal.subject.as_str()) {
            tracing::info!(
                target: "identity.scope_gate",
                method = %method,
                route,
                subject = %principal.subject,
                owner = owner.unwrap_or_default(),
                "caller does not own the addressed user",
            );
            return Err(GateRejection::NotOwner);
        }

        tracing::debug!(
            target: "identity.scope_gate",
            method = %method,
            route,
            subject = %principal.subject,
            "request authorized",
        );
        Ok(principal)
    }
}

pub async fn scope_gate(
    State(gate): State<ScopeGate>,
    params: Option<RawPathParams>,
    mut request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string());
    let owner = params.and_then(|params| {
        params
            .iter()
            .find(|(name, _)| *name == OWNER_PARAM)
            .map(|(_, value)| value.to_string())
    });

    match gate
        .authorize(
            request.method(),
            route.as_deref(),
            owner.as_deref(),
            request.headers(),
        )
        .await
    {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::{get, post};
    use axum::extract::Path;
    use axum::{Extension, Router, middleware};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::credentials::{IssuedCredential, StaticTokenValidator};

    fn issued(token: &str, scopes: &[&str]) -> IssuedCredential {
        IssuedCredential {
            token: token.to_string(),
            subject: "alice".to_string(),
            client_id: None,
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
            expires_at: None,
            revoked: false,
        }
    }

    fn validator() -> Arc<dyn CredentialValidator> {
        Arc::new(
            StaticTokenValidator::new(vec![
                issued("tok_admin", &["user:admin"]),
                issued("tok_email", &["user:email"]),
                issued("tok_both", &["user:admin", "user:email"]),
            ])
            .expect("validator"),
        )
    }

    struct StalledValidator;

    #[async_trait]
    impl CredentialValidator for StalledValidator {
        async fn validate(&self, _token: &str) -> Result<Principal, CredentialError> {
            std::future::pending().await
        }
    }

    /// Router with a handler that counts invocations.
    fn instrumented_router(gate: ScopeGate, calls: Arc<AtomicUsize>) -> Router {
        let post_calls = calls.clone();
        Router::new()
            .route(
                "/items/:label",
                get(move |Extension(principal): Extension<Principal>| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        principal.subject
                    }
                })
                .post(move || {
                    let calls = post_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        StatusCode::CREATED
                    }
                }),
            )
            .route(
                "/users/:username",
                get(|Path(username): Path<String>| async move { username }),
            )
            .route("/unlisted", post(|| async { StatusCode::OK }))
            .route_layer(middleware::from_fn_with_state(gate, scope_gate))
    }

    fn gate_with(validator: Arc<dyn CredentialValidator>) -> ScopeGate {
        let mut table = ScopeTable::default();
        table.set(Method::GET, "/items/:label", ["user:email"]);
        table.set(Method::POST, "/items/:label", ["user:admin", "user:email"]);
        table.set(Method::GET, "/users/:username", ["user:email"]);
        ScopeGate::new(table, validator, Duration::from_millis(50))
    }

    async fn send(
        router: Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = router
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn missing_or_invalid_credential_is_unauthorized_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(validator()), calls.clone());

        let (status, body) = send(router.clone(), Method::GET, "/items/home", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");

        let (status, _) = send(router, Method::GET, "/items/home", Some("tok_unknown")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn insufficient_scope_is_forbidden_and_handler_is_not_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(validator()), calls.clone());

        let (status, body) = send(router, Method::GET, "/items/home", Some("tok_admin")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn requirements_are_conjunctive_and_per_verb() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(validator()), calls.clone());

        let (status, _) = send(router.clone(), Method::GET, "/items/home", Some("tok_email")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) =
            send(router.clone(), Method::POST, "/items/home", Some("tok_email")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) =
            send(router.clone(), Method::POST, "/items/home", Some("tok_admin")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (status, _) = send(router, Method::POST, "/items/home", Some("tok_both")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn admitted_request_carries_principal_to_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(validator()), calls);
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/items/home")
                    .header(AUTHORIZATION, "Bearer tok_email")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        assert_eq!(&bytes[..], b"alice");
    }

    #[tokio::test]
    async fn route_without_table_entry_fails_closed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(validator()), calls);
        let (status, _) = send(router.clone(), Method::POST, "/unlisted", Some("tok_both")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(router, Method::POST, "/unlisted", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn verb_missing_from_listed_route_is_method_not_allowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(validator()), calls.clone());
        let (status, body) = send(router, Method::DELETE, "/items/home", Some("tok_both")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"]["code"], "method_not_allowed");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn user_routes_admit_only_the_addressed_owner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(validator()), calls);

        let (status, _) =
            send(router.clone(), Method::GET, "/users/alice", Some("tok_email")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(router, Method::GET, "/users/bob", Some("tok_both")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");
    }

    #[test]
    fn owner_binding_follows_template_unless_table_opts_out() {
        let table = ScopeTable::builtin();
        for (method, route) in [
            (Method::GET, ROUTE_USER),
            (Method::POST, ROUTE_EMAILS),
            (Method::DELETE, ROUTE_BANK),
            (Method::GET, ROUTE_USER_INFO),
        ] {
            let requirement = table.requirement(&method, route).expect("listed");
            assert!(requirement.owner_bound(), "{method} {route}");
        }
        assert!(
            !table
                .requirement(&Method::POST, ROUTE_USERS)
                .expect("registration")
                .owner_bound()
        );

        let table = ScopeTable::from_toml_str(
            r#"
            [[route]]
            method = "GET"
            path = "/users/{username}"
            scopes = ["user:admin"]
            owner_bound = false

            [[route]]
            method = "PUT"
            path = "/users/{username}"
            scopes = ["user:admin"]
            "#,
        )
        .expect("table");
        assert!(!table.requirement(&Method::GET, ROUTE_USER).expect("get").owner_bound());
        assert!(table.requirement(&Method::PUT, ROUTE_USER).expect("put").owner_bound());
    }

    #[tokio::test]
    async fn stalled_validator_yields_service_unavailable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = instrumented_router(gate_with(Arc::new(StalledValidator)), calls.clone());
        let (status, body) = send(router, Method::GET, "/items/home", Some("tok_email")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "service_unavailable");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn requirement_trims_and_deduplicates_preserving_order() {
        let requirement = ScopeRequirement::new(["user:admin", " user:email ", "user:admin", ""]);
        assert_eq!(requirement.scopes(), ["user:admin", "user:email"]);
    }

    #[test]
    fn toml_table_normalizes_templates_and_methods() {
        let table = ScopeTable::from_toml_str(
            r#"
            [[route]]
            method = "post"
            path = "/users/{username}/organizations/{globalid}/roles/{role}"
            scopes = ["user:admin"]

            [[route]]
            method = "DELETE"
            path = "/users/{username}/organizations/{globalid}/roles/{role}"
            scopes = ["user:admin"]
            "#,
        )
        .expect("table");
        assert_eq!(table.len(), 2);
        let requirement = table
            .requirement(&Method::POST, ROUTE_ORGANIZATION_ROLE)
            .expect("post entry");
        assert_eq!(requirement.scopes(), ["user:admin"]);
    }

    #[test]
    fn toml_table_rejects_duplicates() {
        let error = ScopeTable::from_toml_str(
            r#"
            [[route]]
            method = "GET"
            path = "/users/{username}"
            scopes = ["user:admin"]

            [[route]]
            method = "GET"
            path = "/users/:username"
            scopes = ["user:email"]
            "#,
        )
        .expect_err("duplicate");
        assert!(matches!(error, ScopeTableError::Duplicate { .. }));
    }

    #[test]
    fn builtin_table_covers_role_grant_verbs_independently() {
        let table = ScopeTable::builtin();
        assert!(table.requirement(&Method::POST, ROUTE_ORGANIZATION_ROLE).is_some());
        assert!(table.requirement(&Method::DELETE, ROUTE_ORGANIZATION_ROLE).is_some());
        assert!(table.requirement(&Method::PUT, ROUTE_ORGANIZATION_ROLE).is_none());
        assert_eq!(
            table
                .requirement(&Method::GET, ROUTE_EMAILS)
                .expect("emails")
                .scopes(),
            ["user:email"]
        );
    }
}
