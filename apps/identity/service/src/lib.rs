use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod api_envelope;
pub mod config;
pub mod credentials;
pub mod invitations;
pub mod json_file;
pub mod labeled;
pub mod notifications;
pub mod organization_routes;
pub mod profile;
pub mod profile_routes;
pub mod record_store;
pub mod routes;
pub mod scope_gate;
pub mod user_locks;
pub mod user_routes;
pub mod validation;


use crate::config::Config;
use crate::credentials::{CredentialTableError, CredentialValidator, StaticTokenValidator};
use crate::invitations::InvitationStore;
use crate::labeled::{Addresses, Banks, Emails, LabeledCollectionManager, Phones};
use crate::notifications::NotificationAggregator;
use crate::organization_routes::{accept_membership, list_organizations, reject_membership};
use crate::profile::RecordAccess;
use crate::profile_routes::{create_entry, delete_entry, get_entry, list_entries, update_entry};
use crate::record_store::{FileRecordStore, RecordStore};
use crate::routes::{
    ROUTE_ADDRESS, ROUTE_ADDRESSES, ROUTE_BANK, ROUTE_BANKS, ROUTE_EMAIL, ROUTE_EMAILS,
    ROUTE_HEALTHZ, ROUTE_ORGANIZATION_ROLE, ROUTE_ORGANIZATIONS, ROUTE_PHONE, ROUTE_PHONES,
    ROUTE_READYZ, ROUTE_USER, ROUTE_USER_INFO, ROUTE_USER_NOTIFICATIONS, ROUTE_USERS,
};
use crate::scope_gate::{ScopeGate, ScopeTable, ScopeTableError, scope_gate};
use crate::user_locks::UserLocks;
use crate::user_routes::{create_user, get_user, update_user, user_info, user_notifications};

const SERVICE_NAME: &str = "identity-profile-service";
const READINESS_PROBE_USERNAME: &str = "__readiness_probe__";

#[derive(Clone)]
pub struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) records: RecordAccess,
    pub(crate) labeled: LabeledCollectionManager,
    pub(crate) invitations: InvitationStore,
    pub(crate) notifications: NotificationAggregator,
    pub(crate) started_at: SystemTime,
}

/// External collaborators the router is assembled from.
pub struct Collaborators {
    pub record_store: Arc<dyn RecordStore>,
    pub credential_validator: Arc<dyn CredentialValidator>,
    pub scope_table: ScopeTable,
    pub invitations: InvitationStore,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Credentials(#[from] CredentialTableError),
    #[error(transparent)]
    ScopeTable(#[from] ScopeTableError),
}

impl Collaborators {
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let credential_validator = match config.credentials_path.as_deref() {
            Some(path) => StaticTokenValidator::from_path(path)?,
            None => {
                tracing::warn!(
                    target: "identity.startup",
                    "IDS_CREDENTIALS_PATH unset; every gated request will be rejected",
                );
                StaticTokenValidator::default()
            }
        };
        let scope_table = match config.scope_table_path.as_deref() {
            Some(path) => ScopeTable::from_path(path)?,
            None => ScopeTable::builtin(),
        };

        Ok(Self {
            record_store: Arc::new(FileRecordStore::from_config(config)),
            credential_validator: Arc::new(credential_validator),
            scope_table,
            invitations: InvitationStore::from_config(config),
        })
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    record_store: &'static str,
}

pub fn build_router(config: Config) -> Result<Router, StartupError> {
    let collaborators = Collaborators::from_config(&config)?;
    Ok(build_router_with(config, collaborators))
}

pub fn build_router_with(config: Config, collaborators: Collaborators) -> Router {
    let records = RecordAccess::new(
        collaborators.record_store,
        UserLocks::default(),
        config.store_timeout(),
    );
    let gate = ScopeGate::new(
        collaborators.scope_table,
        collaborators.credential_validator,
        config.credential_timeout(),
    );
    let state = AppState {
        config: Arc::new(config),
        labeled: LabeledCollectionManager::new(records.clone()),
        records,
        notifications: NotificationAggregator::new(Arc::new(collaborators.invitations.clone())),
        invitations: collaborators.invitations,
        started_at: SystemTime::now(),
    };

    let gated_router = Router::new()
        .route(ROUTE_USERS, post(create_user))
        .route(ROUTE_USER, get(get_user).put(update_user))
        .route(ROUTE_USER_INFO, get(user_info))
        .route(ROUTE_USER_NOTIFICATIONS, get(user_notifications))
        .route(
            ROUTE_EMAILS,
            get(list_entries::<Emails>).post(create_entry::<Emails>),
        )
        .route(
            ROUTE_EMAIL,
            get(get_entry::<Emails>)
                .put(update_entry::<Emails>)
                .delete(delete_entry::<Emails>),
        )
        .route(
            ROUTE_PHONES,
            get(list_entries::<Phones>).post(create_entry::<Phones>),
        )
        .route(
            ROUTE_PHONE,
            get(get_entry::<Phones>)
                .put(update_entry::<Phones>)
                .delete(delete_entry::<Phones>),
        )
        .route(
            ROUTE_ADDRESSES,
            get(list_entries::<Addresses>).post(create_entry::<Addresses>),
        )
        .route(
            ROUTE_ADDRESS,
            get(get_entry::<Addresses>)
                .put(update_entry::<Addresses>)
                .delete(delete_entry::<Addresses>),
        )
        .route(
            ROUTE_BANKS,
            get(list_entries::<Banks>).post(create_entry::<Banks>),
        )
        .route(
            ROUTE_BANK,
            get(get_entry::<Banks>)
                .put(update_entry::<Banks>)
                .delete(delete_entry::<Banks>),
        )
        .route(ROUTE_ORGANIZATIONS, get(list_organizations))
        .route(
            ROUTE_ORGANIZATION_ROLE,
            post(accept_membership).delete(reject_membership),
        )
        .route_layer(middleware::from_fn_with_state(gate, scope_gate));

    Router::new()
        .route(ROUTE_HEALTHZ, get(health))
        .route(ROUTE_READYZ, get(readiness))
        .merge(gated_router)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

pub fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr;
    let router = build_router(config)?;
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(
        target: "identity.startup",
        service = SERVICE_NAME,
        bind_addr = %bind_addr,
        "identity profile service listening",
    );
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

/// Ready once the record store answers a lookup within its deadline.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.records.find(READINESS_PROBE_USERNAME).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                record_store: "ok",
            }),
        ),
        Err(error) => {
            tracing::warn!(
                target: "identity.startup",
                error = %error,
                "readiness probe failed",
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    record_store: "unavailable",
                }),
            )
        }
    }
}
