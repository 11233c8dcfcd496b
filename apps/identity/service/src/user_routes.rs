use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::api_envelope::{bad_request_error, created_data, forbidden_error, ok_data};
use crate::config::InfoField;
use crate::credentials::Principal;
use crate::labeled::{Addresses, Banks, CollectionKind, Emails, Phones, validate_entry};
use crate::organization_routes::invitation_error_response;
use crate::profile::ProfileError;
use crate::profile_routes::profile_error_response;
use crate::record_store::{Address, Phonenumber, UserRecord};

/// Scalar profile fields. `username` and `id` must name the stored record.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserBody {
    pub username: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub facebook: Option<String>,
    #[serde(default)]
    pub github: Option<String>,
    #[serde(default)]
    pub public_keys: Vec<String>,
}

/// Filtered view of the contact collections.
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<BTreeMap<String, Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<BTreeMap<String, Phonenumber>>,
}

/// Checks a registration payload: one seed email, at most one bank account,
/// and every supplied entry valid for its kind.
pub fn validate_new_user(record: &UserRecord) -> Result<(), ProfileError> {
    if record.username.trim().is_empty() || record.username.contains('/') {
        return Err(ProfileError::invalid("username", "A valid username is required."));
    }
    if record.email.len() != 1 {
        return Err(ProfileError::invalid(
            "email",
            "Exactly one seed email address is required.",
        ));
    }
    if record.bank.len() > 1 {
        return Err(ProfileError::invalid(
            "bank",
            "At most one bank account can be registered at once.",
        ));
    }
    validate_all::<Emails>(record)?;
    validate_all::<Phones>(record)?;
    validate_all::<Addresses>(record)?;
    validate_all::<Banks>(record)
}

fn validate_all<K: CollectionKind>(record: &UserRecord) -> Result<(), ProfileError> {
    K::entries(record)
        .iter()
        .try_for_each(|(label, value)| validate_entry::<K>(label, value))
}

pub fn project_info(record: UserRecord, principal: &Principal, state: &AppState) -> UserInfo {
    let visible = state
        .config
        .info_projection
        .visible_fields(&principal.scopes);
    UserInfo {
        username: record.username,
        address: visible
            .contains(&InfoField::Addresses)
            .then_some(record.address),
        email: visible.contains(&InfoField::Emails).then_some(record.email),
        phone: visible.contains(&InfoField::Phones).then_some(record.phone),
    }
}

pub async fn create_user(State(state): State<AppState>, body: Bytes) -> Response {
    let mut record: UserRecord = match serde_json::from_slice(&body) {
        Ok(record) => record,
        Err(error) => {
            tracing::debug!(
                target: "identity.user_routes",
                error = %error,
                "invalid user payload",
            );
            return bad_request_error().into_response();
        }
    };
    if let Err(error) = validate_new_user(&record) {
        return profile_error_response(&record.username, error);
    }

    let username = record.username.clone();
    record.id = UserRecord::new_id();
    record.created_at = Some(Utc::now());
    record.updated_at = None;

    let _guard = state.records.lock(&username).await;
    match state.records.find(&username).await {
        Ok(Some(_)) => {
            return profile_error_response(
                &username,
                ProfileError::conflict(format!("user '{username}' already exists")),
            );
        }
        Ok(None) => {}
        Err(error) => return profile_error_response(&username, error),
    }
    if let Err(error) = state.records.save(&record).await {
        return profile_error_response(&username, error);
    }

    tracing::info!(
        target: "identity.user_routes",
        username = %username,
        user_id = %record.id,
        "user registered",
    );
    created_data(record).into_response()
}

pub async fn get_user(State(state): State<AppState>, Path(username): Path<String>) -> Response {
    match state.records.load(&username).await {
        Ok(record) => ok_data(record).into_response(),
        Err(error) => profile_error_response(&username, error),
    }
}

/// Replaces the scalar profile fields and echoes the payload. Labeled
/// collections are untouched.
pub async fn update_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    body: Bytes,
) -> Response {
    let body: UpdateUserBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(_) => return bad_request_error().into_response(),
    };

    let echo = body.clone();
    let outcome = state
        .records
        .mutate(&username, |record| {
            if body.username != record.username || body.id.as_deref() != Some(record.id.as_str()) {
                return Ok((false, false));
            }
            record.firstname = body.firstname.unwrap_or_default();
            record.lastname = body.lastname.unwrap_or_default();
            record.facebook = body.facebook;
            record.github = body.github;
            record.public_keys = body.public_keys;
            Ok((true, true))
        })
        .await;

    match outcome {
        Ok(true) => ok_data(echo).into_response(),
        Ok(false) => {
            tracing::info!(
                target: "identity.user_routes",
                username = %username,
                "refused username or id change",
            );
            forbidden_error("Changing username or id is forbidden.").into_response()
        }
        Err(error) => profile_error_response(&username, error),
    }
}

pub async fn user_info(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(username): Path<String>,
) -> Response {
    match state.records.load(&username).await {
        Ok(record) => ok_data(project_info(record, &principal, &state)).into_response(),
        Err(error) => profile_error_response(&username, error),
    }
}

pub async fn user_notifications(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Response {
    match state.notifications.for_user(&username).await {
        Ok(list) => ok_data(list).into_response(),
        Err(error) => invitation_error_response(&username, error),
    }
}
