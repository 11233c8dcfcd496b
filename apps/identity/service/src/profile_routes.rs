use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::api_envelope::{
    bad_request_error, conflict_error, created_data, internal_error, not_found_error, ok_data,
    unavailable_error, validation_error,
};
use crate::labeled::{Addresses, Banks, CollectionKind, Emails, Phones};
use crate::profile::ProfileError;
use crate::record_store::{Address, BankAccount, Phonenumber, StoreError};

/// Request and response encoding of one labeled collection kind.
pub trait WirePayload: CollectionKind {
    type Body: DeserializeOwned + Serialize + Send;

    fn into_entry(body: Self::Body) -> Result<(String, Self::Value), &'static str>;

    fn from_entry(label: String, value: Self::Value) -> Self::Body;
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmailBody {
    #[serde(alias = "Label")]
    pub label: String,
    #[serde(alias = "Emailaddress", alias = "EmailAddress", alias = "email")]
    pub emailaddress: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PhoneBody {
    #[serde(alias = "Label")]
    pub label: String,
    #[serde(alias = "Phonenumber", alias = "PhoneNumber")]
    pub phonenumber: Phonenumber,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AddressBody {
    #[serde(alias = "Label")]
    pub label: String,
    #[serde(alias = "Address")]
    pub address: Address,
}

impl WirePayload for Emails {
    type Body = EmailBody;

    fn into_entry(body: EmailBody) -> Result<(String, String), &'static str> {
        Ok((body.label, body.emailaddress))
    }

    fn from_entry(label: String, emailaddress: String) -> EmailBody {
        EmailBody {
            label,
            emailaddress,
        }
    }
}

impl WirePayload for Phones {
    type Body = PhoneBody;

    fn into_entry(body: PhoneBody) -> Result<(String, Phonenumber), &'static str> {
        Ok((body.label, body.phonenumber))
    }

    fn from_entry(label: String, phonenumber: Phonenumber) -> PhoneBody {
        PhoneBody { label, phonenumber }
    }
}

impl WirePayload for Addresses {
    type Body = AddressBody;

    fn into_entry(body: AddressBody) -> Result<(String, Address), &'static str> {
        Ok((body.label, body.address))
    }

    fn from_entry(label: String, address: Address) -> AddressBody {
        AddressBody { label, address }
    }
}

/// Bank payloads are a `{label: account}` map carrying exactly one entry.
impl WirePayload for Banks {
    type Body = BTreeMap<String, BankAccount>;

    fn into_entry(body: Self::Body) -> Result<(String, BankAccount), &'static str> {
        if body.len() != 1 {
            return Err("exactly one bank account is accepted per request");
        }
        body.into_iter()
            .next()
            .ok_or("exactly one bank account is accepted per request")
    }

    fn from_entry(label: String, account: BankAccount) -> Self::Body {
        BTreeMap::from([(label, account)])
    }
}

fn decode_body<K: WirePayload>(body: &Bytes) -> Result<(String, K::Value), Response> {
    let decoded: K::Body = serde_json::from_slice(body).map_err(|error| {
        tracing::debug!(
            target: "identity.profile_routes",
            kind = K::NAME,
            error = %error,
            "failed to decode request body",
        );
        bad_request_error().into_response()
    })?;
    K::into_entry(decoded).map_err(|message| validation_error("body", message).into_response())
}

pub async fn create_entry<K: WirePayload>(
    State(state): State<AppState>,
    Path(username): Path<String>,
    body: Bytes,
) -> Response {
    let (label, value) = match decode_body::<K>(&body) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    match state
        .labeled
        .create::<K>(&username, &label, value)
        .await
    {
        Ok(value) => created_data(K::from_entry(label, value)).into_response(),
        Err(error) => profile_error_response(&username, error),
    }
}

pub async fn list_entries<K: WirePayload>(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Response
where
    K::Value: Serialize,
{
    match state.labeled.list::<K>(&username).await {
        Ok(entries) => ok_data(entries).into_response(),
        Err(error) => profile_error_response(&username, error),
    }
}

pub async fn get_entry<K: WirePayload>(
    State(state): State<AppState>,
    Path((username, label)): Path<(String, String)>,
) -> Response
where
    K::Value: Serialize,
{
    match state.labeled.get::<K>(&username, &label).await {
        Ok(value) => ok_data(BTreeMap::from([(label, value)])).into_response(),
        Err(error) => profile_error_response(&username, error),
    }
}

pub async fn update_entry<K: WirePayload>(
    State(state): State<AppState>,
    Path((username, old_label)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let (new_label, value) = match decode_body::<K>(&body) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    match state
        .labeled
        .rename::<K>(&username, &old_label, &new_label, value)
        .await
    {
        Ok(value) => created_data(K::from_entry(new_label, value)).into_response(),
        Err(error) => profile_error_response(&username, error),
    }
}

pub async fn delete_entry<K: WirePayload>(
    State(state): State<AppState>,
    Path((username, label)): Path<(String, String)>,
) -> Response {
    match state.labeled.delete::<K>(&username, &label).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => profile_error_response(&username, error),
    }
}

/// Maps a profile outcome to its status; store detail is logged, never returned.
pub fn profile_error_response(username: &str, error: ProfileError) -> Response {
    match error {
        ProfileError::Invalid { field, message } => {
            validation_error(field, &message).into_response()
        }
        ProfileError::Conflict { message } => {
            tracing::debug!(
                target: "identity.profile_routes",
                username,
                detail = %message,
                "conflict",
            );
            conflict_error().into_response()
        }
        ProfileError::NotFound { message } => {
            tracing::debug!(
                target: "identity.profile_routes",
                username,
                detail = %message,
                "not found",
            );
            not_found_error().into_response()
        }
        error @ (ProfileError::DeadlineExceeded { .. }
        | ProfileError::Store(StoreError::Unavailable { .. })) => {
            tracing::error!(
                target: "identity.profile_routes",
                username,
                error = %error,
                "record store unavailable",
            );
            unavailable_error().into_response()
        }
        ProfileError::Store(error @ StoreError::Persistence { .. }) => {
            tracing::error!(
                target: "identity.profile_routes",
                username,
                error = %error,
                "record store failure",
            );
            internal_error().into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_body_accepts_capitalized_and_short_aliases() {
        let body: EmailBody =
            serde_json::from_str(r#"{"Label":"home","EmailAddress":"a@x.com"}"#).expect("decode");
        assert_eq!(body.label, "home");
        let body: EmailBody =
            serde_json::from_str(r#"{"label":"home","email":"a@x.com"}"#).expect("decode");
        assert_eq!(body.emailaddress, "a@x.com");
    }

    #[test]
    fn bank_body_requires_exactly_one_entry() {
        let account = BankAccount {
            iban: "BE71096123456769".to_string(),
            bic: "GKCCBEBB".to_string(),
            country: "BE".to_string(),
        };
        let two = BTreeMap::from([
            ("main".to_string(), account.clone()),
            ("spare".to_string(), account.clone()),
        ]);
        assert!(Banks::into_entry(two).is_err());
        assert!(Banks::into_entry(BTreeMap::new()).is_err());

        let (label, value) =
            Banks::into_entry(BTreeMap::from([("main".to_string(), account.clone())]))
                .expect("one entry");
        assert_eq!(label, "main");
        assert_eq!(value, account);
    }
}
