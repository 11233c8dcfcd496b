use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::AppState;
use crate::api_envelope::{
    conflict_error, created_data, forbidden_error, internal_error, not_found_error, ok_data,
    validation_error,
};
use crate::credentials::Principal;
use crate::invitations::InvitationError;

pub async fn list_organizations(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Response {
    ok_data(state.invitations.organizations_for_user(&username).await).into_response()
}

/// Accepts the pending invitation for `role` in `globalid`.
pub async fn accept_membership(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((username, globalid, role)): Path<(String, String, String)>,
) -> Response {
    if principal.subject != username {
        return forbidden_error("Only the invited user can accept an invitation.").into_response();
    }
    match state.invitations.accept(&username, &globalid, &role).await {
        Ok(invitation) => created_data(invitation).into_response(),
        Err(error) => invitation_error_response(&username, error),
    }
}

pub async fn reject_membership(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((username, globalid, role)): Path<(String, String, String)>,
) -> Response {
    if principal.subject != username {
        return forbidden_error("Only the invited user can reject an invitation.").into_response();
    }
    match state.invitations.reject(&username, &globalid, &role).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => invitation_error_response(&username, error),
    }
}

pub fn invitation_error_response(username: &str, error: InvitationError) -> Response {
    match error {
        InvitationError::InvalidRole { role } => {
            validation_error("role", &format!("Unknown role '{role}'.")).into_response()
        }
        InvitationError::NotFound { .. } => not_found_error().into_response(),
        InvitationError::AlreadyPending { .. } => conflict_error().into_response(),
        error @ InvitationError::Persistence { .. } => {
            tracing::error!(
                target: "identity.organization_routes",
                username,
                error = %error,
                "invitation store failure",
            );
            internal_error().into_response()
        }
    }
}
