use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

pub type ApiErrorTuple = (StatusCode, Json<ApiErrorResponse>);

/// Validation messages keyed by the offending field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    ServiceUnavailable,
    InternalError,
}

impl ApiErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Conflict => "conflict",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalError => "internal_error",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Generic status text used as the client-facing message.
    pub fn status_text(self) -> &'static str {
        self.status().canonical_reason().unwrap_or("Error")
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub message: String,
    pub error: ApiErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

#[derive(Debug, Serialize)]
pub struct ApiDataEnvelope<T> {
    pub data: T,
}

pub fn ok_data<T: Serialize>(data: T) -> (StatusCode, Json<ApiDataEnvelope<T>>) {
    (StatusCode::OK, Json(ApiDataEnvelope { data }))
}

pub fn created_data<T: Serialize>(data: T) -> (StatusCode, Json<ApiDataEnvelope<T>>) {
    (StatusCode::CREATED, Json(ApiDataEnvelope { data }))
}

/// Error envelope for `code`; the message defaults to the status text.
pub fn status_error(code: ApiErrorCode) -> ApiErrorTuple {
    api_error(code, None, None)
}

fn api_error(code: ApiErrorCode, message: Option<&str>, errors: Option<FieldErrors>) -> ApiErrorTuple {
    let message = message.unwrap_or(code.status_text()).to_string();
    (
        code.status(),
        Json(ApiErrorResponse {
            error: ApiErrorDetail {
                code: code.as_str(),
                message: message.clone(),
            },
            message,
            errors,
        }),
    )
}

pub fn validation_error(field: &str, message: &str) -> ApiErrorTuple {
    let errors = FieldErrors::from([(field.to_string(), vec![message.to_string()])]);
    api_error(ApiErrorCode::InvalidRequest, None, Some(errors))
}

pub fn bad_request_error() -> ApiErrorTuple {
    status_error(ApiErrorCode::InvalidRequest)
}

pub fn unauthorized_error() -> ApiErrorTuple {
    status_error(ApiErrorCode::Unauthorized)
}

pub fn forbidden_error(message: &str) -> ApiErrorTuple {
    api_error(ApiErrorCode::Forbidden, Some(message), None)
}

pub fn not_found_error() -> ApiErrorTuple {
    status_error(ApiErrorCode::NotFound)
}

pub fn conflict_error() -> ApiErrorTuple {
    status_error(ApiErrorCode::Conflict)
}

pub fn internal_error() -> ApiErrorTuple {
    status_error(ApiErrorCode::InternalError)
}

pub fn unavailable_error() -> ApiErrorTuple {
    status_error(ApiErrorCode::ServiceUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_maps_to_bad_request_with_field_detail() {
        let (status, payload) = validation_error("label", "Label length must be 3 to 50.");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = serde_json::to_value(payload.0).expect("serialize payload");
        assert_eq!(body["error"]["code"], "invalid_request");
        assert_eq!(body["message"], "Bad Request");
        assert_eq!(body["errors"]["label"][0], "Label length must be 3 to 50.");
    }

    #[test]
    fn status_errors_carry_only_generic_status_text() {
        let (status, payload) = internal_error();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_value(payload.0).expect("serialize payload");
        assert_eq!(body["message"], "Internal Server Error");
        assert_eq!(body["error"]["code"], "internal_error");
        assert!(body.get("errors").is_none());

        let (status, payload) = conflict_error();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(payload.0.message, "Conflict");
    }

    #[test]
    fn forbidden_error_keeps_caller_message_and_method_code_maps_to_405() {
        let (status, payload) = forbidden_error("Changing username or id is forbidden.");
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(payload.0.message, "Changing username or id is forbidden.");
        assert_eq!(payload.0.error.code, "forbidden");

        let (status, payload) = status_error(ApiErrorCode::MethodNotAllowed);
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(payload.0.error.message, "Method Not Allowed");
    }

    #[test]
    fn created_data_wraps_payload_in_data_envelope() {
        let (status, payload) = created_data(serde_json::json!({"label": "home"}));
        assert_eq!(status, StatusCode::CREATED);
        let body = serde_json::to_value(payload.0).expect("serialize payload");
        assert_eq!(body["data"]["label"], "home");
    }
}
