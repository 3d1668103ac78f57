use std::sync::Arc;

use axum::{
    Json, Router,
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use super::db::DbHandle;
#[cfg(test)]
use super::db::TrackerDb;
use super::forms::FieldErrors;
use super::routes;
use crate::errors::{AuthError, DataError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    /// Add `Secure` to every cookie (production).
    pub secure_cookies: bool,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, secure_cookies: bool) -> Self {
        Self { db, secure_cookies }
    }
}

pub const SIGN_IN_PATH: &str = "/auth/sign-in";

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Signed in, but lacking the membership or role the action needs.
    Unauthorized,
    Forbidden,
    NotFound(String),
    Validation(FieldErrors),
    /// No valid session: send the browser to the sign-in page.
    SignInRequired,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(errors) => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(serde_json::json!({"status": "error", "errors": errors})),
                )
                    .into_response();
            }
            ApiError::SignInRequired => {
                return redirect(SIGN_IN_PATH);
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub fn redirect(to: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, to.to_string())]).into_response()
}

// ── Action outcomes ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    #[serde(rename = "type")]
    pub kind: ToastKind,
    pub message: String,
}

/// What an action tells the browser once its intent has been carried out.
#[derive(Debug)]
pub enum ActionOutcome {
    Success,
    /// The data layer refused the write; shown as a notification.
    Toast(Toast),
    Redirect(String),
}

impl ActionOutcome {
    pub fn error_toast(message: impl Into<String>) -> Self {
        ActionOutcome::Toast(Toast {
            kind: ToastKind::Error,
            message: message.into(),
        })
    }

    /// Success, or a toast carrying the data error. Storage faults are
    /// logged and reported generically.
    pub fn from_result<T>(result: Result<T, DataError>) -> Self {
        match result {
            Ok(_) => ActionOutcome::Success,
            Err(err) if err.is_user_facing() => ActionOutcome::error_toast(err.to_string()),
            Err(err) => {
                error!(error = %err, "write failed");
                ActionOutcome::error_toast("Something went wrong")
            }
        }
    }
}

impl IntoResponse for ActionOutcome {
    fn into_response(self) -> Response {
        match self {
            ActionOutcome::Success => Json(serde_json::json!({"status": "success"})).into_response(),
            ActionOutcome::Toast(toast) => Json(serde_json::json!({"toast": toast})).into_response(),
            ActionOutcome::Redirect(to) => redirect(&to),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .merge(routes::resources::router())
        .merge(routes::auth::router())
        .merge(routes::projects::router())
        .merge(routes::project_settings::router())
        .merge(routes::issues::router())
        .merge(routes::issue_detail::router())
}
