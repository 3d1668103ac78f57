//! Route handlers, one module per resource.
//!
//! Every resource exposes a loader (`GET`) and, where it accepts writes, an
//! action (`POST`) that dispatches on the form's `intent` field. Intents are
//! parsed into an enum through `IntentForm`, so the action and the
//! optimistic reconcile layer share a single parser.

pub mod auth;
pub mod issue_detail;
pub mod issues;
pub mod project_settings;
pub mod projects;
pub mod resources;

use axum::http::{HeaderValue, header::SET_COOKIE};
use axum::response::Response;

use super::api::ApiError;
use super::forms::{FormData, IntentForm};

/// Parse a URL-encoded request body.
pub(crate) fn form_from_body(body: &[u8]) -> Result<FormData, ApiError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| ApiError::BadRequest("Form body is not valid UTF-8".to_string()))?;
    FormData::parse(text).map_err(|e| ApiError::BadRequest(format!("Malformed form body: {}", e)))
}

/// Parse a loader's query string; a missing query is an empty form.
pub(crate) fn form_from_query(query: Option<&str>) -> Result<FormData, ApiError> {
    match query {
        None => Ok(FormData::default()),
        Some(q) => FormData::parse(q)
            .map_err(|e| ApiError::BadRequest(format!("Malformed query string: {}", e))),
    }
}

pub(crate) fn parse_intent<I: IntentForm>(form: &FormData) -> Result<I, ApiError> {
    I::parse(form).map_err(ApiError::Validation)
}

/// Append a `Set-Cookie` header to a response.
pub(crate) fn with_cookie(mut response: Response, cookie: &str) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| ApiError::Internal("Cookie is not a valid header value".to_string()))?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(response)
}
