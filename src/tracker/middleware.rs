//! Request middleware: session resolution and same-origin enforcement.

use axum::{
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{HOST, ORIGIN, SET_COOKIE},
    },
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::api::{ApiError, SharedState};
use super::auth::{
    SESSION_COOKIE, blank_session_cookie, now_unix, read_cookie, session_cookie, validate_session,
};
use super::guard::Identity;

/// Resolve the session cookie into an `Identity` for the handlers.
///
/// A refreshed session gets its cookie re-issued; an unknown or expired one
/// gets a blank cookie. Neither overrides a session cookie the handler set.
pub async fn session_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = read_cookie(request.headers(), SESSION_COOKIE)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let mut cookie = None;
    let identity = match token {
        None => Identity::default(),
        Some(token) => {
            let now = now_unix();
            let lookup = token.clone();
            match state
                .db
                .call(move |db| validate_session(db, &lookup, now))
                .await
            {
                Ok(Some(validated)) => {
                    if validated.fresh {
                        cookie = Some(session_cookie(&token, state.secure_cookies));
                    }
                    Identity {
                        user: Some(validated.user),
                        session: Some(validated.session),
                    }
                }
                Ok(None) => {
                    debug!("invalid session cookie");
                    cookie = Some(blank_session_cookie(state.secure_cookies));
                    Identity::default()
                }
                Err(e) => {
                    warn!(error = %e, "session validation failed");
                    Identity::default()
                }
            }
        }
    };

    request.extensions_mut().insert(identity);
    let mut response = next.run(request).await;

    if let Some(cookie) = cookie {
        if !sets_cookie(response.headers(), SESSION_COOKIE) {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
    }
    response
}

fn sets_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split_once('=').is_some_and(|(key, _)| key == name))
}

/// Reject state-changing requests whose `Origin` does not match `Host`.
pub async fn csrf_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    if matches!(*request.method(), Method::GET | Method::HEAD) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(HOST).and_then(|v| v.to_str().ok());

    if !origin_matches_host(origin, host) {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            origin = origin.unwrap_or("-"),
            "cross-origin request rejected"
        );
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(request).await)
}

/// True when `origin` is an absolute URL whose authority equals `host`.
/// The scheme's default port may be written on either side or omitted.
fn origin_matches_host(origin: Option<&str>, host: Option<&str>) -> bool {
    let (Some(origin), Some(host)) = (origin, host) else {
        return false;
    };
    let Some((scheme, rest)) = origin.split_once("://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    let default_port = match scheme.to_ascii_lowercase().as_str() {
        "http" => Some(":80"),
        "https" => Some(":443"),
        _ => None,
    };
    let strip = |value: &str| -> String {
        let value = value.to_ascii_lowercase();
        match default_port.and_then(|port| value.strip_suffix(port)) {
            Some(bare) => bare.to_string(),
            None => value,
        }
    };
    !authority.is_empty() && strip(authority) == strip(host)
}
