//! Password hashing, session tokens and cookie formatting.
//!
//! Sessions follow a sliding-expiry scheme: a session lives for 30 days and
//! is pushed out to a fresh 30 days once less than half of that remains. The
//! client only ever sees the random token; the database stores its SHA-256
//! digest as the session id, so a leaked sessions table cannot be replayed.

use std::str::FromStr;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::db::TrackerDb;
use super::models::{PublicUser, Session};
use crate::errors::{AuthError, DataError};

pub const SESSION_COOKIE: &str = "auth_session";
pub const THEME_COOKIE: &str = "en_theme";

pub const SESSION_LIFETIME_SECS: i64 = 60 * 60 * 24 * 30;
/// Sessions with less than this much time left are extended.
pub const SESSION_REFRESH_THRESHOLD_SECS: i64 = SESSION_LIFETIME_SECS / 2;
pub const THEME_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 365;

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

// ── Passwords ─────────────────────────────────────────────────────────

/// Hash a password with Argon2id and a random 16-byte salt, returning the
/// PHC string.
pub fn hash_password_blocking(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hash(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password_blocking(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::MalformedHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Argon2 is deliberately slow; keep it off the async workers.
pub async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password_blocking(&password))
        .await
        .map_err(|e| AuthError::TaskFailed(e.to_string()))?
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || verify_password_blocking(&password, &hash))
        .await
        .map_err(|e| AuthError::TaskFailed(e.to_string()))?
}

// ── Sessions ──────────────────────────────────────────────────────────

/// 20 random bytes, hex encoded.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The stored session id for a client token.
pub fn session_id_for(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Result of a successful token validation.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub user: PublicUser,
    pub session: Session,
    /// The expiry was extended; the cookie must be re-issued.
    pub fresh: bool,
}

pub fn create_session(db: &TrackerDb, user_id: &str, now: i64) -> Result<(String, Session), DataError> {
    let token = generate_session_token();
    let session = Session {
        id: session_id_for(&token),
        user_id: user_id.to_string(),
        expires_at: now + SESSION_LIFETIME_SECS,
    };
    db.insert_session(&session)?;
    debug!(user_id, "session created");
    Ok((token, session))
}

pub fn validate_session(db: &TrackerDb, token: &str, now: i64) -> Result<Option<ValidatedSession>, DataError> {
    let session_id = session_id_for(token);
    let Some((mut session, user)) = db.get_session_with_user(&session_id)? else {
        return Ok(None);
    };

    if now >= session.expires_at {
        db.delete_session(&session.id)?;
        debug!(user_id = %session.user_id, "expired session removed");
        return Ok(None);
    }

    let mut fresh = false;
    if session.expires_at - now < SESSION_REFRESH_THRESHOLD_SECS {
        session.expires_at = now + SESSION_LIFETIME_SECS;
        db.update_session_expiry(&session.id, session.expires_at)?;
        fresh = true;
    }

    Ok(Some(ValidatedSession {
        user: user.public(),
        session,
        fresh,
    }))
}

pub fn invalidate_session(db: &TrackerDb, session_id: &str) -> Result<(), DataError> {
    db.delete_session(session_id)?;
    Ok(())
}

// ── Cookies ───────────────────────────────────────────────────────────

fn cookie(name: &str, value: &str, max_age: i64, http_only: bool, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age}; SameSite=Lax");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    cookie(SESSION_COOKIE, token, SESSION_LIFETIME_SECS, true, secure)
}

pub fn blank_session_cookie(secure: bool) -> String {
    cookie(SESSION_COOKIE, "", 0, true, secure)
}

/// Read a cookie value from every `Cookie` header on the request.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    /// Theme stored in the request's theme cookie; anything unrecognised is
    /// treated as `system`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        read_cookie(headers, THEME_COOKIE)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    /// `Set-Cookie` value persisting this theme. `system` clears the cookie.
    pub fn cookie(&self, secure: bool) -> String {
        match self {
            Self::System => cookie(THEME_COOKIE, "", 0, false, secure),
            Self::Light | Self::Dark => {
                cookie(THEME_COOKIE, self.as_str(), THEME_MAX_AGE_SECS, false, secure)
            }
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(format!("Invalid theme: {}", s)),
        }
    }
}
