//! Authentication extractors and membership checks.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::api::ApiError;
use super::db::{DbHandle, TrackerDb};
use super::models::{ProjectMember, PublicUser, Role, Session};
use crate::errors::DataError;

/// Who made the request, as established by the session middleware.
/// Stored in request extensions on every request.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user: Option<PublicUser>,
    pub session: Option<Session>,
}

/// Requires a signed-in caller; otherwise the browser is redirected to the
/// sign-in page.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: PublicUser,
    pub session: Session,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Identity>() {
            Some(Identity {
                user: Some(user),
                session: Some(session),
            }) => Ok(CurrentUser {
                user: user.clone(),
                session: session.clone(),
            }),
            _ => Err(ApiError::SignInRequired),
        }
    }
}

/// The caller's identity, signed in or not.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Identity);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<Identity>().cloned().unwrap_or_default(),
        ))
    }
}

/// Failure of a membership check, before it is mapped to HTTP.
#[derive(Debug)]
pub enum GuardError {
    Denied,
    Data(DataError),
}

impl From<DataError> for GuardError {
    fn from(err: DataError) -> Self {
        GuardError::Data(err)
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Denied => ApiError::Unauthorized,
            GuardError::Data(e) => e.into(),
        }
    }
}

pub fn require_member(db: &TrackerDb, project_id: &str, user_id: &str) -> Result<ProjectMember, GuardError> {
    db.get_member(project_id, user_id)?
        .ok_or(GuardError::Denied)
}

pub fn require_admin(db: &TrackerDb, project_id: &str, user_id: &str) -> Result<ProjectMember, GuardError> {
    let member = require_member(db, project_id, user_id)?;
    if member.role != Role::Admin {
        return Err(GuardError::Denied);
    }
    Ok(member)
}

/// `require_member` from a request handler.
pub async fn ensure_member(db: &DbHandle, project_id: &str, user_id: &str) -> Result<ProjectMember, ApiError> {
    let (project_id, user_id) = (project_id.to_string(), user_id.to_string());
    db.call(move |db| Ok(require_member(db, &project_id, &user_id)))
        .await?
        .map_err(ApiError::from)
}

/// `require_admin` from a request handler.
pub async fn ensure_admin(db: &DbHandle, project_id: &str, user_id: &str) -> Result<ProjectMember, ApiError> {
    let (project_id, user_id) = (project_id.to_string(), user_id.to_string());
    db.call(move |db| Ok(require_admin(db, &project_id, &user_id)))
        .await?
        .map_err(ApiError::from)
}
