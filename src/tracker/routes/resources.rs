//! Root, health and the small resource routes used by the UI widgets.

use axum::{
    Json, Router,
    extract::{RawForm, RawQuery, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::{form_from_body, form_from_query, with_cookie};
use crate::tracker::api::{ActionOutcome, ApiError, SharedState, redirect};
use crate::tracker::auth::Theme;
use crate::tracker::guard::{CurrentUser, MaybeUser};
use crate::tracker::models::{ProjectOption, PublicUser};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(root))
        .route("/app", get(app_layout))
        .route("/health", get(health_check))
        .route("/resources/filter-projects", get(filter_projects))
        .route("/resources/filter-users", get(filter_users))
        .route("/resources/theme-switch", post(theme_switch))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RootData {
    is_signed_in: bool,
    user: Option<PublicUser>,
    theme: &'static str,
}

async fn root(MaybeUser(identity): MaybeUser, headers: HeaderMap) -> Json<RootData> {
    Json(RootData {
        is_signed_in: identity.user.is_some(),
        user: identity.user,
        theme: Theme::from_headers(&headers).as_str(),
    })
}

#[derive(Serialize)]
struct AppData {
    user: PublicUser,
}

async fn app_layout(current: CurrentUser) -> Json<AppData> {
    Json(AppData { user: current.user })
}

async fn health_check() -> &'static str {
    "ok"
}

async fn filter_projects(
    State(state): State<SharedState>,
    current: CurrentUser,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<ProjectOption>>, ApiError> {
    let form = form_from_query(query.as_deref())?;
    let Some(q) = form.get("q").map(str::to_string) else {
        return Ok(Json(Vec::new()));
    };
    let user_id = current.user.id;
    let projects = state
        .db
        .call(move |db| db.search_projects(&user_id, &q))
        .await?;
    Ok(Json(projects))
}

async fn filter_users(
    State(state): State<SharedState>,
    _current: CurrentUser,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<PublicUser>>, ApiError> {
    let form = form_from_query(query.as_deref())?;
    let Some(q) = form.get("q").map(str::to_string) else {
        return Ok(Json(Vec::new()));
    };
    let project_id = form.get("projectId").map(str::to_string);
    let users = state
        .db
        .call(move |db| db.search_users(&q, project_id.as_deref()))
        .await?;
    Ok(Json(users))
}

async fn theme_switch(
    State(state): State<SharedState>,
    RawForm(body): RawForm,
) -> Result<Response, ApiError> {
    let form = form_from_body(&body)?;
    let theme: Theme = form
        .get("theme")
        .ok_or_else(|| ApiError::BadRequest("Missing theme".to_string()))?
        .parse()
        .map_err(ApiError::BadRequest)?;

    let cookie = theme.cookie(state.secure_cookies);
    let response = match form.get("redirectTo") {
        Some(to) => redirect(to),
        None => ActionOutcome::Success.into_response(),
    };
    with_cookie(response, &cookie)
}
