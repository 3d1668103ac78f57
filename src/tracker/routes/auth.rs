//! Sign-up, sign-in and sign-out.

use axum::{
    Json, Router,
    extract::{RawForm, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::info;

use super::{form_from_body, parse_intent, with_cookie};
use crate::tracker::api::{ActionOutcome, ApiError, SIGN_IN_PATH, SharedState, redirect};
use crate::tracker::auth::{
    blank_session_cookie, create_session, hash_password, invalidate_session, now_unix,
    session_cookie, verify_password,
};
use crate::tracker::forms::{FieldErrors, Fields, FormData, IntentForm};
use crate::tracker::guard::MaybeUser;
use crate::tracker::models::NewUser;

const INCORRECT_CREDENTIALS: &str = "Incorrect username or password";

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/auth", get(auth_layout))
        .route("/auth/sign-in", get(auth_layout).post(sign_in))
        .route("/auth/sign-up", get(auth_layout).post(sign_up))
        .route("/sign-out", post(sign_out))
}

#[derive(Debug)]
struct SignUpForm {
    user_name: String,
    password: String,
    first_name: String,
    last_name: String,
}

impl IntentForm for SignUpForm {
    fn parse(form: &FormData) -> Result<Self, FieldErrors> {
        let mut f = Fields::new(form);
        let user_name = f.required("userName");
        let password = f.required("password");
        let confirm = f.required("confirmPassword");
        let first_name = f.required("firstName");
        let last_name = f.required("lastName");
        if !password.is_empty() && !confirm.is_empty() && password != confirm {
            f.error("confirmPassword", "Passwords don't match");
        }
        f.finish(SignUpForm {
            user_name,
            password,
            first_name,
            last_name,
        })
    }
}

#[derive(Debug)]
struct SignInForm {
    user_name: String,
    password: String,
}

impl IntentForm for SignInForm {
    fn parse(form: &FormData) -> Result<Self, FieldErrors> {
        let mut f = Fields::new(form);
        let user_name = f.required("userName");
        let password = f.required("password");
        f.finish(SignInForm {
            user_name,
            password,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthLayoutData {
    is_signed_in: bool,
}

/// Signed-in callers have no business on the auth screens.
async fn auth_layout(MaybeUser(identity): MaybeUser) -> Response {
    if identity.user.is_some() {
        return redirect("/");
    }
    Json(AuthLayoutData { is_signed_in: false }).into_response()
}

async fn sign_up(State(state): State<SharedState>, RawForm(body): RawForm) -> Result<Response, ApiError> {
    let form = form_from_body(&body)?;
    let input: SignUpForm = parse_intent(&form)?;

    let password_hash = hash_password(input.password).await?;
    let new_user = NewUser {
        user_name: input.user_name,
        first_name: input.first_name,
        last_name: input.last_name,
        password_hash,
    };
    let now = now_unix();
    let created = state
        .db
        .call(move |db| {
            let user = db.create_user(&new_user)?;
            let (token, _) = create_session(db, &user.id, now)?;
            Ok((user, token))
        })
        .await;

    match created {
        Ok((user, token)) => {
            info!(user_id = %user.id, "user signed up");
            with_cookie(redirect("/"), &session_cookie(&token, state.secure_cookies))
        }
        Err(e) => Ok(ActionOutcome::from_result::<()>(Err(e)).into_response()),
    }
}

async fn sign_in(State(state): State<SharedState>, RawForm(body): RawForm) -> Result<Response, ApiError> {
    let form = form_from_body(&body)?;
    let input: SignInForm = parse_intent(&form)?;

    let user_name = input.user_name.clone();
    let user = match state.db.call(move |db| db.get_user_by_username(&user_name)).await {
        Ok(user) => user,
        Err(e) => return Ok(ActionOutcome::from_result::<()>(Err(e)).into_response()),
    };
    let Some(user) = user else {
        return Ok(ActionOutcome::error_toast(INCORRECT_CREDENTIALS).into_response());
    };

    if !verify_password(input.password, user.password_hash.clone()).await? {
        return Ok(ActionOutcome::error_toast(INCORRECT_CREDENTIALS).into_response());
    }

    let now = now_unix();
    let user_id = user.id.clone();
    let token = state
        .db
        .call(move |db| create_session(db, &user_id, now).map(|(token, _)| token))
        .await?;

    info!(user_id = %user.id, "user signed in");
    with_cookie(redirect("/app"), &session_cookie(&token, state.secure_cookies))
}

async fn sign_out(State(state): State<SharedState>, MaybeUser(identity): MaybeUser) -> Result<Response, ApiError> {
    let Some(session) = identity.session else {
        return Ok(redirect(SIGN_IN_PATH));
    };
    state
        .db
        .call(move |db| invalidate_session(db, &session.id))
        .await?;
    with_cookie(redirect("/"), &blank_session_cookie(state.secure_cookies))
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header};
    use axum::response::Response;

    use super::INCORRECT_CREDENTIALS;
    use crate::tracker::api::SIGN_IN_PATH;
    use crate::tracker::api::test_support::*;
    use crate::tracker::models::NewUser;
    use crate::tracker::auth::{SESSION_COOKIE, hash_password_blocking};

    fn session_from(response: &Response<axum::body::Body>) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn sign_up_fields<'a>(user_name: &'a str, confirm: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![
            ("userName", user_name),
            ("password", "hunter22"),
            ("confirmPassword", confirm),
            ("firstName", "Ada"),
            ("lastName", "Lovelace"),
        ]
    }

    #[tokio::test]
    async fn test_sign_up_creates_session_and_redirects_home() {
        let state = test_state();
        let response = send(
            app(&state),
            post_form("/auth/sign-up", None, &sign_up_fields("ada", "hunter22")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");

        let cookie = session_from(&response);
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE}=")));

        let json = body_json(send(app(&state), get_request("/", Some(&cookie))).await).await;
        assert_eq!(json["isSignedIn"], true);
        assert_eq!(json["user"]["userName"], "ada");
    }

    #[tokio::test]
    async fn test_sign_up_password_mismatch() {
        let state = test_state();
        let response = send(
            app(&state),
            post_form("/auth/sign-up", None, &sign_up_fields("ada", "different")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["errors"]["confirmPassword"][0], "Passwords don't match");
        assert!(state.db.lock_sync().unwrap().get_user_by_username("ada").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_username_toasts() {
        let state = test_state();
        sign_up(&state, "Ada");
        let response = send(
            app(&state),
            post_form("/auth/sign-up", None, &sign_up_fields("ada", "hunter22")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["toast"]["type"], "error");
        assert_eq!(json["toast"]["message"], "Username already taken");
    }

    #[tokio::test]
    async fn test_sign_in() {
        let state = test_state();
        {
            let db = state.db.lock_sync().unwrap();
            db.create_user(&NewUser {
                user_name: "grace".into(),
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                password_hash: hash_password_blocking("cobol").unwrap(),
            })
            .unwrap();
        }

        let wrong = send(
            app(&state),
            post_form("/auth/sign-in", None, &[("userName", "grace"), ("password", "fortran")]),
        )
        .await;
        assert_eq!(wrong.status(), StatusCode::OK);
        assert_eq!(body_json(wrong).await["toast"]["message"], INCORRECT_CREDENTIALS);

        let unknown = send(
            app(&state),
            post_form("/auth/sign-in", None, &[("userName", "nobody"), ("password", "cobol")]),
        )
        .await;
        assert_eq!(body_json(unknown).await["toast"]["message"], INCORRECT_CREDENTIALS);

        let ok = send(
            app(&state),
            post_form("/auth/sign-in", None, &[("userName", "grace"), ("password", "cobol")]),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::FOUND);
        assert_eq!(location(&ok), "/app");
        let cookie = session_from(&ok);
        let app_response = send(app(&state), get_request("/app", Some(&cookie))).await;
        assert_eq!(app_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sign_in_missing_fields() {
        let state = test_state();
        let response = send(app(&state), post_form("/auth/sign-in", None, &[("userName", "x")])).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["errors"]["password"][0], "Required");
    }

    #[tokio::test]
    async fn test_auth_layout_redirects_signed_in() {
        let state = test_state();
        let (_, cookie) = sign_up(&state, "Ada");
        let response = send(app(&state), get_request("/auth", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");

        let anonymous = send(app(&state), get_request("/auth/sign-in", None)).await;
        assert_eq!(anonymous.status(), StatusCode::OK);
        let json = body_json(anonymous).await;
        assert_eq!(json, serde_json::json!({ "isSignedIn": false }));
    }

    #[tokio::test]
    async fn test_sign_out_invalidates_session() {
        let state = test_state();
        let (_, cookie) = sign_up(&state, "Ada");

        let response = send(app(&state), post_form("/sign-out", Some(&cookie), &[])).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");
        let set_cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.contains("Max-Age=0"));

        let after = send(app(&state), get_request("/app", Some(&cookie))).await;
        assert_eq!(after.status(), StatusCode::FOUND);
        assert_eq!(location(&after), SIGN_IN_PATH);
    }

    #[tokio::test]
    async fn test_sign_out_without_session() {
        let state = test_state();
        let response = send(app(&state), post_form("/sign-out", None, &[])).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), SIGN_IN_PATH);
    }
}
