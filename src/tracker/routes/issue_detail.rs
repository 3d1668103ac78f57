//! `/app/issues/{issue_id}`: a single issue with its comment thread.

use axum::{
    Json, Router,
    extract::{Path, RawForm, State},
    routing::get,
};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use super::{form_from_body, parse_intent};
use crate::errors::DataError;
use crate::tracker::api::{ActionOutcome, ApiError, SharedState};
use crate::tracker::forms::{FieldErrors, Fields, FormData, IntentForm, unknown_intent};
use crate::tracker::guard::{CurrentUser, ensure_member};
use crate::tracker::models::{
    CommentView, IssueChanges, IssueDetail, IssuePriority, IssueStatus, NewComment, Role,
};
use crate::tracker::reconcile::{Optimistic, ReconcileContext};

pub const ISSUES_PATH: &str = "/app/issues";

pub fn router() -> Router<SharedState> {
    Router::new().route("/app/issues/{issue_id}", get(issue_loader).post(issue_action))
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssueDetailIntent {
    DeleteIssue,
    UpdateTitle {
        title: String,
    },
    UpdateDescription {
        description: Option<String>,
    },
    UpdateIssue {
        status: Option<IssueStatus>,
        priority: Option<IssuePriority>,
        project_id: Option<String>,
    },
    CreateComment {
        id: Option<String>,
        content: String,
    },
    DeleteComment {
        id: String,
    },
}

impl IntentForm for IssueDetailIntent {
    fn parse(form: &FormData) -> Result<Self, FieldErrors> {
        let mut f = Fields::new(form);
        let intent = match form.get("intent") {
            Some("delete_issue") => IssueDetailIntent::DeleteIssue,
            Some("update_title") => IssueDetailIntent::UpdateTitle {
                title: f.required("title"),
            },
            Some("update_description") => IssueDetailIntent::UpdateDescription {
                description: f.optional("description"),
            },
            Some("update_issue") => IssueDetailIntent::UpdateIssue {
                status: f.code("status"),
                priority: f.code("priority"),
                project_id: f.optional("projectId"),
            },
            Some("create_comment") => IssueDetailIntent::CreateComment {
                id: f.optional("id"),
                content: f.required("content"),
            },
            Some("delete_comment") => IssueDetailIntent::DeleteComment { id: f.required("id") },
            _ => return Err(unknown_intent(form)),
        };
        f.finish(intent)
    }
}

/// Only comment intents touch the thread; issue edits are reflected by the
/// next load.
impl Optimistic for IssueDetailIntent {
    type Row = CommentView;

    fn key(row: &CommentView) -> &str {
        &row.id
    }

    fn apply(self, rows: &mut IndexMap<String, CommentView>, ctx: &ReconcileContext) {
        match self {
            IssueDetailIntent::CreateComment { id: Some(id), content } => {
                rows.insert(
                    id.clone(),
                    CommentView {
                        id,
                        content,
                        created_by: ctx.viewer.id.clone(),
                        creator: ctx.viewer.full_name(),
                    },
                );
            }
            IssueDetailIntent::DeleteComment { id } => {
                rows.shift_remove(&id);
            }
            _ => {}
        }
    }
}

#[derive(Serialize)]
struct IssueData {
    issue: IssueDetail,
    comments: Vec<CommentView>,
}

async fn issue_loader(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(issue_id): Path<String>,
) -> Result<Json<IssueData>, ApiError> {
    let user_id = current.user.id;
    let id = issue_id.clone();
    let loaded = state
        .db
        .call(move |db| {
            let Some(issue) = db.get_issue_for_member(&id, &user_id)? else {
                return Ok(None);
            };
            let comments = db.list_comments(&id, &user_id)?;
            Ok(Some(IssueData { issue, comments }))
        })
        .await?;
    loaded
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Issue {} not found", issue_id)))
}

async fn issue_action(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(issue_id): Path<String>,
    RawForm(body): RawForm,
) -> Result<ActionOutcome, ApiError> {
    let form = form_from_body(&body)?;
    let intent: IssueDetailIntent = parse_intent(&form)?;
    let user_id = current.user.id;

    let (uid, id) = (user_id.clone(), issue_id.clone());
    let issue = state
        .db
        .call(move |db| db.get_issue_for_member(&id, &uid))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Issue {} not found", issue_id)))?;

    let result = match intent {
        IssueDetailIntent::DeleteIssue => {
            let id = issue_id.clone();
            let result = state.db.call(move |db| db.delete_issue(&id, None)).await;
            if result.is_ok() {
                info!(issue_id = %issue_id, "issue deleted");
                return Ok(ActionOutcome::Redirect(ISSUES_PATH.to_string()));
            }
            result
        }
        IssueDetailIntent::UpdateTitle { title } => {
            update(&state, issue_id, IssueChanges {
                title: Some(title),
                ..IssueChanges::default()
            })
            .await
        }
        IssueDetailIntent::UpdateDescription { description } => {
            update(&state, issue_id, IssueChanges {
                description: Some(description.unwrap_or_default()),
                ..IssueChanges::default()
            })
            .await
        }
        IssueDetailIntent::UpdateIssue {
            status,
            priority,
            project_id,
        } => {
            if let Some(target) = project_id.as_deref() {
                if target != issue.project.id {
                    ensure_member(&state.db, target, &user_id).await?;
                }
            }
            update(&state, issue_id, IssueChanges {
                status,
                priority,
                project_id,
                ..IssueChanges::default()
            })
            .await
        }
        IssueDetailIntent::CreateComment { id, content } => {
            let new = NewComment {
                id,
                issue_id,
                created_by: user_id,
                content,
            };
            state
                .db
                .call(move |db| db.create_comment(&new).map(|_| ()))
                .await
        }
        IssueDetailIntent::DeleteComment { id } => {
            let is_admin = issue.project.role == Role::Admin;
            let comment = state
                .db
                .call({
                    let id = id.clone();
                    move |db| db.get_comment(&id)
                })
                .await?
                .filter(|c| c.issue_id == issue_id);
            match comment {
                None => Err(DataError::not_found("Comment", id)),
                Some(comment) if comment.created_by != user_id && !is_admin => {
                    return Err(ApiError::Unauthorized);
                }
                Some(_) => state.db.call(move |db| db.delete_comment(&id)).await,
            }
        }
    };
    Ok(ActionOutcome::from_result(result))
}

async fn update(state: &SharedState, issue_id: String, changes: IssueChanges) -> Result<(), DataError> {
    state
        .db
        .call(move |db| db.update_issue(&issue_id, &changes).map(|_| ()))
        .await
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::tracker::api::test_support::*;
    use crate::tracker::models::{NewIssue, Project, PublicUser};
    use crate::tracker::reconcile::reconcile;

    struct World {
        state: SharedState,
        ada: PublicUser,
        ada_cookie: String,
        bob: PublicUser,
        bob_cookie: String,
        eve_cookie: String,
        engine: Project,
    }

    /// Ada owns "Engine" with Bob as a plain member and issue `i1`; Eve is
    /// an outsider.
    fn world() -> World {
        let state = test_state();
        let (ada, ada_cookie) = sign_up(&state, "Ada");
        let (bob, bob_cookie) = sign_up(&state, "Bob");
        let (_, eve_cookie) = sign_up(&state, "Eve");
        let engine = create_project(&state, &ada, "Engine");
        {
            let db = state.db.lock_sync().unwrap();
            db.add_member(&engine.id, &bob.id, &ada.id).unwrap();
            db.create_issue(&NewIssue {
                id: Some("i1".into()),
                project_id: engine.id.clone(),
                created_by: ada.id.clone(),
                title: "Gears".into(),
                description: Some("Brass".into()),
                status: IssueStatus::ToDo,
                priority: IssuePriority::High,
            })
            .unwrap();
        }
        World {
            state,
            ada,
            ada_cookie,
            bob,
            bob_cookie,
            eve_cookie,
            engine,
        }
    }

    async fn post(w: &World, cookie: &str, fields: &[(&str, &str)]) -> axum::response::Response {
        send(app(&w.state), post_form("/app/issues/i1", Some(cookie), fields)).await
    }

    #[test]
    fn test_reconcile_comments() {
        let ctx = ReconcileContext::new(PublicUser {
            id: "ada".into(),
            user_name: "ada".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        });
        let confirmed = vec![CommentView {
            id: "c1".into(),
            content: "First".into(),
            created_by: "bob".into(),
            creator: "Bob Tester".into(),
        }];
        let pending = [
            FormData::from_pairs([("intent", "create_comment"), ("id", "c2"), ("content", "Second")]),
            FormData::from_pairs([("intent", "delete_comment"), ("id", "c1")]),
            FormData::from_pairs([("intent", "update_title"), ("title", "Ignored")]),
        ];
        let rows = reconcile::<IssueDetailIntent>(confirmed, &pending, &ctx);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "c2");
        assert_eq!(rows[0].created_by, "ada");
        assert_eq!(rows[0].creator, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_loader_returns_issue_and_comments() {
        let w = world();
        post(&w, &w.bob_cookie, &[("intent", "create_comment"), ("id", "c1"), ("content", "First")]).await;
        post(&w, &w.ada_cookie, &[("intent", "create_comment"), ("id", "c2"), ("content", "Second")]).await;

        let response = send(app(&w.state), get_request("/app/issues/i1", Some(&w.bob_cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["issue"]["title"], "Gears");
        assert_eq!(json["issue"]["status"], 2);
        assert_eq!(json["issue"]["project"]["role"], "MEMBER");
        assert_eq!(json["issue"]["creator"], "Ada Tester");
        let comments = json["comments"].as_array().unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0]["id"], "c2");
        assert_eq!(comments[1]["creator"], "Bob Tester");
    }

    #[tokio::test]
    async fn test_outsider_gets_404() {
        let w = world();
        let loader = send(app(&w.state), get_request("/app/issues/i1", Some(&w.eve_cookie))).await;
        assert_eq!(loader.status(), StatusCode::NOT_FOUND);

        let action = post(&w, &w.eve_cookie, &[("intent", "update_title"), ("title", "Mine")]).await;
        assert_eq!(action.status(), StatusCode::NOT_FOUND);
        let issue = w.state.db.lock_sync().unwrap().get_issue("i1").unwrap().unwrap();
        assert_eq!(issue.title, "Gears");
    }

    #[tokio::test]
    async fn test_update_title_and_description() {
        let w = world();
        let response = post(&w, &w.bob_cookie, &[("intent", "update_title"), ("title", "Cogs")]).await;
        assert_eq!(body_json(response).await["status"], "success");
        let response = post(&w, &w.bob_cookie, &[("intent", "update_description")]).await;
        assert_eq!(body_json(response).await["status"], "success");

        let issue = w.state.db.lock_sync().unwrap().get_issue("i1").unwrap().unwrap();
        assert_eq!(issue.title, "Cogs");
        assert_eq!(issue.description, "");
        assert_eq!(issue.priority, IssuePriority::High);

        let empty = post(&w, &w.bob_cookie, &[("intent", "update_title"), ("title", "")]).await;
        assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_moving_issue_requires_target_membership() {
        let w = world();
        let eve = w.state.db.lock_sync().unwrap().get_user_by_username("eve").unwrap().unwrap();
        let foreign = create_project(&w.state, &eve.public(), "Loom");
        let own = create_project(&w.state, &w.ada, "Difference");

        let denied = post(
            &w,
            &w.ada_cookie,
            &[("intent", "update_issue"), ("projectId", foreign.id.as_str())],
        )
        .await;
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let moved = post(
            &w,
            &w.ada_cookie,
            &[("intent", "update_issue"), ("projectId", own.id.as_str()), ("status", "4")],
        )
        .await;
        assert_eq!(body_json(moved).await["status"], "success");
        let issue = w.state.db.lock_sync().unwrap().get_issue("i1").unwrap().unwrap();
        assert_eq!(issue.project_id, own.id);
        assert_eq!(issue.status, IssueStatus::Done);
        assert_ne!(issue.project_id, w.engine.id);
    }

    #[tokio::test]
    async fn test_comment_deletion_rights() {
        let w = world();
        post(&w, &w.ada_cookie, &[("intent", "create_comment"), ("id", "by-ada"), ("content", "Admin note")]).await;
        post(&w, &w.bob_cookie, &[("intent", "create_comment"), ("id", "by-bob"), ("content", "Member note")]).await;

        let denied = post(&w, &w.bob_cookie, &[("intent", "delete_comment"), ("id", "by-ada")]).await;
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let own = post(&w, &w.bob_cookie, &[("intent", "delete_comment"), ("id", "by-bob")]).await;
        assert_eq!(body_json(own).await["status"], "success");

        post(&w, &w.bob_cookie, &[("intent", "create_comment"), ("id", "by-bob-2"), ("content", "Again")]).await;
        let admin = post(&w, &w.ada_cookie, &[("intent", "delete_comment"), ("id", "by-bob-2")]).await;
        assert_eq!(body_json(admin).await["status"], "success");

        let missing = post(&w, &w.ada_cookie, &[("intent", "delete_comment"), ("id", "nope")]).await;
        assert_eq!(body_json(missing).await["toast"]["type"], "error");

        let db = w.state.db.lock_sync().unwrap();
        assert!(db.get_comment("by-ada").unwrap().is_some());
        assert!(db.get_comment("by-bob").unwrap().is_none());
        assert_eq!(db.list_comments("i1", &w.bob.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_issue_redirects_and_cascades() {
        let w = world();
        post(&w, &w.bob_cookie, &[("intent", "create_comment"), ("id", "c1"), ("content", "Bye")]).await;

        let response = post(&w, &w.bob_cookie, &[("intent", "delete_issue")]).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/app/issues");

        let db = w.state.db.lock_sync().unwrap();
        assert!(db.get_issue("i1").unwrap().is_none());
        assert!(db.get_comment("c1").unwrap().is_none());
    }
}
