//! `/app/issues`: every issue across the caller's projects, filterable and
//! sortable through the query string.

use axum::{
    Json, Router,
    extract::{RawForm, RawQuery, State},
    routing::get,
};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use super::{form_from_body, form_from_query, parse_intent};
use crate::errors::DataError;
use crate::tracker::api::{ActionOutcome, ApiError, SharedState};
use crate::tracker::forms::{FieldErrors, Fields, FormData, IntentForm, unknown_intent};
use crate::tracker::guard::{CurrentUser, ensure_member};
use crate::tracker::models::{
    IssueChanges, IssueFilter, IssueListItem, IssuePriority, IssueStatus, NewIssue, ProjectOption,
    SortBy, SortOrder,
};
use crate::tracker::reconcile::{Optimistic, ReconcileContext};

pub fn router() -> Router<SharedState> {
    Router::new().route("/app/issues", get(issues_loader).post(issues_action))
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssueIntent {
    Create {
        id: Option<String>,
        project_id: String,
        status: Option<IssueStatus>,
        priority: Option<IssuePriority>,
        title: String,
        description: Option<String>,
    },
    Delete {
        id: String,
        project_id: String,
    },
    Update {
        id: String,
        project_id: String,
        priority: Option<IssuePriority>,
        status: Option<IssueStatus>,
        title: Option<String>,
        description: Option<String>,
    },
}

impl IssueIntent {
    fn project_id(&self) -> &str {
        match self {
            IssueIntent::Create { project_id, .. }
            | IssueIntent::Delete { project_id, .. }
            | IssueIntent::Update { project_id, .. } => project_id,
        }
    }
}

impl IntentForm for IssueIntent {
    fn parse(form: &FormData) -> Result<Self, FieldErrors> {
        let mut f = Fields::new(form);
        match form.get("intent") {
            Some("create_issue") => {
                let intent = IssueIntent::Create {
                    id: f.optional("id"),
                    project_id: f.required("projectId"),
                    status: f.required_code("status"),
                    priority: f.required_code("priority"),
                    title: f.required("title"),
                    description: f.optional("description"),
                };
                f.finish(intent)
            }
            Some("delete_issue") => {
                let intent = IssueIntent::Delete {
                    id: f.required("id"),
                    project_id: f.required("projectId"),
                };
                f.finish(intent)
            }
            Some("update_issue") => {
                // ownerId is accepted from older clients but has no column.
                let intent = IssueIntent::Update {
                    id: f.required("id"),
                    project_id: f.required("projectId"),
                    priority: f.code("priority"),
                    status: f.code("status"),
                    title: f.optional("title"),
                    description: f.optional("description"),
                };
                f.finish(intent)
            }
            _ => Err(unknown_intent(form)),
        }
    }
}

impl Optimistic for IssueIntent {
    type Row = IssueListItem;

    fn key(row: &IssueListItem) -> &str {
        &row.id
    }

    fn apply(self, rows: &mut IndexMap<String, IssueListItem>, ctx: &ReconcileContext) {
        match self {
            IssueIntent::Create {
                id: Some(id),
                project_id,
                status,
                priority,
                title,
                ..
            } => {
                rows.insert(
                    id.clone(),
                    IssueListItem {
                        id,
                        created_at: ctx.now.clone(),
                        project_id,
                        priority: priority.unwrap_or_default(),
                        status: status.unwrap_or_default(),
                        title,
                        creator: ctx.viewer.full_name(),
                    },
                );
            }
            IssueIntent::Create { id: None, .. } => {}
            IssueIntent::Delete { id, .. } => {
                rows.shift_remove(&id);
            }
            IssueIntent::Update {
                id,
                priority,
                status,
                title,
                ..
            } => {
                if let Some(issue) = rows.get_mut(&id) {
                    if let Some(priority) = priority {
                        issue.priority = priority;
                    }
                    if let Some(status) = status {
                        issue.status = status;
                    }
                    if let Some(title) = title {
                        issue.title = title;
                    }
                }
            }
        }
    }
}

// ── Loader ────────────────────────────────────────────────────────────

/// Build the list filter from the query string. Any unrecognised value is
/// a bad request.
pub fn parse_filter(query: &FormData) -> Result<IssueFilter, ApiError> {
    fn bad(key: &str, value: &str) -> ApiError {
        ApiError::BadRequest(format!("Invalid {}: {}", key, value))
    }

    fn codes<T: TryFrom<i64>>(query: &FormData, key: &str) -> Result<Vec<i64>, ApiError> {
        query
            .get_all(key)
            .into_iter()
            .map(|raw| {
                raw.parse::<i64>()
                    .ok()
                    .filter(|code| T::try_from(*code).is_ok())
                    .ok_or_else(|| bad(key, raw))
            })
            .collect()
    }

    let mut filter = IssueFilter {
        statuses: codes::<IssueStatus>(query, "status")?,
        priorities: codes::<IssuePriority>(query, "priority")?,
        projects: query.get_all("project").into_iter().map(str::to_string).collect(),
        ..IssueFilter::default()
    };

    for exclusive in query.get_all("exclusive") {
        match exclusive {
            "status" => filter.exclusive_status = true,
            "priority" => filter.exclusive_priority = true,
            other => return Err(bad("exclusive", other)),
        }
    }
    if let Some(raw) = query.get("sortBy") {
        filter.sort_by = raw.parse::<SortBy>().map_err(ApiError::BadRequest)?;
    }
    if let Some(raw) = query.get("order") {
        filter.order = raw.parse::<SortOrder>().map_err(ApiError::BadRequest)?;
    }
    Ok(filter)
}

#[derive(Serialize)]
struct IssuesData {
    issues: Vec<IssueListItem>,
    projects: Vec<ProjectOption>,
}

async fn issues_loader(
    State(state): State<SharedState>,
    current: CurrentUser,
    RawQuery(query): RawQuery,
) -> Result<Json<IssuesData>, ApiError> {
    let filter = parse_filter(&form_from_query(query.as_deref())?)?;
    let user_id = current.user.id;
    let (issues, projects) = state
        .db
        .call(move |db| {
            let issues = db.list_issues(&user_id, &filter)?;
            let projects = db.projects_for_filter(&user_id, &filter.projects)?;
            Ok((issues, projects))
        })
        .await?;
    Ok(Json(IssuesData { issues, projects }))
}

// ── Action ────────────────────────────────────────────────────────────

async fn issues_action(
    State(state): State<SharedState>,
    current: CurrentUser,
    RawForm(body): RawForm,
) -> Result<ActionOutcome, ApiError> {
    let form = form_from_body(&body)?;
    let intent: IssueIntent = parse_intent(&form)?;
    let user_id = current.user.id;
    ensure_member(&state.db, intent.project_id(), &user_id).await?;

    let result = match intent {
        IssueIntent::Create {
            id,
            project_id,
            status,
            priority,
            title,
            description,
        } => {
            let new = NewIssue {
                id,
                project_id,
                created_by: user_id,
                title,
                description,
                status: status.unwrap_or_default(),
                priority: priority.unwrap_or_default(),
            };
            let result = state.db.call(move |db| db.create_issue(&new)).await;
            if let Ok(issue) = &result {
                info!(issue_id = %issue.id, project_id = %issue.project_id, "issue created");
            }
            result.map(|_| ())
        }
        IssueIntent::Delete { id, project_id } => {
            state
                .db
                .call(move |db| db.delete_issue(&id, Some(&project_id)))
                .await
        }
        IssueIntent::Update {
            id,
            project_id,
            priority,
            status,
            title,
            description,
        } => {
            let changes = IssueChanges {
                title,
                description,
                status,
                priority,
                project_id: None,
            };
            state
                .db
                .call(move |db| {
                    match db.get_issue(&id)? {
                        Some(issue) if issue.project_id == project_id => {}
                        _ => return Err(DataError::not_found("Issue", &id)),
                    }
                    db.update_issue(&id, &changes).map(|_| ())
                })
                .await
        }
    };
    Ok(ActionOutcome::from_result(result))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::tracker::api::test_support::*;
    use crate::tracker::models::{Project, PublicUser};
    use crate::tracker::reconcile::reconcile;

    fn item(id: &str, title: &str) -> IssueListItem {
        IssueListItem {
            id: id.into(),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            project_id: "p1".into(),
            priority: IssuePriority::Low,
            status: IssueStatus::ToDo,
            title: title.into(),
            creator: "Bob Tester".into(),
        }
    }

    fn ctx() -> ReconcileContext {
        ReconcileContext::new(PublicUser {
            id: "ada".into(),
            user_name: "ada".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        })
    }

    #[test]
    fn test_parse_create_rejects_bad_codes() {
        let errors = IssueIntent::parse(&FormData::from_pairs([
            ("intent", "create_issue"),
            ("projectId", "p1"),
            ("status", "9"),
            ("priority", "high"),
            ("title", "Gears"),
        ]))
        .unwrap_err();
        assert!(errors.contains_key("status"));
        assert!(errors.contains_key("priority"));
    }

    #[test]
    fn test_parse_update_ignores_owner() {
        let intent = IssueIntent::parse(&FormData::from_pairs([
            ("intent", "update_issue"),
            ("id", "i1"),
            ("projectId", "p1"),
            ("ownerId", "someone"),
            ("status", "4"),
        ]))
        .unwrap();
        assert_eq!(
            intent,
            IssueIntent::Update {
                id: "i1".into(),
                project_id: "p1".into(),
                priority: None,
                status: Some(IssueStatus::Done),
                title: None,
                description: None,
            }
        );
    }

    #[test]
    fn test_reconcile_issues() {
        let ctx = ctx();
        let pending = [
            FormData::from_pairs([
                ("intent", "create_issue"),
                ("id", "new"),
                ("projectId", "p1"),
                ("status", "1"),
                ("priority", "4"),
                ("title", "Boiler"),
            ]),
            FormData::from_pairs([
                ("intent", "update_issue"),
                ("id", "a"),
                ("projectId", "p1"),
                ("status", "4"),
            ]),
            FormData::from_pairs([("intent", "delete_issue"), ("id", "b"), ("projectId", "p1")]),
            FormData::from_pairs([("intent", "create_issue"), ("projectId", "p1")]),
        ];
        let rows = reconcile::<IssueIntent>(vec![item("a", "Gears"), item("b", "Levers")], &pending, &ctx);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, IssueStatus::Done);
        assert_eq!(rows[0].title, "Gears");
        assert_eq!(rows[0].priority, IssuePriority::Low);
        let fresh = &rows[1];
        assert_eq!(fresh.id, "new");
        assert_eq!(fresh.creator, "Ada Lovelace");
        assert_eq!(fresh.created_at, ctx.now);
        assert_eq!(fresh.priority, IssuePriority::Urgent);
    }

    #[test]
    fn test_reconcile_issues_is_idempotent() {
        let ctx = ctx();
        let pending = [
            FormData::from_pairs([
                ("intent", "update_issue"),
                ("id", "a"),
                ("projectId", "p1"),
                ("status", "3"),
                ("title", "Gears slip"),
            ]),
            FormData::from_pairs([
                ("intent", "create_issue"),
                ("id", "new"),
                ("projectId", "p1"),
                ("status", "1"),
                ("priority", "0"),
                ("title", "Boiler"),
            ]),
            FormData::from_pairs([("intent", "delete_issue"), ("id", "b"), ("projectId", "p1")]),
        ];
        let once = reconcile::<IssueIntent>(vec![item("a", "Gears"), item("b", "Levers")], &pending, &ctx);
        let twice = reconcile::<IssueIntent>(once.clone(), &pending, &ctx);
        assert_eq!(once, twice);
        assert_eq!(once[0].status, IssueStatus::InProgress);
        assert_eq!(once[0].title, "Gears slip");
    }

    #[test]
    fn test_parse_filter() {
        let query = FormData::parse("status=1&status=2&exclusive=status&sortBy=priority&order=asc&project=p1").unwrap();
        let filter = parse_filter(&query).unwrap();
        assert_eq!(filter.statuses, vec![1, 2]);
        assert!(filter.exclusive_status);
        assert!(!filter.exclusive_priority);
        assert_eq!(filter.sort_by, SortBy::Priority);
        assert_eq!(filter.order, SortOrder::Asc);
        assert_eq!(filter.projects, vec!["p1".to_string()]);

        assert_eq!(parse_filter(&FormData::default()).unwrap(), IssueFilter::default());
        for bad in ["status=7", "priority=x", "sortBy=title", "order=up", "exclusive=project"] {
            let query = FormData::parse(bad).unwrap();
            assert!(matches!(parse_filter(&query), Err(ApiError::BadRequest(_))), "{bad}");
        }
    }

    struct World {
        state: SharedState,
        ada_cookie: String,
        bob_cookie: String,
        engine: Project,
        loom: Project,
    }

    /// Ada owns "Engine", Bob owns "Loom"; neither belongs to the other's.
    fn world() -> World {
        let state = test_state();
        let (ada, ada_cookie) = sign_up(&state, "Ada");
        let (bob, bob_cookie) = sign_up(&state, "Bob");
        let engine = create_project(&state, &ada, "Engine");
        let loom = create_project(&state, &bob, "Loom");
        World {
            state,
            ada_cookie,
            bob_cookie,
            engine,
            loom,
        }
    }

    async fn create_issue(w: &World, cookie: &str, project: &Project, id: &str, title: &str, status: &str) {
        let response = send(
            app(&w.state),
            post_form(
                "/app/issues",
                Some(cookie),
                &[
                    ("intent", "create_issue"),
                    ("id", id),
                    ("projectId", project.id.as_str()),
                    ("status", status),
                    ("priority", "2"),
                    ("title", title),
                ],
            ),
        )
        .await;
        assert_eq!(body_json(response).await["status"], "success", "{title}");
    }

    #[tokio::test]
    async fn test_issues_are_scoped_to_membership() {
        let w = world();
        create_issue(&w, &w.ada_cookie, &w.engine, "i-ada", "Gears", "1").await;
        create_issue(&w, &w.bob_cookie, &w.loom, "i-bob", "Cards", "1").await;

        let json = body_json(send(app(&w.state), get_request("/app/issues", Some(&w.ada_cookie))).await).await;
        let issues = json["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["id"], "i-ada");
        assert_eq!(issues[0]["creator"], "Ada Tester");
        assert!(json["projects"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outsider_cannot_write_issues() {
        let w = world();
        create_issue(&w, &w.bob_cookie, &w.loom, "i-bob", "Cards", "1").await;

        let create = send(
            app(&w.state),
            post_form(
                "/app/issues",
                Some(&w.ada_cookie),
                &[
                    ("intent", "create_issue"),
                    ("projectId", w.loom.id.as_str()),
                    ("status", "1"),
                    ("priority", "0"),
                    ("title", "Intruder"),
                ],
            ),
        )
        .await;
        assert_eq!(create.status(), StatusCode::UNAUTHORIZED);

        let delete = send(
            app(&w.state),
            post_form(
                "/app/issues",
                Some(&w.ada_cookie),
                &[("intent", "delete_issue"), ("id", "i-bob"), ("projectId", w.loom.id.as_str())],
            ),
        )
        .await;
        assert_eq!(delete.status(), StatusCode::UNAUTHORIZED);
        assert!(w.state.db.lock_sync().unwrap().get_issue("i-bob").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_issue_must_belong_to_named_project() {
        let w = world();
        create_issue(&w, &w.bob_cookie, &w.loom, "i-bob", "Cards", "1").await;

        // Ada is a member of Engine, but the issue lives in Loom.
        for intent in ["delete_issue", "update_issue"] {
            let response = send(
                app(&w.state),
                post_form(
                    "/app/issues",
                    Some(&w.ada_cookie),
                    &[
                        ("intent", intent),
                        ("id", "i-bob"),
                        ("projectId", w.engine.id.as_str()),
                        ("title", "Hijacked"),
                    ],
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["toast"]["type"], "error");
        }
        let issue = w.state.db.lock_sync().unwrap().get_issue("i-bob").unwrap().unwrap();
        assert_eq!(issue.title, "Cards");
    }

    #[tokio::test]
    async fn test_update_merges_supplied_fields() {
        let w = world();
        create_issue(&w, &w.ada_cookie, &w.engine, "i1", "Gears", "1").await;

        let response = send(
            app(&w.state),
            post_form(
                "/app/issues",
                Some(&w.ada_cookie),
                &[
                    ("intent", "update_issue"),
                    ("id", "i1"),
                    ("projectId", w.engine.id.as_str()),
                    ("status", "3"),
                ],
            ),
        )
        .await;
        assert_eq!(body_json(response).await["status"], "success");

        let issue = w.state.db.lock_sync().unwrap().get_issue("i1").unwrap().unwrap();
        assert_eq!(issue.status, IssueStatus::InProgress);
        assert_eq!(issue.priority, IssuePriority::Medium);
        assert_eq!(issue.title, "Gears");
    }

    #[tokio::test]
    async fn test_filter_and_sort_through_query() {
        let w = world();
        create_issue(&w, &w.ada_cookie, &w.engine, "i1", "Backlog one", "1").await;
        create_issue(&w, &w.ada_cookie, &w.engine, "i2", "Done one", "4").await;
        create_issue(&w, &w.ada_cookie, &w.engine, "i3", "Todo one", "2").await;

        let ids = |json: serde_json::Value| -> Vec<String> {
            json["issues"]
                .as_array()
                .unwrap()
                .iter()
                .map(|i| i["id"].as_str().unwrap().to_string())
                .collect()
        };

        let json = body_json(
            send(app(&w.state), get_request("/app/issues?status=4&exclusive=status&sortBy=status&order=asc", Some(&w.ada_cookie))).await,
        )
        .await;
        assert_eq!(ids(json), vec!["i1", "i3"]);

        let uri = format!("/app/issues?status=4&project={}", w.engine.id);
        let json = body_json(send(app(&w.state), get_request(&uri, Some(&w.ada_cookie))).await).await;
        assert_eq!(json["projects"][0]["id"], w.engine.id.as_str());
        assert_eq!(ids(json), vec!["i2"]);

        let json = body_json(send(app(&w.state), get_request("/app/issues", Some(&w.ada_cookie))).await).await;
        assert_eq!(ids(json), vec!["i3", "i2", "i1"]);
    }

    #[tokio::test]
    async fn test_invalid_query_is_bad_request() {
        let w = world();
        let response = send(app(&w.state), get_request("/app/issues?sortBy=title", Some(&w.ada_cookie))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
