//! `/app/projects`: the caller's project cards.

use axum::{
    Json, Router,
    extract::{RawForm, State},
    routing::get,
};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use super::{form_from_body, parse_intent};
use crate::tracker::api::{ActionOutcome, ApiError, SharedState};
use crate::tracker::forms::{FieldErrors, Fields, FormData, IntentForm, unknown_intent};
use crate::tracker::guard::{CurrentUser, ensure_admin};
use crate::tracker::models::{NewProject, ProjectChanges, ProjectSummary, Role};
use crate::tracker::reconcile::{Optimistic, ReconcileContext};

pub fn router() -> Router<SharedState> {
    Router::new().route("/app/projects", get(projects_loader).post(projects_action))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectIntent {
    Create { id: Option<String>, name: String },
    Delete { id: String },
    Update { id: String, name: Option<String> },
}

impl IntentForm for ProjectIntent {
    fn parse(form: &FormData) -> Result<Self, FieldErrors> {
        let mut f = Fields::new(form);
        match form.get("intent") {
            Some("create_project") => {
                let intent = ProjectIntent::Create {
                    id: f.optional("id"),
                    name: f.required("name"),
                };
                f.finish(intent)
            }
            Some("delete_project") => {
                let intent = ProjectIntent::Delete { id: f.required("id") };
                f.finish(intent)
            }
            Some("update_project") => {
                let intent = ProjectIntent::Update {
                    id: f.required("id"),
                    name: f.optional("name"),
                };
                f.finish(intent)
            }
            _ => Err(unknown_intent(form)),
        }
    }
}

impl Optimistic for ProjectIntent {
    type Row = ProjectSummary;

    fn key(row: &ProjectSummary) -> &str {
        &row.id
    }

    fn apply(self, rows: &mut IndexMap<String, ProjectSummary>, ctx: &ReconcileContext) {
        match self {
            ProjectIntent::Create { id: Some(id), name } => {
                rows.insert(
                    id.clone(),
                    ProjectSummary {
                        id,
                        created_by: ctx.viewer.id.clone(),
                        name,
                        description: String::new(),
                        role: Role::Admin,
                        total_issues_count: 0,
                        done_issues_count: 0,
                    },
                );
            }
            ProjectIntent::Create { id: None, .. } => {}
            ProjectIntent::Delete { id } => {
                rows.shift_remove(&id);
            }
            ProjectIntent::Update { id, name } => {
                if let (Some(project), Some(name)) = (rows.get_mut(&id), name) {
                    project.name = name;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct ProjectsData {
    projects: Vec<ProjectSummary>,
}

async fn projects_loader(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<Json<ProjectsData>, ApiError> {
    let user_id = current.user.id;
    let projects = state
        .db
        .call(move |db| db.list_projects_for_user(&user_id))
        .await?;
    Ok(Json(ProjectsData { projects }))
}

async fn projects_action(
    State(state): State<SharedState>,
    current: CurrentUser,
    RawForm(body): RawForm,
) -> Result<ActionOutcome, ApiError> {
    let form = form_from_body(&body)?;
    let intent: ProjectIntent = parse_intent(&form)?;
    let user_id = current.user.id;

    let outcome = match intent {
        ProjectIntent::Create { id, name } => {
            let new = NewProject {
                id,
                name,
                description: None,
            };
            let result = state
                .db
                .call(move |db| db.create_project(&new, &user_id))
                .await;
            if let Ok(project) = &result {
                info!(project_id = %project.id, "project created");
            }
            ActionOutcome::from_result(result)
        }
        ProjectIntent::Delete { id } => {
            let result = state
                .db
                .call(move |db| db.delete_project(&id, &user_id))
                .await;
            ActionOutcome::from_result(result)
        }
        ProjectIntent::Update { id, name } => {
            ensure_admin(&state.db, &id, &user_id).await?;
            let changes = ProjectChanges {
                name,
                description: None,
            };
            let result = state
                .db
                .call(move |db| db.update_project(&id, &changes))
                .await;
            ActionOutcome::from_result(result)
        }
    };
    Ok(outcome)
}
