//! `/app/projects/{project_id}`: project settings and membership, for admins.

use axum::{
    Json, Router,
    extract::{Path, RawForm, State},
    routing::get,
};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use super::{form_from_body, parse_intent};
use crate::tracker::api::{ActionOutcome, ApiError, SharedState};
use crate::tracker::forms::{FieldErrors, Fields, FormData, IntentForm, unknown_intent};
use crate::tracker::guard::{CurrentUser, GuardError, ensure_admin, require_admin};
use crate::tracker::models::{MemberName, MemberView, ProjectChanges, ProjectDetail, ProjectMember, Role};
use crate::tracker::reconcile::{Optimistic, ReconcileContext};

pub fn router() -> Router<SharedState> {
    Router::new().route(
        "/app/projects/{project_id}",
        get(settings_loader).post(settings_action),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsIntent {
    UpdateProject {
        name: String,
        description: Option<String>,
    },
    AddNewMember {
        user_id: String,
        invited_by: Option<String>,
        first_name: Option<String>,
        last_name: Option<String>,
    },
    UpdateMemberRole {
        user_id: String,
        role: Role,
    },
    RemoveMember {
        user_id: String,
    },
}

impl IntentForm for SettingsIntent {
    fn parse(form: &FormData) -> Result<Self, FieldErrors> {
        let mut f = Fields::new(form);
        match form.get("intent") {
            Some("update_project") => {
                let intent = SettingsIntent::UpdateProject {
                    name: f.required("name"),
                    description: f.optional("description"),
                };
                f.finish(intent)
            }
            Some("add_new_member") => {
                let intent = SettingsIntent::AddNewMember {
                    user_id: f.required("userId"),
                    invited_by: f.optional("invitedBy"),
                    first_name: f.optional("firstName"),
                    last_name: f.optional("lastName"),
                };
                f.finish(intent)
            }
            Some("update_member_role") => {
                let user_id = f.required("userId");
                match f.required_parsed::<Role>("role") {
                    Some(role) => f.finish(SettingsIntent::UpdateMemberRole { user_id, role }),
                    None => Err(f.into_errors()),
                }
            }
            Some("remove_member") => {
                let intent = SettingsIntent::RemoveMember {
                    user_id: f.required("userId"),
                };
                f.finish(intent)
            }
            _ => Err(unknown_intent(form)),
        }
    }
}

/// Pending submissions folded into the member list.
impl Optimistic for SettingsIntent {
    type Row = MemberView;

    fn key(row: &MemberView) -> &str {
        &row.user_id
    }

    fn apply(self, rows: &mut IndexMap<String, MemberView>, _ctx: &ReconcileContext) {
        match self {
            SettingsIntent::AddNewMember {
                user_id,
                first_name: Some(first_name),
                last_name: Some(last_name),
                ..
            } => {
                rows.insert(
                    user_id.clone(),
                    MemberView {
                        user_id,
                        role: Role::Member,
                        user: MemberName {
                            first_name,
                            last_name,
                        },
                    },
                );
            }
            SettingsIntent::AddNewMember { .. } => {}
            SettingsIntent::UpdateMemberRole { user_id, role } => {
                if let Some(member) = rows.get_mut(&user_id) {
                    member.role = role;
                }
            }
            SettingsIntent::RemoveMember { user_id } => {
                rows.shift_remove(&user_id);
            }
            SettingsIntent::UpdateProject { .. } => {}
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsData {
    project_id: String,
    project: ProjectDetail,
    project_member: ProjectMember,
}

async fn settings_loader(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(project_id): Path<String>,
) -> Result<Json<SettingsData>, ApiError> {
    let user_id = current.user.id;
    let id = project_id.clone();
    let loaded = state
        .db
        .call(move |db| {
            let member = match require_admin(db, &id, &user_id) {
                Ok(member) => member,
                Err(GuardError::Denied) => return Ok(None),
                Err(GuardError::Data(e)) => return Err(e),
            };
            Ok(db.get_project_with_members(&id)?.map(|project| (project, member)))
        })
        .await?;

    let Some((project, project_member)) = loaded else {
        return Err(ApiError::NotFound(format!("Project {} not found", project_id)));
    };
    Ok(Json(SettingsData {
        project_id,
        project,
        project_member,
    }))
}

async fn settings_action(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(project_id): Path<String>,
    RawForm(body): RawForm,
) -> Result<ActionOutcome, ApiError> {
    let user_id = current.user.id;
    ensure_admin(&state.db, &project_id, &user_id).await?;

    let form = form_from_body(&body)?;
    let intent: SettingsIntent = parse_intent(&form)?;

    let result = match intent {
        SettingsIntent::UpdateProject { name, description } => {
            let changes = ProjectChanges {
                name: Some(name),
                description,
            };
            state
                .db
                .call(move |db| db.update_project(&project_id, &changes).map(|_| ()))
                .await
        }
        SettingsIntent::AddNewMember {
            user_id: member_id,
            invited_by,
            ..
        } => {
            let invited_by = invited_by.unwrap_or(user_id);
            let result = state
                .db
                .call(move |db| db.add_member(&project_id, &member_id, &invited_by))
                .await;
            if let Ok(member) = &result {
                info!(project_id = %member.project_id, user_id = %member.user_id, "member added");
            }
            result.map(|_| ())
        }
        SettingsIntent::UpdateMemberRole {
            user_id: member_id,
            role,
        } => {
            state
                .db
                .call(move |db| db.update_member_role(&project_id, &member_id, role).map(|_| ()))
                .await
        }
        SettingsIntent::RemoveMember { user_id: member_id } => {
            state
                .db
                .call(move |db| db.remove_member(&project_id, &member_id))
                .await
        }
    };
    Ok(ActionOutcome::from_result(result))
}
