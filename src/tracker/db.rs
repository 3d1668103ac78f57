use std::path::Path;
use std::sync::Arc;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params, params_from_iter};
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use crate::errors::DataError;

/// Current UTC time with millisecond precision, as stored in every
/// `*_at` text column.
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Async-safe handle to the tracker database.
///
/// Wraps `TrackerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TrackerDb>>,
}

impl DbHandle {
    pub fn new(db: TrackerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, DataError>
    where
        F: FnOnce(&TrackerDb) -> Result<R, DataError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| DataError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| DataError::TaskFailed(e.to_string()))?
    }

    /// Acquire the database mutex synchronously. Only for startup work and
    /// tests; never from a request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, TrackerDb>, DataError> {
        self.inner.lock().map_err(|_| DataError::LockPoisoned)
    }
}

pub struct TrackerDb {
    conn: Connection,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ── Column conversions ────────────────────────────────────────────────

impl ToSql for IssueStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for IssueStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        IssueStatus::try_from(code).map_err(|_| FromSqlError::OutOfRange(code))
    }
}

impl ToSql for IssuePriority {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for IssuePriority {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        IssuePriority::try_from(code).map_err(|_| FromSqlError::OutOfRange(code))
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        user_name: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        password_hash: row.get(4)?,
    })
}

fn public_user_from_row(row: &Row<'_>) -> rusqlite::Result<PublicUser> {
    Ok(PublicUser {
        id: row.get(0)?,
        user_name: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectMember> {
    Ok(ProjectMember {
        user_id: row.get(0)?,
        project_id: row.get(1)?,
        role: row.get(2)?,
        invited_by: row.get(3)?,
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        project_id: row.get(1)?,
        created_by: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        created_by: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const USER_COLUMNS: &str = "id, username, first_name, last_name, password";
const PROJECT_COLUMNS: &str = "id, name, description, created_by, created_at, updated_at";
const ISSUE_COLUMNS: &str =
    "id, project_id, created_by, title, description, status, priority, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, issue_id, created_by, content, created_at, updated_at";

impl TrackerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, DataError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self, DataError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), DataError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<(), DataError> {
        self.conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY NOT NULL,
                username TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                password TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS username_idx ON users(username);

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_by TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL DEFAULT ({now}),
                updated_at TEXT NOT NULL DEFAULT ({now})
            );

            CREATE TABLE IF NOT EXISTS project_members (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                role TEXT NOT NULL DEFAULT 'MEMBER' CHECK (role IN ('ADMIN', 'MEMBER')),
                invited_by TEXT REFERENCES users(id),
                PRIMARY KEY (user_id, project_id)
            );
            CREATE INDEX IF NOT EXISTS idx_project_members_project ON project_members(project_id);

            CREATE TABLE IF NOT EXISTS issues (
                id TEXT PRIMARY KEY NOT NULL,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                created_by TEXT NOT NULL REFERENCES users(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT ({now}),
                updated_at TEXT NOT NULL DEFAULT ({now})
            );
            CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY NOT NULL,
                issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                created_by TEXT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT ({now}),
                updated_at TEXT NOT NULL DEFAULT ({now})
            );
            CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id);
            ",
            now = NOW
        ))?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, new: &NewUser) -> Result<PublicUser, DataError> {
        let id = new_id();
        let inserted = self.conn.execute(
            "INSERT INTO users (id, username, first_name, last_name, password) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, new.user_name, new.first_name, new.last_name, new.password_hash],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Err(DataError::UserNameTaken),
            Err(e) => return Err(e.into()),
        }
        Ok(PublicUser {
            id,
            user_name: new.user_name.clone(),
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>, DataError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_username(&self, user_name: &str) -> Result<Option<User>, DataError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![user_name],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Users whose first name contains `q`. With `exclude_members_of`, users
    /// already in that project are left out.
    pub fn search_users(
        &self,
        q: &str,
        exclude_members_of: Option<&str>,
    ) -> Result<Vec<PublicUser>, DataError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, username, first_name, last_name FROM users
             WHERE first_name LIKE ?1
               AND (?2 IS NULL OR NOT EXISTS (
                   SELECT 1 FROM project_members pm
                   WHERE pm.project_id = ?2 AND pm.user_id = users.id
               ))
             ORDER BY first_name, last_name",
        )?;
        let pattern = format!("%{}%", q);
        let rows = stmt.query_map(params![pattern, exclude_members_of], public_user_from_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn insert_session(&self, session: &Session) -> Result<(), DataError> {
        self.conn.execute(
            "INSERT INTO sessions (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.id, session.user_id, session.expires_at],
        )?;
        Ok(())
    }

    pub fn get_session_with_user(&self, id: &str) -> Result<Option<(Session, User)>, DataError> {
        let found = self
            .conn
            .query_row(
                "SELECT s.id, s.user_id, s.expires_at,
                        u.id, u.username, u.first_name, u.last_name, u.password
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.id = ?1",
                params![id],
                |row| {
                    let session = Session {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: row.get(2)?,
                    };
                    let user = User {
                        id: row.get(3)?,
                        user_name: row.get(4)?,
                        first_name: row.get(5)?,
                        last_name: row.get(6)?,
                        password_hash: row.get(7)?,
                    };
                    Ok((session, user))
                },
            )
            .optional()?;
        Ok(found)
    }

    pub fn update_session_expiry(&self, id: &str, expires_at: i64) -> Result<(), DataError> {
        self.conn.execute(
            "UPDATE sessions SET expires_at = ?1 WHERE id = ?2",
            params![expires_at, id],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, id: &str) -> Result<bool, DataError> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    pub fn delete_expired_sessions(&self, now: i64) -> Result<usize, DataError> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
        Ok(count)
    }

    // ── Projects ──────────────────────────────────────────────────────

    /// Insert the project and the creator's ADMIN membership atomically.
    pub fn create_project(&self, new: &NewProject, creator_id: &str) -> Result<Project, DataError> {
        let id = new.id.clone().unwrap_or_else(new_id);

        // unchecked_transaction: DbHandle's Mutex already guarantees
        // single-threaded access to the connection.
        let tx = self.conn.unchecked_transaction()?;

        let inserted: Option<String> = tx
            .query_row(
                "INSERT INTO projects (id, name, description, created_by) VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![id, new.name, new.description.as_deref().unwrap_or(""), creator_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(project_id) = inserted else {
            // Dropping `tx` rolls back.
            return Err(DataError::NotCreated { entity: "project" });
        };

        tx.execute(
            "INSERT INTO project_members (user_id, project_id, role, invited_by) VALUES (?1, ?2, ?3, NULL)",
            params![creator_id, project_id, Role::Admin],
        )?;
        tx.commit()?;

        debug!(project_id = %project_id, creator_id, "project created");
        self.get_project(&project_id)?
            .ok_or_else(|| DataError::not_found("Project", project_id))
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>, DataError> {
        let project = self
            .conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    /// Projects the user belongs to, with their role and issue counters,
    /// oldest first.
    pub fn list_projects_for_user(&self, user_id: &str) -> Result<Vec<ProjectSummary>, DataError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.created_by, p.name, p.description, pm.role,
                    COUNT(CASE WHEN i.status <> ?2 THEN 1 END) AS total_issues_count,
                    COUNT(CASE WHEN i.status = ?3 THEN 1 END) AS done_issues_count
             FROM projects p
             JOIN project_members pm ON pm.project_id = p.id
             LEFT JOIN issues i ON i.project_id = p.id
             WHERE pm.user_id = ?1
             GROUP BY p.id
             ORDER BY p.created_at, p.rowid",
        )?;
        let rows = stmt.query_map(
            params![user_id, IssueStatus::Canceled, IssueStatus::Done],
            |row| {
                Ok(ProjectSummary {
                    id: row.get(0)?,
                    created_by: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    role: row.get(4)?,
                    total_issues_count: row.get(5)?,
                    done_issues_count: row.get(6)?,
                })
            },
        )?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    /// Project settings view: the project and its members with names.
    pub fn get_project_with_members(&self, id: &str) -> Result<Option<ProjectDetail>, DataError> {
        let Some(project) = self.get_project(id)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT pm.user_id, pm.role, u.first_name, u.last_name
             FROM project_members pm JOIN users u ON u.id = pm.user_id
             WHERE pm.project_id = ?1
             ORDER BY pm.rowid",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(MemberView {
                user_id: row.get(0)?,
                role: row.get(1)?,
                user: MemberName {
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                },
            })
        })?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }

        Ok(Some(ProjectDetail {
            name: project.name,
            description: project.description,
            created_by: project.created_by,
            created_at: project.created_at,
            updated_at: project.updated_at,
            members,
        }))
    }

    pub fn update_project(&self, id: &str, changes: &ProjectChanges) -> Result<Project, DataError> {
        let count = self.conn.execute(
            &format!(
                "UPDATE projects
                 SET name = COALESCE(?1, name),
                     description = COALESCE(?2, description),
                     updated_at = {NOW}
                 WHERE id = ?3"
            ),
            params![changes.name, changes.description, id],
        )?;
        if count == 0 {
            return Err(DataError::not_found("Project", id));
        }
        self.get_project(id)?
            .ok_or_else(|| DataError::not_found("Project", id))
    }

    /// Delete a project; only its creator may do so. Issues, comments and
    /// memberships cascade.
    pub fn delete_project(&self, id: &str, requester_id: &str) -> Result<(), DataError> {
        let project = self
            .get_project(id)?
            .ok_or_else(|| DataError::not_found("Project", id))?;
        if project.created_by != requester_id {
            return Err(DataError::NotOwner { id: id.to_string() });
        }
        self.conn.execute(
            "DELETE FROM projects WHERE id = ?1 AND created_by = ?2",
            params![id, requester_id],
        )?;
        Ok(())
    }

    /// Member projects whose name contains `q`, newest first, at most five.
    pub fn search_projects(&self, user_id: &str, q: &str) -> Result<Vec<ProjectOption>, DataError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name FROM projects p
             JOIN project_members pm ON pm.project_id = p.id
             WHERE pm.user_id = ?1 AND p.name LIKE ?2
             ORDER BY p.created_at DESC, p.rowid DESC
             LIMIT 5",
        )?;
        let pattern = format!("%{}%", q);
        let rows = stmt.query_map(params![user_id, pattern], |row| {
            Ok(ProjectOption {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    /// Options for the issues project filter: selected projects first, then
    /// the newest others, limited to `max(selected.len(), 2)`.
    pub fn projects_for_filter(
        &self,
        user_id: &str,
        selected: &[String],
    ) -> Result<Vec<ProjectOption>, DataError> {
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; selected.len()].join(", ");
        let sql = format!(
            "SELECT p.id, p.name FROM projects p
             JOIN project_members pm ON pm.project_id = p.id
             WHERE pm.user_id = ?
             ORDER BY (p.id IN ({placeholders})) DESC, p.created_at DESC, p.rowid DESC
             LIMIT ?"
        );
        let mut values: Vec<Value> = vec![Value::Text(user_id.to_string())];
        values.extend(selected.iter().cloned().map(Value::Text));
        values.push(Value::Integer(selected.len().max(2) as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(ProjectOption {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    // ── Members ───────────────────────────────────────────────────────

    pub fn get_member(&self, project_id: &str, user_id: &str) -> Result<Option<ProjectMember>, DataError> {
        let member = self
            .conn
            .query_row(
                "SELECT user_id, project_id, role, invited_by FROM project_members
                 WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                member_from_row,
            )
            .optional()?;
        Ok(member)
    }

    pub fn add_member(
        &self,
        project_id: &str,
        user_id: &str,
        invited_by: &str,
    ) -> Result<ProjectMember, DataError> {
        if self.get_member(project_id, user_id)?.is_some() {
            return Err(DataError::AlreadyMember);
        }
        if self.get_user(user_id)?.is_none() {
            return Err(DataError::not_found("User", user_id));
        }
        if self.get_project(project_id)?.is_none() {
            return Err(DataError::not_found("Project", project_id));
        }
        let inserted = self.conn.execute(
            "INSERT INTO project_members (user_id, project_id, role, invited_by) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, project_id, Role::Member, invited_by],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Err(DataError::AlreadyMember),
            Err(e) => return Err(e.into()),
        }
        self.get_member(project_id, user_id)?
            .ok_or_else(|| DataError::not_found("Member", user_id))
    }

    fn ensure_not_owner(&self, project_id: &str, user_id: &str) -> Result<(), DataError> {
        let project = self
            .get_project(project_id)?
            .ok_or_else(|| DataError::not_found("Project", project_id))?;
        if project.created_by == user_id {
            return Err(DataError::OwnerMembership);
        }
        Ok(())
    }

    pub fn update_member_role(
        &self,
        project_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<ProjectMember, DataError> {
        if role != Role::Admin {
            self.ensure_not_owner(project_id, user_id)?;
        }
        let count = self.conn.execute(
            "UPDATE project_members SET role = ?1 WHERE project_id = ?2 AND user_id = ?3",
            params![role, project_id, user_id],
        )?;
        if count == 0 {
            return Err(DataError::not_found("Member", user_id));
        }
        self.get_member(project_id, user_id)?
            .ok_or_else(|| DataError::not_found("Member", user_id))
    }

    pub fn remove_member(&self, project_id: &str, user_id: &str) -> Result<(), DataError> {
        self.ensure_not_owner(project_id, user_id)?;
        let count = self.conn.execute(
            "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;
        if count == 0 {
            return Err(DataError::not_found("Member", user_id));
        }
        Ok(())
    }

    // ── Issues ────────────────────────────────────────────────────────

    pub fn create_issue(&self, new: &NewIssue) -> Result<Issue, DataError> {
        let id = new.id.clone().unwrap_or_else(new_id);
        self.conn.execute(
            "INSERT INTO issues (id, project_id, created_by, title, description, status, priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                new.project_id,
                new.created_by,
                new.title,
                new.description.as_deref().unwrap_or(""),
                new.status,
                new.priority
            ],
        )?;
        self.get_issue(&id)?
            .ok_or_else(|| DataError::not_found("Issue", id))
    }

    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>, DataError> {
        let issue = self
            .conn
            .query_row(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
                params![id],
                issue_from_row,
            )
            .optional()?;
        Ok(issue)
    }

    /// Issues across every project the user belongs to, filtered and sorted.
    pub fn list_issues(&self, user_id: &str, filter: &IssueFilter) -> Result<Vec<IssueListItem>, DataError> {
        let mut sql = String::from(
            "SELECT i.id, i.created_at, i.project_id, i.priority, i.status, i.title,
                    u.first_name || ' ' || u.last_name
             FROM issues i
             JOIN users u ON u.id = i.created_by
             JOIN project_members pm ON pm.project_id = i.project_id
             WHERE pm.user_id = ?",
        );
        let mut values: Vec<Value> = vec![Value::Text(user_id.to_string())];

        let mut push_in = |sql: &mut String, column: &str, negate: bool, items: Vec<Value>| {
            let placeholders = vec!["?"; items.len()].join(", ");
            let op = if negate { "NOT IN" } else { "IN" };
            sql.push_str(&format!(" AND {column} {op} ({placeholders})"));
            values.extend(items);
        };

        if !filter.statuses.is_empty() {
            push_in(
                &mut sql,
                "i.status",
                filter.exclusive_status,
                filter.statuses.iter().copied().map(Value::Integer).collect(),
            );
        }
        if !filter.priorities.is_empty() {
            push_in(
                &mut sql,
                "i.priority",
                filter.exclusive_priority,
                filter.priorities.iter().copied().map(Value::Integer).collect(),
            );
        }
        if !filter.projects.is_empty() {
            push_in(
                &mut sql,
                "i.project_id",
                false,
                filter.projects.iter().cloned().map(Value::Text).collect(),
            );
        }

        let direction = filter.order.as_sql();
        sql.push_str(&format!(
            " ORDER BY {} {direction}, i.rowid {direction}",
            filter.sort_by.column()
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(IssueListItem {
                id: row.get(0)?,
                created_at: row.get(1)?,
                project_id: row.get(2)?,
                priority: row.get(3)?,
                status: row.get(4)?,
                title: row.get(5)?,
                creator: row.get(6)?,
            })
        })?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Issue detail as seen by `user_id`; `None` when the issue does not
    /// exist or the user is not a member of its project.
    pub fn get_issue_for_member(&self, issue_id: &str, user_id: &str) -> Result<Option<IssueDetail>, DataError> {
        let detail = self
            .conn
            .query_row(
                "SELECT i.title, i.description, i.status, i.priority,
                        p.id, p.name, pm.role,
                        u.first_name || ' ' || u.last_name
                 FROM issues i
                 JOIN project_members pm ON pm.project_id = i.project_id
                 JOIN projects p ON p.id = i.project_id
                 JOIN users u ON u.id = i.created_by
                 WHERE i.id = ?1 AND pm.user_id = ?2",
                params![issue_id, user_id],
                |row| {
                    Ok(IssueDetail {
                        title: row.get(0)?,
                        description: row.get(1)?,
                        status: row.get(2)?,
                        priority: row.get(3)?,
                        project: IssueProject {
                            id: row.get(4)?,
                            name: row.get(5)?,
                            role: row.get(6)?,
                        },
                        creator: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(detail)
    }

    /// Apply only the supplied fields; everything else is preserved.
    pub fn update_issue(&self, id: &str, changes: &IssueChanges) -> Result<Issue, DataError> {
        let count = self.conn.execute(
            &format!(
                "UPDATE issues
                 SET title = COALESCE(?1, title),
                     description = COALESCE(?2, description),
                     status = COALESCE(?3, status),
                     priority = COALESCE(?4, priority),
                     project_id = COALESCE(?5, project_id),
                     updated_at = {NOW}
                 WHERE id = ?6"
            ),
            params![
                changes.title,
                changes.description,
                changes.status,
                changes.priority,
                changes.project_id,
                id
            ],
        )?;
        if count == 0 {
            return Err(DataError::not_found("Issue", id));
        }
        self.get_issue(id)?
            .ok_or_else(|| DataError::not_found("Issue", id))
    }

    /// Delete an issue (comments cascade). With `project_id`, the issue must
    /// also belong to that project.
    pub fn delete_issue(&self, id: &str, project_id: Option<&str>) -> Result<(), DataError> {
        let count = self.conn.execute(
            "DELETE FROM issues WHERE id = ?1 AND (?2 IS NULL OR project_id = ?2)",
            params![id, project_id],
        )?;
        if count == 0 {
            return Err(DataError::not_found("Issue", id));
        }
        Ok(())
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub fn create_comment(&self, new: &NewComment) -> Result<Comment, DataError> {
        let id = new.id.clone().unwrap_or_else(new_id);
        self.conn.execute(
            "INSERT INTO comments (id, issue_id, created_by, content) VALUES (?1, ?2, ?3, ?4)",
            params![id, new.issue_id, new.created_by, new.content],
        )?;
        self.get_comment(&id)?
            .ok_or_else(|| DataError::not_found("Comment", id))
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<Comment>, DataError> {
        let comment = self
            .conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                params![id],
                comment_from_row,
            )
            .optional()?;
        Ok(comment)
    }

    /// Comments on an issue visible to `user_id`, newest first.
    pub fn list_comments(&self, issue_id: &str, user_id: &str) -> Result<Vec<CommentView>, DataError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.content, c.created_by, u.first_name || ' ' || u.last_name
             FROM comments c
             JOIN users u ON u.id = c.created_by
             JOIN issues i ON i.id = c.issue_id
             JOIN project_members pm ON pm.project_id = i.project_id
             WHERE c.issue_id = ?1 AND pm.user_id = ?2
             ORDER BY c.created_at DESC, c.rowid DESC",
        )?;
        let rows = stmt.query_map(params![issue_id, user_id], |row| {
            Ok(CommentView {
                id: row.get(0)?,
                content: row.get(1)?,
                created_by: row.get(2)?,
                creator: row.get(3)?,
            })
        })?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    pub fn delete_comment(&self, id: &str) -> Result<(), DataError> {
        let count = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])?;
        if count == 0 {
            return Err(DataError::not_found("Comment", id));
        }
        Ok(())
    }
}
