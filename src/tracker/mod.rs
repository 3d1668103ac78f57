//! Lunear tracker: multi-tenant issue tracking over HTTP.
//!
//! ## Overview
//!
//! Users sign up, create projects, invite other users as ADMIN or MEMBER,
//! and file issues with comments inside those projects. Every read is
//! scoped to the projects the caller belongs to. Writes arrive as
//! URL-encoded forms carrying an `intent` field; each route dispatches on it.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │ Browser  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    ├─ middleware.rs  (CSRF, session cookie)      │
//! └──────────┘  cookie  │    └─ routes/*  (loaders + intent actions)       │
//!                       │         │                                        │
//!                       │         │ guard.rs  (CurrentUser, membership)    │
//!                       │         │ forms.rs  (FormData → intent enums)    │
//!                       │         v                                        │
//!                       │  db.rs  (TrackerDb over rusqlite, DbHandle)      │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                             |
//! |-------------|------------------------------------------------------------|
//! | `models`    | Entities, enums and the projections the routes return      |
//! | `auth`      | Argon2 passwords, session tokens, cookie strings, theme    |
//! | `api`       | `AppState`, `ApiError`, `ActionOutcome` (success / toast)  |
//! | `reconcile` | Folds pending form submissions into confirmed rows         |
//!
//! ## Typical Request Flow (create an issue)
//!
//! 1. `POST /app/issues` passes `csrf_middleware` (Origin must match Host).
//! 2. `session_middleware` resolves the `auth_session` cookie into an
//!    `Identity`, refreshing the session when it is close to expiry.
//! 3. The action parses `intent=create_issue` into `IssueIntent::Create`,
//!    answering 422 with field errors when the form is invalid.
//! 4. `ensure_member` checks the caller belongs to `projectId` (401 if not).
//! 5. `TrackerDb::create_issue` inserts the row; a rejected write comes
//!    back as an error toast, success as `{"status":"success"}`.

pub mod api;
pub mod auth;
pub mod db;
pub mod forms;
pub mod guard;
pub mod middleware;
pub mod models;
pub mod reconcile;
pub mod routes;
pub mod server;
