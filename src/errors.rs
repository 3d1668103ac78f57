//! Typed error hierarchy for Lunear.
//!
//! Three top-level enums cover the three layers below the HTTP surface:
//! - `DataError`: Data Access Layer failures (the error half of every query)
//! - `AuthError`: password hashing and session token failures
//! - `ConfigError`: configuration file and environment parsing failures
//!
//! Route handlers translate these into `ApiError` responses or toast
//! notifications; see `tracker::routes`.

use thiserror::Error;

/// Errors from the Data Access Layer.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Username already taken")]
    UserNameTaken,

    #[error("User is already a member of this project")]
    AlreadyMember,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Only the project owner can delete project {id}")]
    NotOwner { id: String },

    #[error("The project owner must remain an admin member")]
    OwnerMembership,

    #[error("Failed to create {entity}")]
    NotCreated { entity: &'static str },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Database task failed: {0}")]
    TaskFailed(String),
}

impl DataError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True when the failure is a business-rule rejection the user can act on,
    /// as opposed to a storage fault.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::LockPoisoned | Self::TaskFailed(_)
        )
    }
}

/// Errors from password hashing and session handling.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to hash password: {0}")]
    Hash(String),

    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(String),

    #[error("Password task failed: {0}")]
    TaskFailed(String),
}

/// Errors while assembling the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    ParseFailed {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to load .env file: {source}")]
    EnvFile {
        #[source]
        source: dotenvy::Error,
    },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Unsupported database URL '{0}': only local SQLite files are supported")]
    UnsupportedDatabase(String),
}
