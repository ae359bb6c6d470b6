use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid database connection settings: {0}")]
    ConnectionConfigError(String),

    #[error("Database operation failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Column '{column}' holds an unreadable value: {reason}")]
    Decode { column: String, reason: String },

    #[error("The requested data was not found in the database: {0}")]
    NotFound(String),
}

impl From<core_types::CoreError> for DbError {
    fn from(err: core_types::CoreError) -> Self {
        DbError::Decode {
            column: "enum".to_string(),
            reason: err.to_string(),
        }
    }
}
