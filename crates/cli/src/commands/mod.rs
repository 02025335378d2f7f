pub mod migrate;
pub mod seed;

use secrecy::SecretString;

/// Read `DATABASE_URL`, loading `.env` first if present.
fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("DATABASE_URL"))
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0} validation errors found")]
    Invalid(usize),
}
