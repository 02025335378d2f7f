//! Database migration command.
//!
//! Applies the migrations in `crates/server/migrations/` to the database at
//! `DATABASE_URL`. The server never migrates on startup.

use tracing::info;

use shopwright_server::db;

use super::{CommandError, database_url};

/// Run database migrations.
///
/// # Errors
///
/// Returns an error if `DATABASE_URL` is missing, the connection fails, or a
/// migration fails.
pub async fn run() -> Result<(), CommandError> {
    let database_url = database_url()?;

    info!("Connecting to database...");
    let pool = db::create_pool(&database_url).await?;

    info!("Running migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    pool.close().await;
    info!("Migrations complete!");
    Ok(())
}
