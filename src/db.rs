//! SQLite connections for index snapshots.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open a snapshot database.
///
/// With `create = false` the file must already exist and is opened
/// read-only. Rollback journaling keeps each snapshot in a single file so
/// its directory can be renamed as a unit.
pub async fn connect(db_path: &Path, create: bool) -> Result<SqlitePool> {
    if create {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(create)
        .read_only(!create);
    if create {
        options = options.journal_mode(SqliteJournalMode::Delete);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}
