use std::collections::HashSet;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use time::OffsetDateTime;
use tracing::info;

/// A forward-only schema change.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// A migration as recorded in `schema_migrations`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMigration {
    pub version: u32,
    pub description: String,
    pub applied_at: i64,
}

impl Migration {
    pub const fn new(version: u32, description: &'static str, up: &'static str) -> Self {
        Self {
            version,
            description,
            up,
        }
    }

    /// Runs the script and records the version in one transaction.
    fn apply(&self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction()?;
        tx.execute_batch(self.up)
            .with_context(|| format!("Migration {} failed", self.version))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?1, ?2, ?3)",
            params![
                self.version,
                OffsetDateTime::now_utc().unix_timestamp(),
                self.description
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Every migration, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "Knowledge base: solutions table with embeddings",
        include_str!("migrations/001_solutions.sql"),
    ),
    Migration::new(
        2,
        "Feedback records and routed response log",
        include_str!("migrations/002_feedback_and_responses.sql"),
    ),
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL,
    description TEXT
)";

/// Brings the schema up to date. Safe to call on every open.
pub fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(TRACKING_TABLE)?;

    let applied: HashSet<u32> = {
        let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
        let versions = stmt.query_map([], |row| row.get(0))?;
        versions.collect::<Result<_, _>>()?
    };

    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        migration.apply(conn)?;
        info!(
            version = migration.version,
            description = migration.description,
            "applied migration"
        );
    }
    Ok(())
}

/// Lists applied migrations, oldest first.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    let mut stmt = conn.prepare(
        "SELECT version, COALESCE(description, ''), applied_at FROM schema_migrations ORDER BY version",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AppliedMigration {
            version: row.get(0)?,
            description: row.get(1)?,
            applied_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
