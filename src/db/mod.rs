mod migration;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;

pub use migration::{AppliedMigration, MIGRATIONS, Migration};

/// Database wrapper providing connection management and schema initialization.
///
/// The connection sits behind a mutex so one `Database` can be shared through
/// an `Arc` by the knowledge base, the feedback store and the response log.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens an in-memory SQLite database.
    ///
    /// Automatically applies all migrations on connection open.
    pub fn in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    /// Opens a file-based SQLite database at the given path.
    ///
    /// Creates the database file if it does not exist.
    /// Automatically applies pending migrations on connection open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::initialize(Connection::open(path)?)
    }

    fn initialize(mut conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migration::apply_pending_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        f(&mut conn)
    }

    /// Runs `f` on the blocking pool so a busy connection never stalls the
    /// async workers. Dropping the returned future stops waiting but lets the
    /// statement finish.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.with_connection(f))
            .await
            .context("Database task failed")?
    }

    /// Lists the migrations recorded in `schema_migrations`.
    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        self.with_connection(|conn| migration::applied_migrations(conn))
    }

    /// Counts rows in one of the application tables.
    pub fn count_rows(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        self.with_connection(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
    }
}

/// Application tables, for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Solutions,
    Feedback,
    Responses,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Self::Solutions => "solutions",
            Self::Feedback => "feedback",
            Self::Responses => "responses",
        }
    }
}
