//! # portal-db
//!
//! Database access layer for the enrollment subsystem.
//!
//! ## Schema
//!
//! - WAL mode, foreign keys enforced
//! - All timestamps are Unix epoch seconds (u64)
//! - Schema version stored in `PRAGMA user_version`
//! - Uniqueness (national id, email, enrollment pair, token digest) is
//!   enforced by the store itself; violations surface as
//!   [`DbError::Duplicate`] naming the [`UniqueConstraint`]

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Unique constraints the domain layer knows how to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraint {
    StudentNationalId,
    StudentEmail,
    EnrollmentPair,
    TokenDigest,
    /// A unique violation on a column set not listed above.
    Other,
}

impl UniqueConstraint {
    /// Map the `table.column[, table.column]` list SQLite reports.
    fn from_columns(columns: &str) -> Self {
        match columns.trim() {
            "students.national_id" => Self::StudentNationalId,
            "students.email" => Self::StudentEmail,
            "enrollments.student_id, enrollments.training_id" => Self::EnrollmentPair,
            "verification_tokens.digest" => Self::TokenDigest,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::StudentNationalId => "students.national_id",
            Self::StudentEmail => "students.email",
            Self::EnrollmentPair => "enrollments(student_id, training_id)",
            Self::TokenDigest => "verification_tokens.digest",
            Self::Other => "unknown",
        };
        f.write_str(name)
    }
}

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    Duplicate(UniqueConstraint),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            let unique = failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY);
            if unique {
                let columns = message
                    .as_deref()
                    .and_then(|m| m.split_once("failed:"))
                    .map(|(_, cols)| cols)
                    .unwrap_or_default();
                return DbError::Duplicate(UniqueConstraint::from_columns(columns));
            }
        }
        DbError::Sqlite(err)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(DbError::Sqlite)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(DbError::Sqlite)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(DbError::Sqlite)?;
    Ok(())
}

/// Shared handle to the relational store.
///
/// Opened once at process start and injected into every component; cloning
/// is cheap. Dropping the last clone closes the connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(open(path)?))
    }

    /// Open an isolated in-memory database.
    pub fn open_memory() -> Result<Self> {
        Ok(Self::from_connection(open_memory()?))
    }

    /// Wrap an already configured connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection.
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&Connection) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<DbError>,
    {
        let guard = self.lock()?;
        f(&*guard)
    }

    /// Run `f` inside an IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`; any `Err` rolls back every write `f` made.
    pub fn with_tx<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<DbError>,
    {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::Unavailable("connection lock poisoned".into()))
    }
}

/// Convert stored epoch seconds.
pub(crate) fn to_u64(v: i64) -> u64 {
    v.max(0) as u64
}

/// Epoch seconds for an INTEGER column. SQLite integers are signed.
pub(crate) fn to_i64(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| DbError::Serialization(format!("timestamp {v} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_unique_violation_is_classified() {
        let conn = open_memory().expect("open");
        conn.execute(
            "INSERT INTO students (national_id, full_name, email, created_at, updated_at)
             VALUES ('1', 'A', 'a@x.org', 0, 0)",
            [],
        )
        .expect("first insert");

        let err = conn
            .execute(
                "INSERT INTO students (national_id, full_name, email, created_at, updated_at)
                 VALUES ('1', 'B', 'b@x.org', 0, 0)",
                [],
            )
            .map_err(DbError::from)
            .expect_err("duplicate national id");
        assert!(matches!(err, DbError::Duplicate(UniqueConstraint::StudentNationalId)));

        let err = conn
            .execute(
                "INSERT INTO students (national_id, full_name, email, created_at, updated_at)
                 VALUES ('2', 'B', 'a@x.org', 0, 0)",
                [],
            )
            .map_err(DbError::from)
            .expect_err("duplicate email");
        assert!(matches!(err, DbError::Duplicate(UniqueConstraint::StudentEmail)));
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let store = Store::open_memory().expect("open");
        let result: Result<()> = store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO trainings (name, created_at) VALUES ('Welding', 0)",
                [],
            )?;
            Err(DbError::NotFound("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM trainings", [], |row| row.get(0))
                    .map_err(DbError::from)
            })
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_with_tx_commits_on_ok() {
        let store = Store::open_memory().expect("open");
        store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO trainings (name, created_at) VALUES ('Welding', 0)",
                    [],
                )?;
                Ok::<_, DbError>(())
            })
            .expect("commit");

        let clone = store.clone();
        let count: i64 = clone
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM trainings", [], |row| row.get(0))
                    .map_err(DbError::from)
            })
            .expect("count");
        assert_eq!(count, 1);
    }
}
