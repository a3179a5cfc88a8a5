//! Training catalog query functions.
//!
//! The catalog itself is maintained by separate CRUD code; enrollment only
//! reads it. `insert` and `set_active` exist for seeding and tests.

use portal_types::training::Training;
use portal_types::TrainingId;
use rusqlite::{Connection, OptionalExtension};

use crate::{to_i64, to_u64, DbError, Result};

/// Insert a training.
pub fn insert(
    conn: &Connection,
    name: &str,
    active: bool,
    opens_at: Option<u64>,
    closes_at: Option<u64>,
    now: u64,
) -> Result<TrainingId> {
    let opens_at = opens_at.map(to_i64).transpose()?;
    let closes_at = closes_at.map(to_i64).transpose()?;
    conn.execute(
        "INSERT INTO trainings (name, active, enrollment_opens_at, enrollment_closes_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            name,
            active,
            opens_at,
            closes_at,
            to_i64(now)?,
        ],
    )?;
    Ok(TrainingId(conn.last_insert_rowid()))
}

/// Get a training by id.
pub fn get(conn: &Connection, id: TrainingId) -> Result<Option<Training>> {
    let training = conn
        .query_row(
            "SELECT id, name, active, enrollment_opens_at, enrollment_closes_at
             FROM trainings WHERE id = ?1",
            [id.0],
            |row| {
                Ok(Training {
                    id: TrainingId(row.get(0)?),
                    name: row.get(1)?,
                    active: row.get(2)?,
                    enrollment_opens_at: row.get::<_, Option<i64>>(3)?.map(to_u64),
                    enrollment_closes_at: row.get::<_, Option<i64>>(4)?.map(to_u64),
                })
            },
        )
        .optional()?;
    Ok(training)
}

/// Activate or deactivate a training.
pub fn set_active(conn: &Connection, id: TrainingId, active: bool) -> Result<()> {
    let updated = conn.execute(
        "UPDATE trainings SET active = ?1 WHERE id = ?2",
        rusqlite::params![active, id.0],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("training {id}")));
    }
    Ok(())
}
