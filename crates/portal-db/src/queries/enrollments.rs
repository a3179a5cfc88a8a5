//! Enrollment query functions. One row per (student, training) pair.

use portal_types::{StudentId, TrainingId};
use rusqlite::Connection;

use crate::{to_u64, Result};

/// Insert an enrollment.
///
/// Fails with `DbError::Duplicate(UniqueConstraint::EnrollmentPair)` if the
/// student is already enrolled.
pub fn insert(conn: &Connection, student_id: StudentId, training_id: TrainingId, now: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO enrollments (student_id, training_id, enrolled_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![student_id.0, training_id.0, now as i64],
    )?;
    Ok(())
}

/// Insert an enrollment unless the pair already exists. Returns true if a row was created.
pub fn insert_if_absent(
    conn: &Connection,
    student_id: StudentId,
    training_id: TrainingId,
    now: u64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO enrollments (student_id, training_id, enrolled_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(student_id, training_id) DO NOTHING",
        rusqlite::params![student_id.0, training_id.0, now as i64],
    )?;
    Ok(inserted == 1)
}

/// Whether the student is enrolled in the training.
pub fn exists(conn: &Connection, student_id: StudentId, training_id: TrainingId) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM enrollments WHERE student_id = ?1 AND training_id = ?2)",
        rusqlite::params![student_id.0, training_id.0],
        |row| row.get(0),
    )?;
    Ok(found == 1)
}

/// Number of enrollments in a training.
pub fn count_for_training(conn: &Connection, training_id: TrainingId) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE training_id = ?1",
        [training_id.0],
        |row| row.get(0),
    )?;
    Ok(to_u64(n))
}
