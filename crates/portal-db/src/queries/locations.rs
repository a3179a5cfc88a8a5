//! Location query functions. One row per student.

use portal_types::student::Location;
use portal_types::StudentId;
use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Create or replace the location of a student.
pub fn upsert(conn: &Connection, student_id: StudentId, location: &Location, now: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO locations (student_id, province_id, district_id, sub_district_id, street, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(student_id) DO UPDATE SET
             province_id = excluded.province_id,
             district_id = excluded.district_id,
             sub_district_id = excluded.sub_district_id,
             street = excluded.street,
             updated_at = excluded.updated_at",
        rusqlite::params![
            student_id.0,
            location.province_id,
            location.district_id,
            location.sub_district_id,
            location.street,
            now as i64,
        ],
    )?;
    Ok(())
}

/// Get the location of a student, if one was recorded.
pub fn get(conn: &Connection, student_id: StudentId) -> Result<Option<Location>> {
    let location = conn
        .query_row(
            "SELECT province_id, district_id, sub_district_id, street
             FROM locations WHERE student_id = ?1",
            [student_id.0],
            |row| {
                Ok(Location {
                    province_id: row.get(0)?,
                    district_id: row.get(1)?,
                    sub_district_id: row.get(2)?,
                    street: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(location)
}
