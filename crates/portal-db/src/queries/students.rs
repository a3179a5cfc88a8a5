//! Student query functions.

use portal_types::student::{Student, StudentProfile};
use portal_types::StudentId;
use rusqlite::{Connection, OptionalExtension};

use crate::{to_u64, DbError, Result};

const COLUMNS: &str = "id, national_id, full_name, name_on_id, email, phone, email_verified,
                       created_at, updated_at";

/// Insert a new, unverified student.
///
/// Fails with [`DbError::Duplicate`] if the national id or email is taken.
pub fn insert(
    conn: &Connection,
    national_id: &str,
    profile: &StudentProfile,
    now: u64,
) -> Result<StudentId> {
    conn.execute(
        "INSERT INTO students (national_id, full_name, name_on_id, email, phone,
                               email_verified, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
        rusqlite::params![
            national_id,
            profile.full_name,
            profile.name_on_id,
            profile.email,
            profile.phone,
            now as i64,
        ],
    )?;
    Ok(StudentId(conn.last_insert_rowid()))
}

/// Get a student by id.
pub fn get(conn: &Connection, id: StudentId) -> Result<Student> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM students WHERE id = ?1"),
        [id.0],
        from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("student {id}")),
        other => DbError::from(other),
    })
}

/// Find a student by national id.
pub fn find_by_national_id(conn: &Connection, national_id: &str) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM students WHERE national_id = ?1"),
            [national_id],
            from_row,
        )
        .optional()?;
    Ok(student)
}

/// Find a student by (normalized) email.
pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM students WHERE email = ?1"),
            [email],
            from_row,
        )
        .optional()?;
    Ok(student)
}

/// Overwrite the mutable profile fields of a student.
///
/// With `reset_verification`, `email_verified` drops back to false.
pub fn update_profile(
    conn: &Connection,
    id: StudentId,
    profile: &StudentProfile,
    reset_verification: bool,
    now: u64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE students
         SET full_name = ?1, name_on_id = ?2, email = ?3, phone = ?4,
             email_verified = CASE WHEN ?5 THEN 0 ELSE email_verified END,
             updated_at = ?6
         WHERE id = ?7",
        rusqlite::params![
            profile.full_name,
            profile.name_on_id,
            profile.email,
            profile.phone,
            reset_verification,
            now as i64,
            id.0,
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("student {id}")));
    }
    Ok(())
}

/// Mark `email` verified, provided it is still the student's current address.
///
/// Returns false when the student has since switched to another email.
pub fn mark_email_verified(conn: &Connection, id: StudentId, email: &str, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE students SET email_verified = 1, updated_at = ?1
         WHERE id = ?2 AND email = ?3",
        rusqlite::params![now as i64, id.0, email],
    )?;
    Ok(updated == 1)
}

/// Replace a student's email with an already verified address.
pub fn set_verified_email(conn: &Connection, id: StudentId, email: &str, now: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE students SET email = ?1, email_verified = 1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![email, now as i64, id.0],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("student {id}")));
    }
    Ok(())
}

/// Number of student rows.
pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
    Ok(to_u64(n))
}

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: StudentId(row.get(0)?),
        national_id: row.get(1)?,
        full_name: row.get(2)?,
        name_on_id: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        email_verified: row.get(6)?,
        created_at: to_u64(row.get(7)?),
        updated_at: to_u64(row.get(8)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UniqueConstraint;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn profile(email: &str) -> StudentProfile {
        StudentProfile {
            full_name: "Malee Srisuk".into(),
            name_on_id: "MALEE SRISUK".into(),
            email: email.into(),
            phone: Some("0899999999".into()),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = test_db();
        let id = insert(&conn, "3100500000002", &profile("malee@example.org"), 1000).expect("insert");
        let student = get(&conn, id).expect("get");

        assert_eq!(student.national_id, "3100500000002");
        assert_eq!(student.email, "malee@example.org");
        assert!(!student.email_verified);
        assert_eq!(student.created_at, 1000);
    }

    #[test]
    fn test_find_by_national_id_and_email() {
        let conn = test_db();
        let id = insert(&conn, "1", &profile("a@example.org"), 1).expect("insert");

        let by_nid = find_by_national_id(&conn, "1").expect("query");
        assert_eq!(by_nid.map(|s| s.id), Some(id));
        let by_email = find_by_email(&conn, "a@example.org").expect("query");
        assert_eq!(by_email.map(|s| s.id), Some(id));
        assert!(find_by_national_id(&conn, "2").expect("query").is_none());
    }

    #[test]
    fn test_duplicate_national_id() {
        let conn = test_db();
        insert(&conn, "1", &profile("a@example.org"), 1).expect("insert");
        let err = insert(&conn, "1", &profile("b@example.org"), 2).expect_err("duplicate");
        assert!(matches!(err, DbError::Duplicate(UniqueConstraint::StudentNationalId)));
    }

    #[test]
    fn test_update_profile_resets_verification() {
        let conn = test_db();
        let id = insert(&conn, "1", &profile("a@example.org"), 1).expect("insert");
        assert!(mark_email_verified(&conn, id, "a@example.org", 2).expect("verify"));

        update_profile(&conn, id, &profile("a@example.org"), false, 3).expect("update");
        assert!(get(&conn, id).expect("get").email_verified);

        update_profile(&conn, id, &profile("new@example.org"), true, 4).expect("update");
        let student = get(&conn, id).expect("get");
        assert_eq!(student.email, "new@example.org");
        assert!(!student.email_verified);
        assert_eq!(student.updated_at, 4);
    }

    #[test]
    fn test_mark_verified_requires_current_email() {
        let conn = test_db();
        let id = insert(&conn, "1", &profile("a@example.org"), 1).expect("insert");
        assert!(!mark_email_verified(&conn, id, "old@example.org", 2).expect("verify"));
        assert!(!get(&conn, id).expect("get").email_verified);
    }

    #[test]
    fn test_set_verified_email() {
        let conn = test_db();
        let id = insert(&conn, "1", &profile("a@example.org"), 1).expect("insert");
        set_verified_email(&conn, id, "b@example.org", 5).expect("set");
        let student = get(&conn, id).expect("get");
        assert_eq!(student.email, "b@example.org");
        assert!(student.email_verified);
    }

    #[test]
    fn test_get_missing() {
        let conn = test_db();
        assert!(matches!(get(&conn, StudentId(99)), Err(DbError::NotFound(_))));
        assert_eq!(count(&conn).expect("count"), 0);
    }
}
