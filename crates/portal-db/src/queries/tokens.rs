//! Verification token query functions.
//!
//! Rows are keyed by the token digest. `consume` and `supersede_unconsumed`
//! are conditional updates on `consumed = 0`, which is what makes a token
//! single-use under concurrent requests.

use portal_types::token::{TokenPurpose, TokenRecord};
use portal_types::StudentId;
use rusqlite::{Connection, OptionalExtension};

use crate::{to_u64, DbError, Result};

/// Fields of a token being issued.
#[derive(Debug, Clone)]
pub struct NewToken<'a> {
    pub digest: &'a [u8; 32],
    pub student_id: StudentId,
    pub email: &'a str,
    pub purpose: TokenPurpose,
    pub metadata: &'a serde_json::Value,
    pub created_at: u64,
    pub expires_at: u64,
    pub created_ip: Option<&'a str>,
}

/// Insert a token row. Returns its row id.
pub fn insert(conn: &Connection, token: &NewToken<'_>) -> Result<i64> {
    let metadata = serde_json::to_string(token.metadata)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO verification_tokens
             (digest, student_id, email, purpose, metadata, created_at, expires_at, created_ip)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            token.digest.as_slice(),
            token.student_id.0,
            token.email,
            token.purpose.as_str(),
            metadata,
            token.created_at as i64,
            token.expires_at as i64,
            token.created_ip,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Retire every unconsumed token of `purpose` held by the student.
///
/// Superseded rows are marked consumed without a `consumed_at`, so they
/// can be told apart from real use. Returns the number of rows retired.
pub fn supersede_unconsumed(conn: &Connection, student_id: StudentId, purpose: TokenPurpose) -> Result<usize> {
    let retired = conn.execute(
        "UPDATE verification_tokens SET consumed = 1, superseded = 1
         WHERE student_id = ?1 AND purpose = ?2 AND consumed = 0",
        rusqlite::params![student_id.0, purpose.as_str()],
    )?;
    Ok(retired)
}

/// Look up a token by digest, whatever its state.
pub fn find_by_digest(conn: &Connection, digest: &[u8; 32]) -> Result<Option<TokenRecord>> {
    let raw = conn
        .query_row(
            "SELECT id, digest, student_id, email, purpose, metadata, created_at, expires_at,
                    consumed, superseded, consumed_at, created_ip, consumed_ip
             FROM verification_tokens WHERE digest = ?1",
            [digest.as_slice()],
            |row| {
                Ok(RawToken {
                    id: row.get(0)?,
                    digest: row.get(1)?,
                    student_id: row.get(2)?,
                    email: row.get(3)?,
                    purpose: row.get(4)?,
                    metadata: row.get(5)?,
                    created_at: row.get(6)?,
                    expires_at: row.get(7)?,
                    consumed: row.get(8)?,
                    superseded: row.get(9)?,
                    consumed_at: row.get(10)?,
                    created_ip: row.get(11)?,
                    consumed_ip: row.get(12)?,
                })
            },
        )
        .optional()?;
    raw.map(RawToken::into_record).transpose()
}

/// Mark a token consumed if, and only if, it is currently unconsumed.
///
/// Returns false when another caller got there first (or the token was
/// superseded); the caller must then not repeat any side effects.
pub fn consume(conn: &Connection, digest: &[u8; 32], now: u64, client_ip: Option<&str>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE verification_tokens SET consumed = 1, consumed_at = ?1, consumed_ip = ?2
         WHERE digest = ?3 AND consumed = 0",
        rusqlite::params![now as i64, client_ip, digest.as_slice()],
    )?;
    Ok(updated == 1)
}

/// Issue time of the student's most recent token for `purpose`.
pub fn latest_created_at(conn: &Connection, student_id: StudentId, purpose: TokenPurpose) -> Result<Option<u64>> {
    let latest: Option<i64> = conn.query_row(
        "SELECT MAX(created_at) FROM verification_tokens WHERE student_id = ?1 AND purpose = ?2",
        rusqlite::params![student_id.0, purpose.as_str()],
        |row| row.get(0),
    )?;
    Ok(latest.map(to_u64))
}

/// Number of tokens of `purpose` ever issued to the student (still retained).
pub fn count_for_student(conn: &Connection, student_id: StudentId, purpose: TokenPurpose) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM verification_tokens WHERE student_id = ?1 AND purpose = ?2",
        rusqlite::params![student_id.0, purpose.as_str()],
        |row| row.get(0),
    )?;
    Ok(to_u64(n))
}

/// Delete tokens whose expiry lies before `cutoff`. Returns the number deleted.
pub fn delete_expired_before(conn: &Connection, cutoff: u64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM verification_tokens WHERE expires_at < ?1",
        [cutoff as i64],
    )?;
    Ok(deleted)
}

struct RawToken {
    id: i64,
    digest: Vec<u8>,
    student_id: i64,
    email: String,
    purpose: String,
    metadata: String,
    created_at: i64,
    expires_at: i64,
    consumed: bool,
    superseded: bool,
    consumed_at: Option<i64>,
    created_ip: Option<String>,
    consumed_ip: Option<String>,
}

impl RawToken {
    fn into_record(self) -> Result<TokenRecord> {
        let digest: [u8; 32] = self
            .digest
            .try_into()
            .map_err(|_| DbError::Serialization("token digest is not 32 bytes".into()))?;
        let purpose = TokenPurpose::parse(&self.purpose)
            .ok_or_else(|| DbError::Serialization(format!("unknown token purpose '{}'", self.purpose)))?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        Ok(TokenRecord {
            id: self.id,
            digest,
            student_id: StudentId(self.student_id),
            email: self.email,
            purpose,
            metadata,
            created_at: to_u64(self.created_at),
            expires_at: to_u64(self.expires_at),
            consumed: self.consumed,
            superseded: self.superseded,
            consumed_at: self.consumed_at.map(to_u64),
            created_ip: self.created_ip,
            consumed_ip: self.consumed_ip,
        })
    }
}
