//! Verification token lifecycle.
//!
//! ## Token Lifecycle
//!
//! 1. `issue` retires every unconsumed token of the same `(student, purpose)`
//!    and inserts a new one, in a single transaction. At most one token per
//!    pair is ever live.
//! 2. The plaintext goes out in an email; the store only sees its digest.
//! 3. `validate` checks existence, then use, then expiry, in that order.
//! 4. `consume` is a conditional update, so exactly one concurrent caller wins.
//! 5. `sweep_expired` deletes rows whose expiry is past the retention window.

use std::sync::Arc;

use portal_crypto::token::{digest_prefix, TokenDigest, TokenSecret};
use portal_db::queries::tokens::{self, NewToken};
use portal_db::Store;
use portal_types::token::{TokenPurpose, TokenRecord, TokenRejection, TokenStatus};
use portal_types::{StudentId, SECS_PER_DAY};
use rusqlite::Connection;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::{EnrollError, Result};

/// A freshly issued token. The plaintext is zeroized on drop.
#[derive(Debug)]
pub struct IssuedToken {
    pub plaintext: Zeroizing<String>,
    pub record_id: i64,
    pub expires_at: u64,
}

/// Issues and checks verification tokens.
#[derive(Clone)]
pub struct TokenManager {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Issue a token bound to `email`, retiring older unconsumed ones.
    pub fn issue(
        &self,
        student_id: StudentId,
        email: &str,
        purpose: TokenPurpose,
        metadata: &serde_json::Value,
        ttl_minutes: u32,
        client_ip: Option<&str>,
    ) -> Result<IssuedToken> {
        let secret = TokenSecret::generate();
        let digest = secret.digest();
        let now = self.clock.now();
        let expires_at = now + u64::from(ttl_minutes) * 60;

        let (record_id, superseded) = self.store.with_tx(|tx| -> Result<(i64, usize)> {
            let superseded = tokens::supersede_unconsumed(tx, student_id, purpose)?;
            let id = tokens::insert(
                tx,
                &NewToken {
                    digest: &digest,
                    student_id,
                    email,
                    purpose,
                    metadata,
                    created_at: now,
                    expires_at,
                    created_ip: client_ip,
                },
            )?;
            Ok((id, superseded))
        })?;

        info!(
            student_id = %student_id,
            purpose = %purpose,
            digest = %digest_prefix(&digest),
            superseded,
            expires_at,
            "Issued verification token"
        );

        Ok(IssuedToken {
            plaintext: secret.to_hex(),
            record_id,
            expires_at,
        })
    }

    /// Check a submitted token without consuming it.
    pub fn validate(&self, token: &str) -> Result<TokenRecord> {
        let record = self.find(token)?;
        evaluate(record, self.clock.now()).map_err(|rejection| {
            debug!(reason = rejection.as_str(), "Token rejected");
            EnrollError::from(rejection)
        })
    }

    /// Mark the token used. Returns false if it was already used or unknown.
    pub fn consume(&self, token: &str, client_ip: Option<&str>) -> Result<bool> {
        let Some(digest) = parse_digest(token) else {
            return Ok(false);
        };
        let now = self.clock.now();
        self.store
            .with_conn(|conn| consume_digest(conn, &digest, now, client_ip))
    }

    /// Read-only view for the polling page. Never consumes.
    pub fn status(&self, token: &str) -> Result<TokenStatus> {
        let now = self.clock.now();
        Ok(match self.find(token)? {
            None => TokenStatus::default(),
            Some(record) => TokenStatus {
                exists: true,
                used: record.consumed && !record.superseded,
                expired: record.is_expired_at(now),
                superseded: record.superseded,
            },
        })
    }

    /// Look a token up by its plaintext. Malformed input is simply not found.
    pub fn find(&self, token: &str) -> Result<Option<TokenRecord>> {
        let Some(digest) = parse_digest(token) else {
            return Ok(None);
        };
        Ok(self
            .store
            .with_conn(|conn| tokens::find_by_digest(conn, &digest))?)
    }

    /// When the newest token of this purpose was issued to the student.
    pub fn last_issued_at(&self, student_id: StudentId, purpose: TokenPurpose) -> Result<Option<u64>> {
        Ok(self
            .store
            .with_conn(|conn| tokens::latest_created_at(conn, student_id, purpose))?)
    }

    /// Delete tokens that expired more than `retention_days` ago.
    pub fn sweep_expired(&self, retention_days: u32) -> Result<usize> {
        let cutoff = self
            .clock
            .now()
            .saturating_sub(u64::from(retention_days) * SECS_PER_DAY);
        let deleted = self
            .store
            .with_conn(|conn| tokens::delete_expired_before(conn, cutoff))?;
        if deleted > 0 {
            info!(deleted, cutoff, "Swept expired verification tokens");
        }
        Ok(deleted)
    }
}

/// Conditional consume on an open connection or transaction.
pub(crate) fn consume_digest(
    conn: &Connection,
    digest: &TokenDigest,
    now: u64,
    client_ip: Option<&str>,
) -> Result<bool> {
    let won = tokens::consume(conn, digest, now, client_ip)?;
    debug!(digest = %digest_prefix(digest), won, "Consume attempt");
    Ok(won)
}

fn parse_digest(token: &str) -> Option<TokenDigest> {
    TokenSecret::parse(token).ok().map(|secret| secret.digest())
}

/// Apply the validation order: missing, then used, then expired.
///
/// A superseded token reads as used.
pub fn evaluate(record: Option<TokenRecord>, now: u64) -> std::result::Result<TokenRecord, TokenRejection> {
    let record = record.ok_or(TokenRejection::NotFound)?;
    if record.consumed {
        return Err(TokenRejection::AlreadyUsed);
    }
    if record.is_expired_at(now) {
        return Err(TokenRejection::Expired);
    }
    Ok(record)
}
