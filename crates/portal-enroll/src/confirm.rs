//! Confirmation protocol: confirm-by-link, status polling and resend.
//!
//! ## Confirmation Atomicity
//!
//! `confirm` validates the token, then opens one IMMEDIATE transaction that
//! first performs the conditional consume and only then applies the
//! purpose's effects (enrollment row, verified flag, email swap). A caller
//! that loses the consume race applies nothing. Any failure in the effects
//! rolls the consume back, leaving the token usable for a retry.

use std::sync::Arc;

use portal_crypto::token::digest_prefix;
use portal_db::queries::{enrollments, students, tokens};
use portal_db::{DbError, Store, UniqueConstraint};
use portal_types::api::{ConfirmResponse, StatusResponse};
use portal_types::token::{PollState, TokenPurpose, TokenRecord};
use portal_types::{StudentId, TrainingId};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::catalog::TrainingCatalog;
use crate::clock::Clock;
use crate::enrollment::{dispatch, PendingVerification};
use crate::mail::Mailer;
use crate::tokens::{consume_digest, TokenManager};
use crate::{EnrollError, Policy, Result};

/// What a successful confirmation did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub student_id: StudentId,
    pub purpose: TokenPurpose,
    pub training_id: Option<TrainingId>,
    /// False when a concurrent request consumed the token first.
    pub applied: bool,
}

impl Confirmation {
    pub fn to_response(&self) -> ConfirmResponse {
        ConfirmResponse {
            status: PollState::Verified,
            purpose: self.purpose,
        }
    }
}

#[derive(Clone)]
pub struct ConfirmationProtocol {
    store: Store,
    clock: Arc<dyn Clock>,
    tokens: TokenManager,
    catalog: Arc<dyn TrainingCatalog>,
    mailer: Mailer,
    policy: Policy,
}

impl ConfirmationProtocol {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        tokens: TokenManager,
        catalog: Arc<dyn TrainingCatalog>,
        mailer: Mailer,
        policy: Policy,
    ) -> Self {
        Self {
            store,
            clock,
            tokens,
            catalog,
            mailer,
            policy,
        }
    }

    /// Consume the token and apply what it authorizes.
    pub fn confirm(&self, token: &str, client_ip: Option<&str>) -> Result<Confirmation> {
        let record = self.tokens.validate(token)?;
        let now = self.clock.now();

        let applied = self.store.with_tx(|tx| -> Result<bool> {
            if !consume_digest(tx, &record.digest, now, client_ip)? {
                return lost_race(tx, &record);
            }
            apply_effects(tx, &record, now)?;
            Ok(true)
        })?;

        let training_id = record.enrollment_metadata().map(|m| m.training_id);
        if applied {
            info!(
                student_id = %record.student_id,
                purpose = %record.purpose,
                digest = %digest_prefix(&record.digest),
                "Verification confirmed"
            );
        }
        Ok(Confirmation {
            student_id: record.student_id,
            purpose: record.purpose,
            training_id,
            applied,
        })
    }

    /// Poll state for the waiting page. Never consumes.
    pub fn poll(&self, token: &str) -> Result<StatusResponse> {
        let record = self.tokens.find(token)?.ok_or(EnrollError::TokenNotFound)?;
        let status = self.tokens.status(token)?;
        let state = status.poll_state().unwrap_or(PollState::Expired);
        Ok(StatusResponse {
            state,
            expires_at: record.expires_at,
        })
    }

    /// Issue a fresh token for the same student and purpose as `token`.
    ///
    /// Works on expired and superseded tokens. Throttled per
    /// `(student, purpose)` by `resend_min_interval_secs`.
    pub fn resend(&self, token: &str, client_ip: Option<&str>) -> Result<PendingVerification> {
        let record = self.tokens.find(token)?.ok_or(EnrollError::TokenNotFound)?;
        let now = self.clock.now();

        let metadata = record.enrollment_metadata();
        if let Some(meta) = metadata {
            let enrolled = self.store.with_conn(|conn| {
                enrollments::exists(conn, record.student_id, meta.training_id)
            })?;
            if enrolled {
                return Err(EnrollError::AlreadyEnrolled(meta.training_id.to_string()));
            }
        }

        if let Some(last) = self.tokens.last_issued_at(record.student_id, record.purpose)? {
            let ready_at = last + self.policy.resend_min_interval_secs;
            if now < ready_at {
                warn!(student_id = %record.student_id, purpose = %record.purpose, "Resend throttled");
                return Err(EnrollError::RateLimited {
                    retry_after_secs: ready_at - now,
                });
            }
        }

        // An email-change link belongs to the address being claimed. Anything
        // else follows the student's current address.
        let recipient = match record.purpose {
            TokenPurpose::EmailChange => record.email.clone(),
            TokenPurpose::Enrollment | TokenPurpose::Recovery => {
                self.store
                    .with_conn(|conn| students::get(conn, record.student_id))?
                    .email
            }
        };
        let training_name = match metadata {
            Some(meta) => self.catalog.get_training(meta.training_id)?.map(|t| t.name),
            None => None,
        };
        let issued = self.tokens.issue(
            record.student_id,
            &recipient,
            record.purpose,
            &record.metadata,
            self.policy.token_ttl_minutes,
            client_ip,
        )?;
        dispatch(
            &self.mailer,
            &self.policy,
            record.student_id,
            &recipient,
            record.purpose,
            issued,
            training_name.as_deref(),
        )
    }
}

/// The conditional consume affected no row.
///
/// Either a concurrent confirm won (report success, apply nothing) or a
/// reissue retired the token after validation (reject as used).
fn lost_race(conn: &Connection, record: &TokenRecord) -> Result<bool> {
    let current = tokens::find_by_digest(conn, &record.digest)?;
    match current {
        Some(current) if current.consumed && !current.superseded => {
            warn!(
                digest = %digest_prefix(&record.digest),
                "Token consumed by a concurrent request"
            );
            Ok(false)
        }
        Some(_) => Err(EnrollError::TokenAlreadyUsed),
        None => Err(EnrollError::TokenNotFound),
    }
}

fn apply_effects(conn: &Connection, record: &TokenRecord, now: u64) -> Result<()> {
    match record.purpose {
        TokenPurpose::Enrollment => {
            let meta = record
                .enrollment_metadata()
                .ok_or_else(|| EnrollError::InvalidInput {
                    field: "token",
                    reason: "enrollment token carries no training".into(),
                })?;
            enrollments::insert_if_absent(conn, record.student_id, meta.training_id, now)?;
            if !students::mark_email_verified(conn, record.student_id, &record.email, now)? {
                warn!(
                    student_id = %record.student_id,
                    "Email changed since the link was sent; verified flag left unchanged"
                );
            }
        }
        TokenPurpose::EmailChange => {
            students::set_verified_email(conn, record.student_id, &record.email, now).map_err(|e| match e {
                DbError::Duplicate(UniqueConstraint::StudentEmail) => EnrollError::DuplicateEmail {
                    email: record.email.clone(),
                },
                other => other.into(),
            })?;
        }
        TokenPurpose::Recovery => {}
    }
    Ok(())
}
