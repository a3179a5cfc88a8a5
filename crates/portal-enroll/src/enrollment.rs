//! The "request enrollment" use case and the other token-issuing flows.

use std::sync::Arc;

use portal_db::queries::enrollments;
use portal_db::{DbError, Store, UniqueConstraint};
use portal_types::api::{EnrollRequest, EnrollResponse, ResendResponse};
use portal_types::token::{EnrollmentMetadata, TokenPurpose};
use portal_types::training::{Training, WindowPosition};
use portal_types::{StudentId, TrainingId};
use tracing::{error, info};

use crate::catalog::TrainingCatalog;
use crate::clock::Clock;
use crate::identity::{normalize_email, IdentityResolver};
use crate::mail::{Mailer, VerificationEmail};
use crate::tokens::{IssuedToken, TokenManager};
use crate::{EnrollError, Policy, Result};

/// A verification email is on its way; the client polls with `poll_token`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingVerification {
    pub student_id: StudentId,
    pub poll_token: String,
    pub expires_at: u64,
}

impl PendingVerification {
    pub fn to_response(&self) -> ResendResponse {
        ResendResponse {
            poll_token: self.poll_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollOutcome {
    Pending(PendingVerification),
    /// The student's email was already verified; enrolled immediately.
    Completed { student_id: StudentId },
}

impl EnrollOutcome {
    pub fn to_response(&self) -> EnrollResponse {
        match self {
            Self::Pending(pending) => EnrollResponse::Pending {
                poll_token: pending.poll_token.clone(),
                expires_at: pending.expires_at,
            },
            Self::Completed { student_id } => EnrollResponse::Completed {
                student_id: student_id.0,
            },
        }
    }
}

#[derive(Clone)]
pub struct EnrollmentOrchestrator {
    store: Store,
    clock: Arc<dyn Clock>,
    tokens: TokenManager,
    identities: IdentityResolver,
    catalog: Arc<dyn TrainingCatalog>,
    mailer: Mailer,
    policy: Policy,
}

impl EnrollmentOrchestrator {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        tokens: TokenManager,
        identities: IdentityResolver,
        catalog: Arc<dyn TrainingCatalog>,
        mailer: Mailer,
        policy: Policy,
    ) -> Self {
        Self {
            store,
            clock,
            tokens,
            identities,
            catalog,
            mailer,
            policy,
        }
    }

    /// Validate the training, resolve the student, then either enroll
    /// directly or send a verification link.
    pub fn enroll(&self, request: &EnrollRequest, client_ip: Option<&str>) -> Result<EnrollOutcome> {
        let training_id = TrainingId(request.training_id);
        let training = self.open_training(training_id)?;

        let student_id = self
            .identities
            .resolve(&request.national_id, &request.profile)?;
        self.identities.upsert_location(student_id, &request.location)?;
        let student = self.identities.student(student_id)?;

        if student.email_verified {
            let now = self.clock.now();
            self.store
                .with_conn(|conn| enrollments::insert(conn, student_id, training_id, now))
                .map_err(|e| already_enrolled(e, training_id))?;
            info!(student_id = %student_id, training_id = %training_id, "Enrolled verified student");
            return Ok(EnrollOutcome::Completed { student_id });
        }

        let enrolled = self
            .store
            .with_conn(|conn| enrollments::exists(conn, student_id, training_id))?;
        if enrolled {
            return Err(EnrollError::AlreadyEnrolled(training_id.to_string()));
        }

        let issued = self.tokens.issue(
            student_id,
            &student.email,
            TokenPurpose::Enrollment,
            &EnrollmentMetadata { training_id }.to_value(),
            self.policy.token_ttl_minutes,
            client_ip,
        )?;
        let pending = dispatch(
            &self.mailer,
            &self.policy,
            student_id,
            &student.email,
            TokenPurpose::Enrollment,
            issued,
            Some(&training.name),
        )?;
        Ok(EnrollOutcome::Pending(pending))
    }

    /// Send a link that, once confirmed, makes `new_email` the student's
    /// verified address.
    pub fn request_email_change(
        &self,
        student_id: StudentId,
        new_email: &str,
        client_ip: Option<&str>,
    ) -> Result<PendingVerification> {
        let student = self.identities.student(student_id)?;
        let new_email = normalize_email(new_email)?;
        if new_email == student.email && student.email_verified {
            return Err(EnrollError::InvalidInput {
                field: "email",
                reason: "is already your verified address".into(),
            });
        }
        self.identities
            .ensure_email_available(&new_email, Some(student_id))?;

        let issued = self.tokens.issue(
            student_id,
            &new_email,
            TokenPurpose::EmailChange,
            &serde_json::json!({}),
            self.policy.token_ttl_minutes,
            client_ip,
        )?;
        dispatch(
            &self.mailer,
            &self.policy,
            student_id,
            &new_email,
            TokenPurpose::EmailChange,
            issued,
            None,
        )
    }

    /// Send an account recovery link to the student's current address.
    pub fn request_recovery(&self, national_id: &str, client_ip: Option<&str>) -> Result<PendingVerification> {
        let student = self
            .identities
            .lookup(national_id)?
            .ok_or_else(|| EnrollError::NotFound {
                field: "national_id",
                detail: "student".into(),
            })?;

        let issued = self.tokens.issue(
            student.id,
            &student.email,
            TokenPurpose::Recovery,
            &serde_json::json!({}),
            self.policy.token_ttl_minutes,
            client_ip,
        )?;
        dispatch(
            &self.mailer,
            &self.policy,
            student.id,
            &student.email,
            TokenPurpose::Recovery,
            issued,
            None,
        )
    }

    fn open_training(&self, id: TrainingId) -> Result<Training> {
        let training = self
            .catalog
            .get_training(id)?
            .ok_or_else(|| EnrollError::NotFound {
                field: "training_id",
                detail: format!("training {id}"),
            })?;
        if !training.active {
            return Err(EnrollError::Unavailable(id.to_string()));
        }
        match training.window_position(self.clock.now()) {
            WindowPosition::Open => Ok(training),
            WindowPosition::BeforeOpen | WindowPosition::AfterClose => Err(EnrollError::OutOfWindow {
                opens_at: training.enrollment_opens_at,
                closes_at: training.enrollment_closes_at,
            }),
        }
    }
}

pub(crate) fn already_enrolled(err: DbError, training_id: TrainingId) -> EnrollError {
    match err {
        DbError::Duplicate(UniqueConstraint::EnrollmentPair) => {
            EnrollError::AlreadyEnrolled(training_id.to_string())
        }
        other => other.into(),
    }
}

/// Mail the link for a freshly issued token.
///
/// A delivery failure leaves the token in place; the error carries the
/// poll token so the client can still reach resend.
pub(crate) fn dispatch(
    mailer: &Mailer,
    policy: &Policy,
    student_id: StudentId,
    to: &str,
    purpose: TokenPurpose,
    issued: IssuedToken,
    training_name: Option<&str>,
) -> Result<PendingVerification> {
    let poll_token = issued.plaintext.to_string();
    let sent = mailer.send_verification(&VerificationEmail {
        to,
        purpose,
        token: &issued.plaintext,
        training_name,
        ttl_minutes: policy.token_ttl_minutes,
    });
    match sent {
        Ok(delivery) => {
            info!(
                student_id = %student_id,
                purpose = %purpose,
                message_id = %delivery.message_id,
                "Verification email sent"
            );
            Ok(PendingVerification {
                student_id,
                poll_token,
                expires_at: issued.expires_at,
            })
        }
        Err(e) => {
            error!(student_id = %student_id, purpose = %purpose, error = %e, "Verification email failed");
            Err(EnrollError::Notifier {
                detail: e.to_string(),
                poll_token: Some(poll_token),
            })
        }
    }
}
