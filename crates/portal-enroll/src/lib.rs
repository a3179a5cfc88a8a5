//! # portal-enroll
//!
//! Student identity resolution and the email-verification token lifecycle
//! that gates self-service enrollment into trainings.
//!
//! This crate implements:
//!
//! - [`tokens`] - Issuing, validating, consuming and sweeping verification tokens
//! - [`identity`] - Find-or-create of students by national id with email dedup
//! - [`enrollment`] - The "request enrollment" use case and the other token-issuing flows
//! - [`confirm`] - Confirm-by-link, status polling and resend
//! - [`mail`] / [`catalog`] / [`clock`] - Collaborators: notifier, training lookup, time
//!
//! ## Enrollment Flow
//!
//! 1. The client submits identity, location and the desired training.
//! 2. The training must exist, be active and be inside its enrollment window.
//! 3. The identity resolves to exactly one student row (created on first sight).
//! 4. An already verified student is enrolled immediately.
//! 5. Otherwise a token is issued, the link is mailed, and the client polls
//!    [`Portal::status`] until the user clicks the link ([`Portal::confirm`]).

pub mod catalog;
pub mod clock;
pub mod confirm;
pub mod enrollment;
pub mod identity;
pub mod mail;
pub mod tokens;

use std::sync::Arc;

use portal_db::{DbError, Store};
use portal_types::api::{ApiError, EnrollRequest, ErrorKind, StatusResponse};
use portal_types::token::TokenRejection;
use portal_types::{
    DEFAULT_RESEND_INTERVAL_SECS, DEFAULT_TOKEN_RETENTION_DAYS, DEFAULT_TOKEN_TTL_MINUTES,
};

use crate::catalog::TrainingCatalog;
use crate::clock::Clock;
use crate::confirm::{Confirmation, ConfirmationProtocol};
use crate::enrollment::{EnrollOutcome, EnrollmentOrchestrator, PendingVerification};
use crate::identity::IdentityResolver;
use crate::mail::Mailer;
use crate::tokens::TokenManager;

/// Error types for enrollment and verification.
#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    /// The training or student does not exist.
    #[error("{detail} not found")]
    NotFound { field: &'static str, detail: String },

    /// The training is deactivated.
    #[error("training {0} is not accepting enrollments")]
    Unavailable(String),

    /// `now` is outside the training's enrollment window.
    #[error("enrollment window is closed (opens {opens_at:?}, closes {closes_at:?})")]
    OutOfWindow {
        opens_at: Option<u64>,
        closes_at: Option<u64>,
    },

    /// The email belongs to a different student.
    #[error("email {email} is already registered")]
    DuplicateEmail { email: String },

    /// A concurrent request registered this national id first.
    #[error("national id is already registered")]
    DuplicateNationalId,

    /// The student already holds an enrollment for the training.
    #[error("already enrolled in training {0}")]
    AlreadyEnrolled(String),

    #[error("verification token not found")]
    TokenNotFound,

    #[error("verification token already used")]
    TokenAlreadyUsed,

    #[error("verification token expired")]
    TokenExpired,

    /// A resend came too soon after the previous token.
    #[error("resend rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A submitted field failed basic shape checks.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    /// The email could not be sent. The token stays issued.
    #[error("notifier error: {detail}")]
    Notifier {
        detail: String,
        /// Lets the client reach the resend path.
        poll_token: Option<String>,
    },
}

impl EnrollError {
    /// Category surfaced to the UI.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::OutOfWindow { .. } => ErrorKind::OutOfWindow,
            Self::DuplicateEmail { .. } => ErrorKind::DuplicateEmail,
            Self::DuplicateNationalId => ErrorKind::DuplicateNationalId,
            Self::AlreadyEnrolled(_) => ErrorKind::AlreadyEnrolled,
            Self::TokenNotFound => ErrorKind::TokenNotFound,
            Self::TokenAlreadyUsed => ErrorKind::TokenAlreadyUsed,
            Self::TokenExpired => ErrorKind::TokenExpired,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Storage(_) => ErrorKind::StorageError,
            Self::Notifier { .. } => ErrorKind::NotifierError,
        }
    }

    /// The submitted field a UI should highlight, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::DuplicateEmail { .. } => Some("email"),
            Self::DuplicateNationalId => Some("national_id"),
            Self::InvalidInput { field, .. } | Self::NotFound { field, .. } => Some(*field),
            Self::Unavailable(_) | Self::OutOfWindow { .. } => Some("training_id"),
            _ => None,
        }
    }

    /// Storage and notifier failures; logged in full, shown as "try again".
    pub fn is_internal(&self) -> bool {
        self.kind().is_internal()
    }

    /// Structured body for the UI. Internal details are withheld.
    pub fn to_api_error(&self) -> ApiError {
        let message = if self.is_internal() {
            "Something went wrong, please try again.".to_string()
        } else {
            self.to_string()
        };
        ApiError {
            kind: self.kind(),
            field: self.field().map(str::to_string),
            message,
            retry_after_secs: match self {
                Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            },
            poll_token: match self {
                Self::Notifier { poll_token, .. } => poll_token.clone(),
                _ => None,
            },
        }
    }
}

impl From<TokenRejection> for EnrollError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::NotFound => Self::TokenNotFound,
            TokenRejection::AlreadyUsed => Self::TokenAlreadyUsed,
            TokenRejection::Expired => Self::TokenExpired,
        }
    }
}

/// Convenience result type for enrollment operations.
pub type Result<T> = std::result::Result<T, EnrollError>;

/// Tunables for token issuance and maintenance.
#[derive(Clone, Debug)]
pub struct Policy {
    /// Lifetime of an issued token.
    pub token_ttl_minutes: u32,
    /// Minimum spacing between two tokens of the same purpose for one student, via resend.
    pub resend_min_interval_secs: u64,
    /// How long expired tokens are kept before the sweep deletes them.
    pub retention_days: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            token_ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES,
            resend_min_interval_secs: DEFAULT_RESEND_INTERVAL_SECS,
            retention_days: DEFAULT_TOKEN_RETENTION_DAYS,
        }
    }
}

/// Everything the UI boundary needs, wired over one injected [`Store`].
#[derive(Clone)]
pub struct Portal {
    tokens: TokenManager,
    identities: IdentityResolver,
    orchestrator: EnrollmentOrchestrator,
    confirmation: ConfirmationProtocol,
    policy: Policy,
}

impl Portal {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn TrainingCatalog>,
        mailer: Mailer,
        policy: Policy,
    ) -> Self {
        let tokens = TokenManager::new(store.clone(), clock.clone());
        let identities = IdentityResolver::new(store.clone(), clock.clone());
        let orchestrator = EnrollmentOrchestrator::new(
            store.clone(),
            clock.clone(),
            tokens.clone(),
            identities.clone(),
            catalog.clone(),
            mailer.clone(),
            policy.clone(),
        );
        let confirmation = ConfirmationProtocol::new(
            store,
            clock,
            tokens.clone(),
            catalog,
            mailer,
            policy.clone(),
        );
        Self {
            tokens,
            identities,
            orchestrator,
            confirmation,
            policy,
        }
    }

    /// `POST enroll`
    pub fn enroll(&self, request: &EnrollRequest, client_ip: Option<&str>) -> Result<EnrollOutcome> {
        self.orchestrator.enroll(request, client_ip)
    }

    /// `POST confirm`
    pub fn confirm(&self, token: &str, client_ip: Option<&str>) -> Result<Confirmation> {
        self.confirmation.confirm(token, client_ip)
    }

    /// `GET status/{token}`
    pub fn status(&self, token: &str) -> Result<StatusResponse> {
        self.confirmation.poll(token)
    }

    /// `POST resend`
    pub fn resend(&self, token: &str, client_ip: Option<&str>) -> Result<PendingVerification> {
        self.confirmation.resend(token, client_ip)
    }

    pub fn request_email_change(
        &self,
        student_id: portal_types::StudentId,
        new_email: &str,
        client_ip: Option<&str>,
    ) -> Result<PendingVerification> {
        self.orchestrator.request_email_change(student_id, new_email, client_ip)
    }

    pub fn request_recovery(&self, national_id: &str, client_ip: Option<&str>) -> Result<PendingVerification> {
        self.orchestrator.request_recovery(national_id, client_ip)
    }

    /// Delete tokens expired for longer than the retention window.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.tokens.sweep_expired(self.policy.retention_days)
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}
