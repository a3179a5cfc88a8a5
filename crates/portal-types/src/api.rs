//! Request and response shapes exchanged with the web UI.
//!
//! These mirror the four boundary calls (`enroll`, `confirm`, `status`,
//! `resend`) and are exported as TypeScript for the front end.

use serde::{Deserialize, Serialize};

use crate::student::{Location, StudentProfile};
use crate::token::{PollState, TokenPurpose};

/// Submitted enrollment form.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
pub struct EnrollRequest {
    pub national_id: String,
    pub profile: StudentProfile,
    #[serde(default)]
    pub location: Location,
    pub training_id: i64,
}

/// Result of an enrollment request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrollResponse {
    /// A verification link was mailed; the client polls with `poll_token`.
    Pending { poll_token: String, expires_at: u64 },
    /// The student was already verified and is now enrolled.
    Completed { student_id: i64 },
}

/// Body of `confirm` and `resend`.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct ConfirmResponse {
    /// Always `verified` on success.
    pub status: PollState,
    pub purpose: TokenPurpose,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct StatusResponse {
    pub state: PollState,
    pub expires_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct ResendResponse {
    pub poll_token: String,
    pub expires_at: u64,
}

/// Error categories surfaced to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    OutOfWindow,
    DuplicateEmail,
    DuplicateNationalId,
    AlreadyEnrolled,
    TokenNotFound,
    TokenAlreadyUsed,
    TokenExpired,
    RateLimited,
    InvalidInput,
    StorageError,
    NotifierError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::OutOfWindow => "out_of_window",
            Self::DuplicateEmail => "duplicate_email",
            Self::DuplicateNationalId => "duplicate_national_id",
            Self::AlreadyEnrolled => "already_enrolled",
            Self::TokenNotFound => "token_not_found",
            Self::TokenAlreadyUsed => "token_already_used",
            Self::TokenExpired => "token_expired",
            Self::RateLimited => "rate_limited",
            Self::InvalidInput => "invalid_input",
            Self::StorageError => "storage_error",
            Self::NotifierError => "notifier_error",
        }
    }

    /// Internal failures are shown to users only as "try again".
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::StorageError | Self::NotifierError)
    }
}

/// Structured error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct ApiError {
    pub kind: ErrorKind,
    /// Offending field, e.g. `"email"` for a duplicate email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Present when a token was issued but the email could not be sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enroll_response_is_tagged_by_status() {
        let pending = EnrollResponse::Pending {
            poll_token: "ab".repeat(32),
            expires_at: 900,
        };
        let json = serde_json::to_value(&pending).expect("serialize");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["expires_at"], 900);

        let completed = EnrollResponse::Completed { student_id: 4 };
        let json = serde_json::to_value(&completed).expect("serialize");
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn test_enroll_request_location_optional() {
        let req: EnrollRequest = serde_json::from_str(
            r#"{"national_id":"1","training_id":2,
                "profile":{"full_name":"A","email":"a@b.co"}}"#,
        )
        .expect("parse");
        assert_eq!(req.location, Location::default());
        assert_eq!(req.profile.phone, None);
    }

    #[test]
    fn test_error_kind_names_match_serde() {
        for kind in [ErrorKind::DuplicateEmail, ErrorKind::TokenExpired, ErrorKind::OutOfWindow] {
            let json = serde_json::to_value(kind).expect("serialize");
            assert_eq!(json, kind.as_str());
        }
        assert!(ErrorKind::StorageError.is_internal());
        assert!(!ErrorKind::AlreadyEnrolled.is_internal());
    }
}
