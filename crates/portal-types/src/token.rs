//! Verification token records and their observable states.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{StudentId, TrainingId};

/// What a verification token authorizes.
///
/// Invalidation on reissue is scoped to `(student, purpose)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Enrollment,
    Recovery,
    EmailChange,
}

impl TokenPurpose {
    /// Stable tag persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enrollment => "enrollment",
            Self::Recovery => "recovery",
            Self::EmailChange => "email_change",
        }
    }

    /// Parse a persisted tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "enrollment" => Some(Self::Enrollment),
            "recovery" => Some(Self::Recovery),
            "email_change" => Some(Self::EmailChange),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted verification token. The plaintext is never part of it.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: i64,
    /// BLAKE3 digest of the plaintext secret.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub digest: [u8; 32],
    pub student_id: StudentId,
    /// Address the link was sent to; may differ from the student's current email.
    pub email: String,
    pub purpose: TokenPurpose,
    /// Opaque structured metadata, e.g. `{"training_id": 3}`.
    pub metadata: serde_json::Value,
    pub created_at: u64,
    pub expires_at: u64,
    pub consumed: bool,
    /// Retired by a newer token of the same purpose rather than by use.
    pub superseded: bool,
    pub consumed_at: Option<u64>,
    pub created_ip: Option<String>,
    pub consumed_ip: Option<String>,
}

impl TokenRecord {
    /// A token is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Decode the metadata of an enrollment token.
    pub fn enrollment_metadata(&self) -> Option<EnrollmentMetadata> {
        serde_json::from_value(self.metadata.clone()).ok()
    }
}

/// Metadata carried by enrollment tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentMetadata {
    pub training_id: TrainingId,
}

impl EnrollmentMetadata {
    pub fn to_value(self) -> serde_json::Value {
        serde_json::json!({ "training_id": self.training_id.0 })
    }
}

/// Why a token failed validation. Checked in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    NotFound,
    AlreadyUsed,
    Expired,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyUsed => "already_used",
            Self::Expired => "expired",
        }
    }
}

/// Read-only view of a token used by the polling page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStatus {
    pub exists: bool,
    pub used: bool,
    pub expired: bool,
    pub superseded: bool,
}

/// Client-facing state derived from a [`TokenStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Pending,
    Verified,
    Expired,
}

impl TokenStatus {
    /// Map to a poll state. `None` when the token does not exist.
    ///
    /// A superseded token can never succeed, so the waiting page treats
    /// it like an expired one and offers a resend.
    pub fn poll_state(&self) -> Option<PollState> {
        if !self.exists {
            return None;
        }
        if self.superseded {
            return Some(PollState::Expired);
        }
        if self.used {
            return Some(PollState::Verified);
        }
        if self.expired {
            return Some(PollState::Expired);
        }
        Some(PollState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_tags_roundtrip() {
        for purpose in [
            TokenPurpose::Enrollment,
            TokenPurpose::Recovery,
            TokenPurpose::EmailChange,
        ] {
            assert_eq!(TokenPurpose::parse(purpose.as_str()), Some(purpose));
        }
        assert_eq!(TokenPurpose::parse("password"), None);
    }

    #[test]
    fn test_poll_state_mapping() {
        let missing = TokenStatus::default();
        assert_eq!(missing.poll_state(), None);

        let pending = TokenStatus { exists: true, ..Default::default() };
        assert_eq!(pending.poll_state(), Some(PollState::Pending));

        let verified_then_expired = TokenStatus {
            exists: true,
            used: true,
            expired: true,
            superseded: false,
        };
        assert_eq!(verified_then_expired.poll_state(), Some(PollState::Verified));

        let superseded = TokenStatus {
            exists: true,
            used: true,
            expired: false,
            superseded: true,
        };
        assert_eq!(superseded.poll_state(), Some(PollState::Expired));
    }

    #[test]
    fn test_enrollment_metadata_decoding() {
        let record = TokenRecord {
            id: 1,
            digest: [7u8; 32],
            student_id: StudentId(9),
            email: "a@b.co".into(),
            purpose: TokenPurpose::Enrollment,
            metadata: EnrollmentMetadata { training_id: TrainingId(3) }.to_value(),
            created_at: 0,
            expires_at: 900,
            consumed: false,
            superseded: false,
            consumed_at: None,
            created_ip: None,
            consumed_ip: None,
        };
        assert_eq!(
            record.enrollment_metadata(),
            Some(EnrollmentMetadata { training_id: TrainingId(3) })
        );
        assert!(!record.is_expired_at(899));
        assert!(record.is_expired_at(900));

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["digest"].as_str().map(str::len), Some(64));
    }
}
