//! # portal-types
//!
//! Shared domain types for the training portal's enrollment subsystem:
//! students and their locations, trainings, verification tokens, and the
//! request/response shapes exchanged with the web UI.
//!
//! All timestamps are Unix epoch seconds (u64).

pub mod api;
pub mod student;
pub mod token;
pub mod training;

use serde::{Deserialize, Serialize};

/// Default lifetime of a verification token, in minutes.
pub const DEFAULT_TOKEN_TTL_MINUTES: u32 = 15;

/// Default retention before expired tokens are swept, in days.
pub const DEFAULT_TOKEN_RETENTION_DAYS: u32 = 30;

/// Default minimum interval between two resends for the same student and purpose.
pub const DEFAULT_RESEND_INTERVAL_SECS: u64 = 60;

/// Interval at which the waiting page polls token status.
pub const POLL_INTERVAL_SECS: u64 = 3;

/// Size of a token secret in bytes (256 bits).
pub const TOKEN_SECRET_BYTES: usize = 32;

/// Length of the hex-encoded token carried in links.
pub const TOKEN_HEX_LEN: usize = TOKEN_SECRET_BYTES * 2;

/// Seconds per day.
pub const SECS_PER_DAY: u64 = 86_400;

/// Row id of a student.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub i64);

/// Row id of a training in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingId(pub i64);

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for TrainingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
