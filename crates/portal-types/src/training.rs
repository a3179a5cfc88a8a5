//! Training catalog entries as seen by the enrollment flow.

use serde::{Deserialize, Serialize};

use crate::TrainingId;

/// A training that students can enroll into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Training {
    pub id: TrainingId,
    pub name: String,
    /// Deactivated trainings accept no enrollments.
    pub active: bool,
    /// Absent means unbounded on that side.
    pub enrollment_opens_at: Option<u64>,
    pub enrollment_closes_at: Option<u64>,
}

/// Where `now` falls relative to a training's enrollment window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowPosition {
    BeforeOpen,
    Open,
    AfterClose,
}

impl Training {
    /// Locate `now` within `[enrollment_opens_at, enrollment_closes_at]`.
    pub fn window_position(&self, now: u64) -> WindowPosition {
        if let Some(opens) = self.enrollment_opens_at {
            if now < opens {
                return WindowPosition::BeforeOpen;
            }
        }
        if let Some(closes) = self.enrollment_closes_at {
            if now > closes {
                return WindowPosition::AfterClose;
            }
        }
        WindowPosition::Open
    }
}
