//! Integration test fixtures for the enrollment portal.
//!
//! The tests under `tests/` drive the [`Portal`] facade end to end against
//! an in-memory store, a manual clock and an in-memory outbox.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p portal-integration-tests
//! ```

use std::sync::Arc;

use portal_db::queries::{enrollments, students, tokens, trainings};
use portal_db::Store;
use portal_enroll::catalog::StoreCatalog;
use portal_enroll::clock::ManualClock;
use portal_enroll::mail::{LinkBuilder, Mailer, Outbox};
use portal_enroll::{Policy, Portal};
use portal_types::api::EnrollRequest;
use portal_types::student::{Location, Student, StudentProfile};
use portal_types::token::TokenPurpose;
use portal_types::{StudentId, TrainingId};

/// Simulated base timestamp.
pub const BASE_TIME: u64 = 1_700_000_000;

/// A portal wired to in-memory collaborators.
pub struct Fixture {
    pub store: Store,
    pub clock: Arc<ManualClock>,
    pub outbox: Arc<Outbox>,
    pub portal: Portal,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Store::open_memory().expect("in-memory store");
        let clock = Arc::new(ManualClock::new(BASE_TIME));
        let outbox = Arc::new(Outbox::new());
        let mailer = Mailer::new(
            outbox.clone(),
            LinkBuilder::new("https://portal.example.org", "/enroll/verify", "/enroll/waiting"),
            "Example Institute",
        );
        let portal = Portal::new(
            store.clone(),
            clock.clone(),
            Arc::new(StoreCatalog::new(store.clone())),
            mailer,
            Policy::default(),
        );
        Self {
            store,
            clock,
            outbox,
            portal,
        }
    }

    /// An active training with no enrollment window bounds.
    pub fn open_training(&self, name: &str) -> TrainingId {
        self.store
            .with_conn(|conn| trainings::insert(conn, name, true, None, None, BASE_TIME))
            .expect("insert training")
    }

    pub fn student(&self, national_id: &str) -> Option<Student> {
        self.store
            .with_conn(|conn| students::find_by_national_id(conn, national_id))
            .expect("find student")
    }

    pub fn student_count(&self) -> u64 {
        self.store
            .with_conn(|conn| students::count(conn))
            .expect("count students")
    }

    pub fn is_enrolled(&self, student_id: StudentId, training_id: TrainingId) -> bool {
        self.store
            .with_conn(|conn| enrollments::exists(conn, student_id, training_id))
            .expect("enrollment lookup")
    }

    pub fn enrollment_count(&self, training_id: TrainingId) -> u64 {
        self.store
            .with_conn(|conn| enrollments::count_for_training(conn, training_id))
            .expect("count enrollments")
    }

    pub fn token_count(&self, student_id: StudentId, purpose: TokenPurpose) -> u64 {
        self.store
            .with_conn(|conn| tokens::count_for_student(conn, student_id, purpose))
            .expect("count tokens")
    }

    pub fn mark_verified(&self, student: &Student) {
        self.store
            .with_conn(|conn| students::mark_email_verified(conn, student.id, &student.email, BASE_TIME))
            .expect("mark verified");
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// An enrollment form for `national_id` / `email`.
pub fn enroll_request(national_id: &str, email: &str, training_id: TrainingId) -> EnrollRequest {
    EnrollRequest {
        national_id: national_id.to_string(),
        profile: StudentProfile {
            full_name: "Ana Costa".to_string(),
            name_on_id: "ANA COSTA".to_string(),
            email: email.to_string(),
            phone: None,
        },
        location: Location {
            province_id: Some(11),
            district_id: Some(1101),
            sub_district_id: None,
            street: "Rua das Flores, 12".to_string(),
        },
        training_id: training_id.0,
    }
}
