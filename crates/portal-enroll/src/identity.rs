//! Identity resolution.
//!
//! The national id is the natural key of a student. Resolving a submitted
//! identity either returns the existing row (updating changed profile
//! fields) or creates one. Email addresses are unique across students.
//!
//! Resolution is lookup-then-write without a lock spanning both steps.
//! Two concurrent first-time submissions for the same national id both
//! see "absent"; the loser's insert hits the unique index and surfaces as
//! [`EnrollError::DuplicateNationalId`].

use std::sync::Arc;

use portal_db::queries::{locations, students};
use portal_db::{DbError, Store, UniqueConstraint};
use portal_types::student::{Location, Student, StudentProfile};
use portal_types::StudentId;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::{EnrollError, Result};

/// Finds or creates students by national id.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl IdentityResolver {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Resolve a submitted identity to exactly one student id.
    ///
    /// Idempotent: resubmitting identical data returns the same id and
    /// writes nothing.
    pub fn resolve(&self, national_id: &str, profile: &StudentProfile) -> Result<StudentId> {
        let national_id = normalize_national_id(national_id)?;
        let profile = normalize_profile(profile)?;
        match self.lookup(&national_id)? {
            Some(existing) => self.update_existing(&existing, &profile),
            None => self.create(&national_id, &profile),
        }
    }

    /// Find a student by national id.
    pub fn lookup(&self, national_id: &str) -> Result<Option<Student>> {
        let national_id = normalize_national_id(national_id)?;
        Ok(self
            .store
            .with_conn(|conn| students::find_by_national_id(conn, &national_id))?)
    }

    /// Insert a new student. Fails if the national id or email is taken.
    pub fn create(&self, national_id: &str, profile: &StudentProfile) -> Result<StudentId> {
        let national_id = normalize_national_id(national_id)?;
        let profile = normalize_profile(profile)?;
        let now = self.clock.now();

        self.store.with_conn(|conn| -> Result<StudentId> {
            if let Some(holder) = students::find_by_email(conn, &profile.email)? {
                return Err(if holder.national_id == national_id {
                    EnrollError::DuplicateNationalId
                } else {
                    EnrollError::DuplicateEmail {
                        email: profile.email.clone(),
                    }
                });
            }
            match students::insert(conn, &national_id, &profile, now) {
                Ok(id) => {
                    info!(student_id = %id, "Created student");
                    Ok(id)
                }
                Err(DbError::Duplicate(constraint)) => {
                    warn!(?constraint, "Student insert lost a race");
                    Err(classify_duplicate(conn, &national_id, &profile.email)?)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// The student row for `id`.
    pub fn student(&self, id: StudentId) -> Result<Student> {
        self.store.with_conn(|conn| {
            students::get(conn, id).map_err(|e| match e {
                DbError::NotFound(what) => EnrollError::NotFound {
                    field: "student_id",
                    detail: what,
                },
                other => other.into(),
            })
        })
    }

    /// Fail unless `email` is free or already belongs to `owner`.
    pub fn ensure_email_available(&self, email: &str, owner: Option<StudentId>) -> Result<()> {
        let email = normalize_email(email)?;
        self.store.with_conn(|conn| -> Result<()> {
            match students::find_by_email(conn, &email)? {
                Some(holder) if Some(holder.id) != owner => Err(EnrollError::DuplicateEmail { email }),
                _ => Ok(()),
            }
        })
    }

    /// Create or replace the student's location.
    pub fn upsert_location(&self, student_id: StudentId, location: &Location) -> Result<()> {
        let location = Location {
            street: location.street.trim().to_string(),
            ..location.clone()
        };
        let now = self.clock.now();
        Ok(self
            .store
            .with_conn(|conn| locations::upsert(conn, student_id, &location, now))?)
    }

    fn update_existing(&self, existing: &Student, profile: &StudentProfile) -> Result<StudentId> {
        if !existing.differs_from(profile) {
            return Ok(existing.id);
        }
        let email_changed = existing.email != profile.email;
        let now = self.clock.now();

        self.store.with_conn(|conn| -> Result<StudentId> {
            if email_changed {
                if let Some(holder) = students::find_by_email(conn, &profile.email)? {
                    if holder.id != existing.id {
                        return Err(EnrollError::DuplicateEmail {
                            email: profile.email.clone(),
                        });
                    }
                }
            }
            students::update_profile(conn, existing.id, profile, email_changed, now).map_err(
                |e| match e {
                    DbError::Duplicate(UniqueConstraint::StudentEmail) => EnrollError::DuplicateEmail {
                        email: profile.email.clone(),
                    },
                    other => other.into(),
                },
            )?;
            info!(student_id = %existing.id, email_changed, "Updated student profile");
            Ok(existing.id)
        })
    }
}

/// Decide which key a failed insert collided on.
fn classify_duplicate(conn: &Connection, national_id: &str, email: &str) -> Result<EnrollError> {
    Ok(match students::find_by_national_id(conn, national_id)? {
        Some(_) => EnrollError::DuplicateNationalId,
        None => EnrollError::DuplicateEmail {
            email: email.to_string(),
        },
    })
}

pub fn normalize_national_id(national_id: &str) -> Result<String> {
    let national_id = national_id.trim();
    if national_id.is_empty() {
        return Err(invalid("national_id", "must not be empty"));
    }
    if national_id.chars().any(char::is_whitespace) {
        return Err(invalid("national_id", "must not contain spaces"));
    }
    Ok(national_id.to_string())
}

/// Trim every field and lowercase the email.
pub fn normalize_profile(profile: &StudentProfile) -> Result<StudentProfile> {
    let full_name = profile.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(invalid("full_name", "must not be empty"));
    }
    let phone = profile
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    Ok(StudentProfile {
        full_name,
        name_on_id: profile.name_on_id.trim().to_string(),
        email: normalize_email(&profile.email)?,
        phone,
    })
}

pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid("email", "must contain @"));
    };
    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(invalid("email", "is not a valid address"));
    }
    let labels_ok = domain.split('.').count() >= 2 && domain.split('.').all(|l| !l.is_empty());
    if !labels_ok {
        return Err(invalid("email", "domain is not valid"));
    }
    Ok(email)
}

fn invalid(field: &'static str, reason: &str) -> EnrollError {
    EnrollError::InvalidInput {
        field,
        reason: reason.to_string(),
    }
}
