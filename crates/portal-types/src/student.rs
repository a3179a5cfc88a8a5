//! Student identity, contact and location structures.

use serde::{Deserialize, Serialize};

use crate::StudentId;

/// Profile fields submitted with an enrollment form.
///
/// Everything here except the national id is mutable: a returning student
/// may correct their name or switch to a new email address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct StudentProfile {
    /// Full legal name.
    pub full_name: String,
    /// Name exactly as printed on the identity card.
    #[serde(default)]
    pub name_on_id: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Administrative location of a student. One row per student.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct Location {
    #[serde(default)]
    pub province_id: Option<i64>,
    #[serde(default)]
    pub district_id: Option<i64>,
    #[serde(default)]
    pub sub_district_id: Option<i64>,
    /// Free-text street line.
    #[serde(default)]
    pub street: String,
}

/// A persisted student.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    /// Unique and immutable once created.
    pub national_id: String,
    pub full_name: String,
    pub name_on_id: String,
    /// Unique across all students.
    pub email: String,
    pub phone: Option<String>,
    /// Set by a successful token consumption.
    pub email_verified: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Student {
    /// True if the submitted profile differs from what is stored.
    pub fn differs_from(&self, profile: &StudentProfile) -> bool {
        self.full_name != profile.full_name
            || self.name_on_id != profile.name_on_id
            || self.email != profile.email
            || self.phone != profile.phone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> Student {
        Student {
            id: StudentId(1),
            national_id: "1100700000001".into(),
            full_name: "Somchai Jaidee".into(),
            name_on_id: "SOMCHAI JAIDEE".into(),
            email: "somchai@example.org".into(),
            phone: Some("0812345678".into()),
            email_verified: false,
            created_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn test_unchanged_profile_does_not_differ() {
        let s = student();
        let profile = StudentProfile {
            full_name: s.full_name.clone(),
            name_on_id: s.name_on_id.clone(),
            email: s.email.clone(),
            phone: s.phone.clone(),
        };
        assert!(!s.differs_from(&profile));
    }

    #[test]
    fn test_phone_change_differs() {
        let s = student();
        let profile = StudentProfile {
            full_name: s.full_name.clone(),
            name_on_id: s.name_on_id.clone(),
            email: s.email.clone(),
            phone: None,
        };
        assert!(s.differs_from(&profile));
    }

    #[test]
    fn test_location_defaults_from_json() {
        let loc: Location = serde_json::from_str(r#"{"street":"99 Moo 1"}"#).expect("parse");
        assert_eq!(loc.street, "99 Moo 1");
        assert!(loc.province_id.is_none());
    }
}
