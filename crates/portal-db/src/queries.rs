//! Database query functions organized by table.

pub mod enrollments;
pub mod locations;
pub mod students;
pub mod tokens;
pub mod trainings;
