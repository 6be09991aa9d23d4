//! Student model
//!
//! A child on a guardian's roster. Grades run from -1 (pre-K) through 12.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lowest accepted grade (pre-K)
pub const MIN_GRADE: i32 = -1;
/// Highest accepted grade
pub const MAX_GRADE: i32 = 12;

/// Student entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    /// Owning guardian's user ID
    pub guardian_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub grade: Option<i32>,
    pub school: Option<String>,
    pub medical_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    /// Build an unsaved student for `guardian_id` from input fields
    pub fn from_input(guardian_id: i64, input: StudentInput) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            guardian_id,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            date_of_birth: input.date_of_birth,
            grade: input.grade,
            school: non_empty(input.school),
            medical_notes: non_empty(input.medical_notes),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the editable fields with `input`
    pub fn apply(&mut self, input: StudentInput) {
        self.first_name = input.first_name.trim().to_string();
        self.last_name = input.last_name.trim().to_string();
        self.date_of_birth = input.date_of_birth;
        self.grade = input.grade;
        self.school = non_empty(input.school);
        self.medical_notes = non_empty(input.medical_notes);
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Human label for a grade number
pub fn grade_label(grade: i32) -> String {
    match grade {
        -1 => "Pre-K".to_string(),
        0 => "Kindergarten".to_string(),
        g => format!("Grade {}", g),
    }
}

/// Editable student fields, used for create and full update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentInput {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub grade: Option<i32>,
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub medical_notes: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_input_trims_and_drops_blank_optionals() {
        let student = Student::from_input(
            7,
            StudentInput {
                first_name: "  Ada ".to_string(),
                last_name: "Lovelace".to_string(),
                school: Some("   ".to_string()),
                medical_notes: Some(" peanut allergy ".to_string()),
                grade: Some(4),
                ..Default::default()
            },
        );

        assert_eq!(student.guardian_id, 7);
        assert_eq!(student.first_name, "Ada");
        assert_eq!(student.school, None);
        assert_eq!(student.medical_notes.as_deref(), Some("peanut allergy"));
        assert_eq!(student.full_name(), "Ada Lovelace");
    }

    #[test]
    fn test_grade_label() {
        assert_eq!(grade_label(-1), "Pre-K");
        assert_eq!(grade_label(0), "Kindergarten");
        assert_eq!(grade_label(5), "Grade 5");
    }
}
