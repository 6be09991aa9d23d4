//! Program model
//!
//! An enrichment program guardians can enrol students in.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Program entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub location: Option<String>,
    /// Free-form meeting pattern, e.g. "Tuesdays 3:30-5pm"
    pub schedule: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Maximum pending + confirmed registrations; `None` is unlimited
    pub capacity: Option<i32>,
    pub price_cents: i64,
    pub min_grade: Option<i32>,
    pub max_grade: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    pub fn from_input(input: ProgramInput) -> Self {
        let now = Utc::now();
        let mut program = Self {
            id: 0,
            name: String::new(),
            description: String::new(),
            location: None,
            schedule: None,
            start_date: None,
            end_date: None,
            capacity: None,
            price_cents: 0,
            min_grade: None,
            max_grade: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        program.apply(input);
        program
    }

    /// Replace the editable fields with `input`
    pub fn apply(&mut self, input: ProgramInput) {
        self.name = input.name.trim().to_string();
        self.description = input.description.unwrap_or_default();
        self.location = input.location.filter(|s| !s.trim().is_empty());
        self.schedule = input.schedule.filter(|s| !s.trim().is_empty());
        self.start_date = input.start_date;
        self.end_date = input.end_date;
        self.capacity = input.capacity;
        self.price_cents = input.price_cents.unwrap_or(0);
        self.min_grade = input.min_grade;
        self.max_grade = input.max_grade;
        if let Some(active) = input.is_active {
            self.is_active = active;
        }
    }

    /// Whether a student in `grade` falls inside the program's grade band.
    ///
    /// A program without a band accepts everyone. A student without a
    /// recorded grade is only accepted by programs without a band.
    pub fn accepts_grade(&self, grade: Option<i32>) -> bool {
        if self.min_grade.is_none() && self.max_grade.is_none() {
            return true;
        }
        let Some(grade) = grade else {
            return false;
        };
        self.min_grade.map_or(true, |min| grade >= min)
            && self.max_grade.map_or(true, |max| grade <= max)
    }

    /// Spots left given the number of seat-holding registrations
    pub fn spots_remaining(&self, enrolled: i64) -> Option<i64> {
        self.capacity
            .map(|capacity| (capacity as i64 - enrolled).max(0))
    }

    /// Whether another seat-holding registration fits
    pub fn has_room(&self, enrolled: i64) -> bool {
        self.capacity.map_or(true, |capacity| enrolled < capacity as i64)
    }
}

/// Editable program fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub capacity: Option<i32>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub min_grade: Option<i32>,
    #[serde(default)]
    pub max_grade: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Program as listed publicly, with its current enrolment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramSummary {
    #[serde(flatten)]
    pub program: Program,
    /// Pending + confirmed registrations
    pub enrolled: i64,
    pub spots_remaining: Option<i64>,
}

impl ProgramSummary {
    pub fn new(program: Program, enrolled: i64) -> Self {
        let spots_remaining = program.spots_remaining(enrolled);
        Self {
            program,
            enrolled,
            spots_remaining,
        }
    }
}
