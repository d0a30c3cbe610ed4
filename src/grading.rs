use serde::{Deserialize, Serialize};

/// Half-up rounding to 2 decimal places: `floor(100*x + 0.5) / 100`.
/// Applied once to each derived quantity before it is stored.
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    /// Fixed grade-point table. A closed match on the enum so the table
    /// cannot grow invalid keys at runtime.
    pub fn point(self) -> f64 {
        match self {
            Grade::APlus => 4.00,
            Grade::A => 3.75,
            Grade::B => 3.25,
            Grade::C => 2.75,
            Grade::D => 2.25,
            Grade::F => 0.00,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pass,
    Supplementary,
    Fail,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "Pass",
            Status::Supplementary => "Supplementary",
            Status::Fail => "Fail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamType {
    Regular,
    Supplementary,
    Improvement,
}

impl ExamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::Regular => "Regular",
            ExamType::Supplementary => "Supplementary",
            ExamType::Improvement => "Improvement",
        }
    }

    pub fn parse(s: &str) -> Option<ExamType> {
        match s {
            "Regular" => Some(ExamType::Regular),
            "Supplementary" => Some(ExamType::Supplementary),
            "Improvement" => Some(ExamType::Improvement),
            _ => None,
        }
    }
}

impl Default for ExamType {
    fn default() -> Self {
        ExamType::Regular
    }
}

/// One course entry as submitted by the caller. `marks` and `credit` are
/// validated before any derived quantity is computed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectEntry {
    pub subject_name: String,
    pub subject_code: String,
    pub marks: i64,
    pub credit: i64,
}

/// A subject after the Subject Grader has run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedSubject {
    pub subject_name: String,
    pub subject_code: String,
    pub marks: i64,
    pub credit: i64,
    pub grade: Grade,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradingError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradingError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub total_marks: i64,
    pub obtained_marks: i64,
    pub percentage: f64,
    pub cgpa: f64,
}

/// Fully derived result payload. Every field is a deterministic function
/// of the input subject sequence.
#[derive(Debug, Clone)]
pub struct ComputedResult {
    pub subjects: Vec<GradedSubject>,
    pub total_marks: i64,
    pub obtained_marks: i64,
    pub percentage: f64,
    pub cgpa: f64,
    pub grade: Grade,
    pub status: Status,
}

/// Letter grade for a single raw mark in [0,100].
/// Inclusive lower bounds, highest first; first match wins.
pub fn grade_for_marks(marks: i64) -> Grade {
    if marks >= 80 {
        Grade::APlus
    } else if marks >= 70 {
        Grade::A
    } else if marks >= 60 {
        Grade::B
    } else if marks >= 50 {
        Grade::C
    } else if marks >= 40 {
        Grade::D
    } else {
        Grade::F
    }
}

/// Overall letter grade for the rounded aggregate percentage. Same table
/// and tie-break order as `grade_for_marks`, over a decimal input.
pub fn grade_for_percentage(percentage: f64) -> Grade {
    if percentage >= 80.0 {
        Grade::APlus
    } else if percentage >= 70.0 {
        Grade::A
    } else if percentage >= 60.0 {
        Grade::B
    } else if percentage >= 50.0 {
        Grade::C
    } else if percentage >= 40.0 {
        Grade::D
    } else {
        Grade::F
    }
}

pub fn validate_subjects(subjects: &[SubjectEntry]) -> Result<(), GradingError> {
    for (i, s) in subjects.iter().enumerate() {
        if s.subject_name.trim().is_empty() {
            return Err(GradingError::new("bad_params", "subjectName must not be empty")
                .with_details(serde_json::json!({ "index": i, "field": "subjectName" })));
        }
        if s.subject_code.trim().is_empty() {
            return Err(GradingError::new("bad_params", "subjectCode must not be empty")
                .with_details(serde_json::json!({ "index": i, "field": "subjectCode" })));
        }
        if !(0..=100).contains(&s.marks) {
            return Err(GradingError::new("bad_params", "marks must be in [0,100]")
                .with_details(serde_json::json!({
                    "index": i,
                    "field": "marks",
                    "value": s.marks
                })));
        }
        if !(1..=5).contains(&s.credit) {
            return Err(GradingError::new("bad_params", "credit must be in [1,5]")
                .with_details(serde_json::json!({
                    "index": i,
                    "field": "credit",
                    "value": s.credit
                })));
        }
    }
    Ok(())
}

/// Totals, percentage, and credit-weighted CGPA over graded subjects.
/// Each subject is out of 100 regardless of credit; credit only weights
/// the CGPA mean. Rounding happens once per derived quantity.
pub fn aggregate(subjects: &[GradedSubject]) -> Aggregate {
    let total_marks = 100 * subjects.len() as i64;
    let obtained_marks: i64 = subjects.iter().map(|s| s.marks).sum();

    let percentage = if total_marks > 0 {
        round2(100.0 * obtained_marks as f64 / total_marks as f64)
    } else {
        0.0
    };

    let total_credits: i64 = subjects.iter().map(|s| s.credit).sum();
    let cgpa = if total_credits > 0 {
        let grade_points: f64 = subjects
            .iter()
            .map(|s| s.grade.point() * s.credit as f64)
            .sum();
        round2(grade_points / total_credits as f64)
    } else {
        0.0
    };

    Aggregate {
        total_marks,
        obtained_marks,
        percentage,
        cgpa,
    }
}

/// Pass/Supplementary/Fail from the count of failed subjects. The
/// per-subject failure count is authoritative; the aggregate percentage
/// plays no part here.
pub fn classify(subjects: &[GradedSubject]) -> Status {
    let failed = subjects.iter().filter(|s| s.grade == Grade::F).count();
    if failed == 0 {
        Status::Pass
    } else if failed <= 2 {
        Status::Supplementary
    } else {
        Status::Fail
    }
}

/// Single entry point for every write path. Validates, grades each
/// subject, then derives totals, overall grade, and status in that order.
/// An empty subject list is valid and yields zero totals and Pass.
pub fn compute(subjects: Vec<SubjectEntry>) -> Result<ComputedResult, GradingError> {
    validate_subjects(&subjects)?;

    let graded: Vec<GradedSubject> = subjects
        .into_iter()
        .map(|s| GradedSubject {
            grade: grade_for_marks(s.marks),
            subject_name: s.subject_name,
            subject_code: s.subject_code,
            marks: s.marks,
            credit: s.credit,
        })
        .collect();

    let agg = aggregate(&graded);
    let grade = grade_for_percentage(agg.percentage);
    let status = classify(&graded);

    Ok(ComputedResult {
        subjects: graded,
        total_marks: agg.total_marks,
        obtained_marks: agg.obtained_marks,
        percentage: agg.percentage,
        cgpa: agg.cgpa,
        grade,
        status,
    })
}
