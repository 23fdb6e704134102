//! Core data models used throughout formfill.
//!
//! These types represent the profile entries, classifications, and
//! conversation records that flow through the answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One indexed unit of profile content: a dotted-path key, the rendered
/// text for that field, and an optional embedding vector.
///
/// Entries with `vector = None` failed to embed and are excluded from
/// retrieval but kept so the index stays a complete view of the profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEntry {
    /// Dotted path with index suffixes, e.g. `experiences[2].employment_period`.
    pub key: String,
    /// Paraphrase-expanded rendering of the field value.
    pub text: String,
    pub vector: Option<Vec<f32>>,
}

/// A single chat message in provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Closed set of question categories the classifier may emit.
///
/// Unknown strings collapse to `General` rather than failing the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    LanguageProficiency,
    SkillLevel,
    YearsExperience,
    Education,
    Personal,
    Salary,
    Availability,
    NoticePeriod,
    VisaStatus,
    General,
}

impl QuestionType {
    /// Parse a classifier-emitted string, collapsing anything unknown to `General`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "language_proficiency" => Self::LanguageProficiency,
            "skill_level" => Self::SkillLevel,
            "years_experience" => Self::YearsExperience,
            "education" => Self::Education,
            "personal" => Self::Personal,
            "salary" => Self::Salary,
            "availability" => Self::Availability,
            "notice_period" => Self::NoticePeriod,
            "visa_status" => Self::VisaStatus,
            _ => Self::General,
        }
    }
}

/// Answer shape the form field expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedFormat {
    Text,
    Number,
    Selection,
    Boolean,
}

impl ExpectedFormat {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "number" => Self::Number,
            "selection" => Self::Selection,
            "boolean" => Self::Boolean,
            _ => Self::Text,
        }
    }
}

/// Result of classifying one form question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub question_type: QuestionType,
    pub keywords: Vec<String>,
    /// ISO language code of the question, e.g. `en` or `de`.
    pub language: String,
    pub expected_format: ExpectedFormat,
    /// In `[0, 1]`; heuristic fallbacks report low confidence.
    pub confidence: f64,
}

/// The job posting an answering session is attached to.
///
/// Used only for labelling conversation records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobContext {
    pub company: String,
    pub title: String,
    pub location: String,
    pub description: String,
}

/// One persisted question/answer exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub company: String,
    pub job_title: String,
    /// Cleaned question text truncated to 50 characters.
    pub question_id: String,
    pub messages: Vec<ChatMessage>,
    pub answer: String,
    pub options: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

/// Summary returned by a full profile ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Entries produced by the renderer.
    pub total: usize,
    /// Entries that received a vector.
    pub embedded: usize,
    /// Entries retained without a vector after an embedding failure.
    pub failed: usize,
    /// Store chunks written when the serialised index crossed the spill threshold.
    pub chunks_spilled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_type_unknown_collapses_to_general() {
        assert_eq!(QuestionType::from_wire("salary"), QuestionType::Salary);
        assert_eq!(QuestionType::from_wire("quiz"), QuestionType::General);
        assert_eq!(QuestionType::from_wire(""), QuestionType::General);
    }

    #[test]
    fn test_expected_format_defaults_to_text() {
        assert_eq!(ExpectedFormat::from_wire("number"), ExpectedFormat::Number);
        assert_eq!(ExpectedFormat::from_wire("mystery"), ExpectedFormat::Text);
    }

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
        assert_eq!(ChatMessage::assistant("x").role, "assistant");
    }
}
