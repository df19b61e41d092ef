//! Core data model types for examdraft.
//!
//! Exam definitions are immutable input owned by the host application. The
//! engine only reads them, so they are shared as `Arc<ExamDefinition>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An exam as supplied by the exam source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamDefinition {
    /// Unique identifier for this exam.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Proficiency level (e.g. "A2", "B1").
    #[serde(default)]
    pub level: String,
    /// Language being examined (e.g. "fr").
    #[serde(default)]
    pub language: String,
    /// Questions in authoring order.
    #[serde(default)]
    pub questions: Vec<ExamQuestion>,
}

impl ExamDefinition {
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn question(&self, index: usize) -> Option<&ExamQuestion> {
        self.questions.get(index)
    }
}

/// A single exam question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
    /// The question text shown to the user.
    pub prompt: String,
    /// Type-specific content and the expected answer.
    pub kind: QuestionKind,
    /// Explanation shown after grading.
    #[serde(default)]
    pub explanation: String,
    /// Tags for filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Feedback for this question comes from a rubric applied by the grader.
    #[serde(default)]
    pub rubric: bool,
}

impl ExamQuestion {
    pub fn question_type(&self) -> QuestionType {
        self.kind.question_type()
    }

    /// Whether this question can only be scored by the grading collaborator.
    pub fn is_externally_graded(&self) -> bool {
        self.rubric || matches!(self.kind, QuestionKind::TranslateText { .. })
    }
}

/// Question content, keyed by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QuestionKind {
    /// Select every correct option.
    Multiple {
        options: Vec<String>,
        correct: Vec<usize>,
    },
    /// Select exactly one option.
    Unique { options: Vec<String>, correct: usize },
    /// Type the missing word or phrase.
    FillInBlank { answer: String },
    /// Translate free text; graded externally.
    TranslateText { reference: String },
}

impl QuestionKind {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionKind::Multiple { .. } => QuestionType::Multiple,
            QuestionKind::Unique { .. } => QuestionType::Unique,
            QuestionKind::FillInBlank { .. } => QuestionType::FillInBlank,
            QuestionKind::TranslateText { .. } => QuestionType::TranslateText,
        }
    }

    /// Number of selectable options, for choice questions.
    pub fn option_count(&self) -> Option<usize> {
        match self {
            QuestionKind::Multiple { options, .. } | QuestionKind::Unique { options, .. } => {
                Some(options.len())
            }
            QuestionKind::FillInBlank { .. } | QuestionKind::TranslateText { .. } => None,
        }
    }
}

/// The four question type variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuestionType {
    Multiple,
    Unique,
    FillInBlank,
    TranslateText,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::Multiple => write!(f, "multiple"),
            QuestionType::Unique => write!(f, "unique"),
            QuestionType::FillInBlank => write!(f, "fillInBlank"),
            QuestionType::TranslateText => write!(f, "translateText"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "multiple" => Ok(QuestionType::Multiple),
            "unique" | "single" => Ok(QuestionType::Unique),
            "fillinblank" | "fill_in_blank" | "fill-in-blank" => Ok(QuestionType::FillInBlank),
            "translatetext" | "translate_text" | "translate" => Ok(QuestionType::TranslateText),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// A user's answer to one question.
///
/// Serialized untagged so a draft slot on the wire is a number, an array of
/// numbers, or a string. Absent slots are `Option::None` (JSON `null`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    /// Selected option for a `unique` question.
    Choice(usize),
    /// Selected options for a `multiple` question.
    Choices(Vec<usize>),
    /// Free text for `fillInBlank` and `translateText` questions.
    Text(String),
}

impl AnswerValue {
    /// Whether this value has the legal shape for `question_type`.
    pub fn fits(&self, question_type: QuestionType) -> bool {
        matches!(
            (self, question_type),
            (AnswerValue::Choice(_), QuestionType::Unique)
                | (AnswerValue::Choices(_), QuestionType::Multiple)
                | (AnswerValue::Text(_), QuestionType::FillInBlank)
                | (AnswerValue::Text(_), QuestionType::TranslateText)
        )
    }

    /// Short name of the shape, used in error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            AnswerValue::Choice(_) => "number",
            AnswerValue::Choices(_) => "number sequence",
            AnswerValue::Text(_) => "string",
        }
    }
}

/// Per-attempt options chosen when an attempt starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOptions {
    /// Time limit in minutes; 0 means untimed.
    #[serde(default)]
    pub time_limit_minutes: u32,
    /// Present questions in a per-attempt shuffled order.
    #[serde(default)]
    pub shuffle_questions: bool,
}
