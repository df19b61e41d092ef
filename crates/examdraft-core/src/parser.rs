//! TOML exam parser.
//!
//! Loads exam definitions from TOML files and directories, and validates them.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::model::{ExamDefinition, ExamQuestion, QuestionKind, QuestionType};

/// Intermediate TOML structure for parsing exam files.
#[derive(Debug, Deserialize)]
struct TomlExamFile {
    exam: TomlExamHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    id: String,
    title: String,
    #[serde(default)]
    level: String,
    #[serde(default)]
    language: String,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    #[serde(rename = "type")]
    question_type: String,
    prompt: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct: Option<TomlCorrect>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    rubric: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlCorrect {
    One(usize),
    Many(Vec<usize>),
}

/// Parse a single TOML file into an `ExamDefinition`.
pub fn parse_exam(path: &Path) -> Result<ExamDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read exam file: {}", path.display()))?;

    parse_exam_str(&content, path)
}

/// Parse a TOML string into an `ExamDefinition` (useful for testing).
pub fn parse_exam_str(content: &str, source_path: &Path) -> Result<ExamDefinition> {
    let parsed: TomlExamFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .enumerate()
        .map(|(index, q)| {
            build_question(q).with_context(|| {
                format!(
                    "invalid question {index} in exam '{}' ({})",
                    parsed.exam.id,
                    source_path.display()
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExamDefinition {
        id: parsed.exam.id,
        title: parsed.exam.title,
        level: parsed.exam.level,
        language: parsed.exam.language,
        questions,
    })
}

fn build_question(q: TomlQuestion) -> Result<ExamQuestion> {
    let question_type: QuestionType = q
        .question_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{}", e))?;

    let option_count = q.options.len();
    let check_option = |option: usize| -> Result<usize> {
        if option >= option_count {
            bail!("correct option {option} does not exist ({option_count} options)");
        }
        Ok(option)
    };

    let kind = match question_type {
        QuestionType::Unique => {
            let correct = match q.correct {
                Some(TomlCorrect::One(option)) => check_option(option)?,
                Some(TomlCorrect::Many(_)) => bail!("unique question takes a single correct option"),
                None => bail!("unique question needs `correct`"),
            };
            QuestionKind::Unique {
                options: q.options,
                correct,
            }
        }
        QuestionType::Multiple => {
            let mut correct = match q.correct {
                Some(TomlCorrect::Many(options)) => options,
                Some(TomlCorrect::One(option)) => vec![option],
                None => bail!("multiple question needs `correct`"),
            };
            for &option in &correct {
                check_option(option)?;
            }
            correct.sort_unstable();
            correct.dedup();
            QuestionKind::Multiple {
                options: q.options,
                correct,
            }
        }
        QuestionType::FillInBlank => QuestionKind::FillInBlank {
            answer: q.answer.context("fillInBlank question needs `answer`")?,
        },
        QuestionType::TranslateText => QuestionKind::TranslateText {
            reference: q.reference.unwrap_or_default(),
        },
    };

    Ok(ExamQuestion {
        prompt: q.prompt,
        kind,
        explanation: q.explanation,
        tags: q.tags,
        rubric: q.rubric,
    })
}

/// Recursively load all `.toml` exam files from a directory.
pub fn load_exam_dir(dir: &Path) -> Result<Vec<ExamDefinition>> {
    let mut exams = Vec::new();

    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            exams.extend(load_exam_dir(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_exam(&path) {
                Ok(exam) => exams.push(exam),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(exams)
}

/// A warning from exam validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The question index (if applicable).
    pub question: Option<usize>,
    /// Warning message.
    pub message: String,
}

/// Check an exam for issues that do not prevent loading it.
pub fn validate_exam(exam: &ExamDefinition) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if exam.questions.is_empty() {
        warnings.push(ValidationWarning {
            question: None,
            message: "exam has no questions and cannot be attempted".into(),
        });
    }

    for (index, question) in exam.questions.iter().enumerate() {
        if question.prompt.trim().is_empty() {
            warnings.push(ValidationWarning {
                question: Some(index),
                message: "prompt is empty".into(),
            });
        }

        match &question.kind {
            QuestionKind::Unique { options, .. } | QuestionKind::Multiple { options, .. }
                if options.len() < 2 =>
            {
                warnings.push(ValidationWarning {
                    question: Some(index),
                    message: format!("choice question has {} option(s)", options.len()),
                });
            }
            QuestionKind::FillInBlank { answer } if answer.trim().is_empty() => {
                warnings.push(ValidationWarning {
                    question: Some(index),
                    message: "fillInBlank answer is empty, no answer can match".into(),
                });
            }
            _ => {}
        }
    }

    warnings
}
