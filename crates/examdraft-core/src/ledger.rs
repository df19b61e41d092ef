//! Per-question answer ledger and local exact-match scoring.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::model::{AnswerValue, ExamDefinition, ExamQuestion, QuestionKind};
use crate::results::{AttemptResult, QuestionFeedback, QuestionOutcome};

/// Holds one answer slot per question of an exam.
#[derive(Debug, Clone)]
pub struct AnswerLedger {
    exam: Arc<ExamDefinition>,
    answers: Vec<Option<AnswerValue>>,
}

impl AnswerLedger {
    /// An empty ledger: every slot absent.
    pub fn new(exam: Arc<ExamDefinition>) -> Self {
        let answers = vec![None; exam.question_count()];
        Self { exam, answers }
    }

    /// Rebuild a ledger from reconciled draft answers.
    ///
    /// Slots whose value no longer fits the question (the exam was edited
    /// between save and resume) are reset to absent.
    pub fn from_draft_answers(exam: Arc<ExamDefinition>, answers: &[Option<AnswerValue>]) -> Self {
        let mut ledger = Self::new(exam);
        for (index, value) in answers.iter().enumerate().take(ledger.answers.len()) {
            let Some(value) = value else { continue };
            if let Err(e) = ledger.set_answer(index, value.clone()) {
                tracing::warn!(index, "dropping stale draft answer: {e}");
            }
        }
        ledger
    }

    /// Record an answer after checking its shape against the question.
    ///
    /// On error the ledger is left unchanged.
    pub fn set_answer(&mut self, index: usize, value: AnswerValue) -> Result<(), ValidationError> {
        let question = self.question(index)?;
        let value = validate(index, question, value)?;
        self.answers[index] = Some(value);
        Ok(())
    }

    /// Reset a slot to absent.
    pub fn clear_answer(&mut self, index: usize) -> Result<(), ValidationError> {
        self.question(index)?;
        self.answers[index] = None;
        Ok(())
    }

    pub fn answer(&self, index: usize) -> Option<&AnswerValue> {
        self.answers.get(index).and_then(Option::as_ref)
    }

    pub fn answers(&self) -> &[Option<AnswerValue>] {
        &self.answers
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    /// True iff no slot is absent.
    pub fn is_complete(&self) -> bool {
        self.answers.iter().all(Option::is_some)
    }

    /// Whether any question needs the grading collaborator to be scored.
    pub fn requires_external_grading(&self) -> bool {
        self.exam.questions.iter().any(ExamQuestion::is_externally_graded)
    }

    /// Score every locally gradeable question by exact match.
    ///
    /// Externally graded questions are reported as `PendingExternal` and
    /// contribute nothing to the score.
    pub fn score_locally(&self, graded_at: DateTime<Utc>) -> AttemptResult {
        let feedback: Vec<QuestionFeedback> = self
            .exam
            .questions
            .iter()
            .zip(&self.answers)
            .enumerate()
            .map(|(index, (question, answer))| grade_question(index, question, answer.as_ref()))
            .collect();

        let total = feedback.len();
        let earned: f64 = feedback.iter().filter_map(|f| f.score).sum();
        let score = if total == 0 {
            0.0
        } else {
            earned / total as f64 * 100.0
        };

        AttemptResult {
            score,
            max_score: 100.0,
            feedback,
            graded_at,
        }
    }

    fn question(&self, index: usize) -> Result<&ExamQuestion, ValidationError> {
        self.exam
            .question(index)
            .ok_or(ValidationError::IndexOutOfRange {
                index,
                len: self.exam.question_count(),
            })
    }
}

fn validate(
    index: usize,
    question: &ExamQuestion,
    value: AnswerValue,
) -> Result<AnswerValue, ValidationError> {
    if !value.fits(question.question_type()) {
        return Err(ValidationError::ShapeMismatch {
            index,
            expected: question.question_type(),
            actual: value.shape(),
        });
    }

    let options = question.kind.option_count().unwrap_or(0);
    let out_of_range = |option: usize| ValidationError::OptionOutOfRange {
        index,
        option,
        options,
    };

    match value {
        AnswerValue::Choice(option) if option >= options => Err(out_of_range(option)),
        AnswerValue::Choices(mut selected) => {
            if let Some(&option) = selected.iter().find(|&&o| o >= options) {
                return Err(out_of_range(option));
            }
            selected.sort_unstable();
            selected.dedup();
            Ok(AnswerValue::Choices(selected))
        }
        value => Ok(value),
    }
}

fn grade_question(
    index: usize,
    question: &ExamQuestion,
    answer: Option<&AnswerValue>,
) -> QuestionFeedback {
    let explanation = (!question.explanation.is_empty()).then(|| question.explanation.clone());

    if question.is_externally_graded() {
        return QuestionFeedback {
            index,
            outcome: QuestionOutcome::PendingExternal,
            score: None,
            feedback: None,
        };
    }

    let Some(answer) = answer else {
        return QuestionFeedback {
            index,
            outcome: QuestionOutcome::Unanswered,
            score: Some(0.0),
            feedback: explanation,
        };
    };

    let correct = match (&question.kind, answer) {
        (QuestionKind::Unique { correct, .. }, AnswerValue::Choice(chosen)) => chosen == correct,
        (QuestionKind::Multiple { correct, .. }, AnswerValue::Choices(chosen)) => {
            let mut expected = correct.clone();
            expected.sort_unstable();
            expected.dedup();
            let mut chosen = chosen.clone();
            chosen.sort_unstable();
            chosen.dedup();
            expected == chosen
        }
        (QuestionKind::FillInBlank { answer: expected }, AnswerValue::Text(given)) => {
            normalize(expected) == normalize(given)
        }
        // Shapes are validated on entry; a mismatch here cannot be correct.
        _ => false,
    };

    QuestionFeedback {
        index,
        outcome: if correct {
            QuestionOutcome::Correct
        } else {
            QuestionOutcome::Incorrect
        },
        score: Some(if correct { 1.0 } else { 0.0 }),
        feedback: explanation,
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
