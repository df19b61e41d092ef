//! HTTP grading service client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use examdraft_core::error::GradingError;
use examdraft_core::results::AttemptResult;
use examdraft_core::traits::{GradingCollaborator, Submission, SubmissionReceipt};

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Grading collaborator backed by a remote HTTP service.
///
/// Both calls POST the JSON-encoded [`Submission`] to
/// `{base_url}/v1/exams/{exam_id}/attempts/{attempt_id}/{submit|grade}`.
/// Ids are percent-encoded as single path segments.
pub struct HttpGrader {
    api_key: String,
    base_url: String,
    base: Url,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpGrader {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let timeout_secs = if timeout_secs > 0 {
            timeout_secs
        } else {
            DEFAULT_TIMEOUT_SECS
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .with_context(|| format!("invalid grading base URL: {base_url}"))?;
        if base.cannot_be_a_base() {
            bail!("grading base URL cannot carry a path: {base_url}");
        }

        Ok(Self {
            api_key: api_key.to_string(),
            base_url,
            base,
            timeout_secs,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, submission: &Submission, action: &str) -> Result<Url, GradingError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| GradingError::Network(format!("invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend([
                "v1",
                "exams",
                submission.exam_id.as_str(),
                "attempts",
                submission.attempt_id.as_str(),
                action,
            ]);
        Ok(url)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        submission: &Submission,
        action: &str,
    ) -> Result<T, GradingError> {
        let mut request = self
            .client
            .post(self.endpoint(submission, action)?)
            .header("content-type", "application/json")
            .json(submission);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GradingError::Timeout(self.timeout_secs)
            } else {
                GradingError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
                * 1000;
            return Err(GradingError::RateLimited {
                retry_after_ms: retry_after,
            });
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body);
            return Err(match status {
                400 | 409 | 422 => GradingError::Rejected(message),
                _ => GradingError::Api { status, message },
            });
        }

        response.json().await.map_err(|e| GradingError::Api {
            status: 0,
            message: format!("failed to parse response: {e}"),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Nested { error: ErrorDetail },
    Flat { message: String },
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Nested { error }) => error.message,
        Ok(ErrorBody::Flat { message }) => message,
        Err(_) => body.to_string(),
    }
}

#[async_trait]
impl GradingCollaborator for HttpGrader {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, submission), fields(exam_id = %submission.exam_id, attempt_id = %submission.attempt_id))]
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, GradingError> {
        let receipt: SubmissionReceipt = self.post(submission, "submit").await?;
        tracing::debug!(submission_id = %receipt.submission_id, "submission accepted");
        Ok(receipt)
    }

    #[instrument(skip(self, submission), fields(exam_id = %submission.exam_id, attempt_id = %submission.attempt_id))]
    async fn grade(&self, submission: &Submission) -> Result<AttemptResult, GradingError> {
        let result: AttemptResult = self.post(submission, "grade").await?;
        tracing::debug!(score = result.score, "grading complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use examdraft_core::model::{AnswerValue, ExamDefinition, ExamQuestion, QuestionKind};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn submission() -> Submission {
        Submission {
            exam_id: "fr-b2".into(),
            attempt_id: "a-1".into(),
            answers: vec![Some(AnswerValue::Text("Le chat dort.".into())), None],
            exam: ExamDefinition {
                id: "fr-b2".into(),
                title: "French B2".into(),
                level: "B2".into(),
                language: "fr".into(),
                questions: vec![
                    ExamQuestion {
                        prompt: "Translate: The cat sleeps.".into(),
                        kind: QuestionKind::TranslateText {
                            reference: "Le chat dort.".into(),
                        },
                        explanation: String::new(),
                        tags: vec![],
                        rubric: false,
                    },
                    ExamQuestion {
                        prompt: "Pick".into(),
                        kind: QuestionKind::Unique {
                            options: vec!["a".into(), "b".into()],
                            correct: 0,
                        },
                        explanation: String::new(),
                        tags: vec![],
                        rubric: false,
                    },
                ],
            },
            submitted_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
            expired: false,
        }
    }

    #[tokio::test]
    async fn successful_submit() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/exams/fr-b2/attempts/a-1/submit"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "examId": "fr-b2",
                "answers": ["Le chat dort.", null],
                "expired": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "submissionId": "sub-42",
                "acceptedAt": "2026-03-01T09:30:01Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grader = HttpGrader::new(&server.uri(), "test-key", 5).unwrap();
        let receipt = grader.submit(&submission()).await.unwrap();
        assert_eq!(receipt.submission_id, "sub-42");
    }

    #[tokio::test]
    async fn successful_grade() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/exams/fr-b2/attempts/a-1/grade"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "score": 50.0,
                "maxScore": 100.0,
                "feedback": [
                    {"index": 0, "outcome": "correct", "score": 1.0, "feedback": "Parfait"},
                    {"index": 1, "outcome": "unanswered"}
                ],
                "gradedAt": "2026-03-01T09:30:05Z"
            })))
            .mount(&server)
            .await;

        let grader = HttpGrader::new(&server.uri(), "", 5).unwrap();
        let result = grader.grade(&submission()).await.unwrap();
        assert_eq!(result.score, 50.0);
        assert_eq!(result.correct_count(), 1);
        assert_eq!(result.feedback[0].feedback.as_deref(), Some("Parfait"));
    }

    #[tokio::test]
    async fn rate_limit_maps_retry_after() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let grader = HttpGrader::new(&server.uri(), "k", 5).unwrap();
        let err = grader.submit(&submission()).await.unwrap_err();
        assert_eq!(err, GradingError::RateLimited { retry_after_ms: 7000 });
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn validation_failure_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "error": {"message": "attempt already submitted"}
            })))
            .mount(&server)
            .await;

        let grader = HttpGrader::new(&server.uri(), "k", 5).unwrap();
        let err = grader.submit(&submission()).await.unwrap_err();
        assert_eq!(
            err,
            GradingError::Rejected("attempt already submitted".into())
        );
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let grader = HttpGrader::new(&server.uri(), "k", 5).unwrap();
        let err = grader.grade(&submission()).await.unwrap_err();
        assert_eq!(
            err,
            GradingError::Api {
                status: 503,
                message: "maintenance".into()
            }
        );
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(serde_json::json!({})),
            )
            .mount(&server)
            .await;

        let grader = HttpGrader::new(&server.uri(), "k", 1).unwrap();
        let err = grader.submit(&submission()).await.unwrap_err();
        assert_eq!(err, GradingError::Timeout(1));
    }

    #[tokio::test]
    async fn unreachable_service_is_network_error() {
        // Port 1 is reserved and refuses connections.
        let grader = HttpGrader::new("http://127.0.0.1:1", "k", 5).unwrap();
        let err = grader.submit(&submission()).await.unwrap_err();
        assert!(matches!(err, GradingError::Network(_)));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let grader = HttpGrader::new("https://grading.example.com/", "k", 0).unwrap();
        assert_eq!(grader.base_url(), "https://grading.example.com");
        assert_eq!(
            grader.endpoint(&submission(), "grade").unwrap().as_str(),
            "https://grading.example.com/v1/exams/fr-b2/attempts/a-1/grade"
        );
    }

    #[test]
    fn ids_are_encoded_as_single_segments() {
        let grader = HttpGrader::new("https://grading.example.com/api/", "k", 0).unwrap();
        let mut submission = submission();
        submission.exam_id = "fr/b2".into();
        submission.attempt_id = "a?1#x".into();
        assert_eq!(
            grader.endpoint(&submission, "submit").unwrap().as_str(),
            "https://grading.example.com/api/v1/exams/fr%2Fb2/attempts/a%3F1%23x/submit"
        );
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        assert!(HttpGrader::new("not a url", "k", 5).is_err());
        assert!(HttpGrader::new("mailto:grader@example.com", "k", 5).is_err());
    }

    #[tokio::test]
    async fn slash_in_attempt_id_reaches_the_attempt_route() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/exams/fr-b2/attempts/a%2F1/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "submissionId": "sub-7",
                "acceptedAt": "2026-03-01T09:30:01Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grader = HttpGrader::new(&server.uri(), "", 5).unwrap();
        let mut submission = submission();
        submission.attempt_id = "a/1".into();
        let receipt = grader.submit(&submission).await.unwrap();
        assert_eq!(receipt.submission_id, "sub-7");
    }
}
