use anyhow::{anyhow, Result};
use df_core::record::{FeedbackType, SlideContent, UserResponse};
use std::collections::BTreeMap;

mod gateway;

pub use gateway::{
    BatchSubmission, BatchSubmitResponse, GatewayClient, QuestionSubmission, RetrievalQuery,
    RetrievalResponse, SubmissionCommon,
};

/// One question a form expects an answer for, keyed for `set_answer`.
#[derive(Debug, Clone)]
pub struct FormQuestion {
    pub key: String,
    pub slide_id: String,
    pub slide_content: SlideContent,
    pub feedback_type: FeedbackType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Idle,
    Submitting,
    Success,
    Error,
}

/// In-memory answer store for one multi-question form, scoped to one
/// session. Edits are local and synchronous; nothing leaves the process
/// until `submit` is called. A failed submission keeps every answer so
/// retrying needs no re-entry; a succeeded session is done for good.
#[derive(Debug)]
pub struct FormSession {
    common: SubmissionCommon,
    questions: Vec<FormQuestion>,
    answers: BTreeMap<String, UserResponse>,
    additional_feedback: Option<String>,
    status: SubmitStatus,
}

impl FormSession {
    /// Identifiers are explicit constructor inputs: the caller owns how
    /// session and presentation ids are derived and persisted.
    pub fn new(common: SubmissionCommon, questions: Vec<FormQuestion>) -> Self {
        Self {
            common,
            questions,
            answers: BTreeMap::new(),
            additional_feedback: None,
            status: SubmitStatus::Idle,
        }
    }

    pub fn status(&self) -> SubmitStatus {
        self.status
    }

    pub fn session_id(&self) -> &str {
        &self.common.session_id
    }

    pub fn answer(&self, question_key: &str) -> Option<&UserResponse> {
        self.answers.get(question_key)
    }

    /// Records or overwrites the current answer for a question. Last
    /// write wins; no I/O happens here.
    pub fn set_answer(&mut self, question_key: &str, response: UserResponse) -> Result<()> {
        if self.status == SubmitStatus::Success {
            return Err(anyhow!("form already submitted; start a new session"));
        }
        if !self.questions.iter().any(|q| q.key == question_key) {
            return Err(anyhow!("unknown question key: {question_key}"));
        }
        self.answers.insert(question_key.to_string(), response);
        Ok(())
    }

    pub fn set_additional_feedback(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.additional_feedback = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
    }

    pub fn set_reviewer(&mut self, name: Option<String>, email: Option<String>) {
        self.common.reviewer_name = name;
        self.common.reviewer_email = email;
    }

    /// True once every required question has a real answer (an option
    /// selection or non-blank custom text).
    pub fn is_complete(&self) -> bool {
        self.questions
            .iter()
            .filter(|question| question.required)
            .all(|question| {
                self.answers
                    .get(&question.key)
                    .is_some_and(UserResponse::is_answered)
            })
    }

    /// Flattens the held answers into one batch, in form question order.
    pub fn build_submission(&self) -> Result<BatchSubmission> {
        let questions: Vec<QuestionSubmission> = self
            .questions
            .iter()
            .filter_map(|question| {
                self.answers.get(&question.key).map(|response| QuestionSubmission {
                    slide_id: question.slide_id.clone(),
                    slide_content: question.slide_content.clone(),
                    user_response: response.clone(),
                    feedback_type: question.feedback_type,
                })
            })
            .collect();

        if questions.is_empty() {
            return Err(anyhow!("no answers to submit"));
        }

        Ok(BatchSubmission {
            common: self.common.clone(),
            additional_feedback: self.additional_feedback.clone(),
            questions,
        })
    }

    /// Sends the accumulated answers as one batch submission. On failure
    /// the state moves to `Error` with every answer intact; calling
    /// `submit` again retries. Success is terminal for this session.
    pub async fn submit(&mut self, client: &GatewayClient) -> Result<BatchSubmitResponse> {
        match self.status {
            SubmitStatus::Success => {
                return Err(anyhow!("form already submitted; start a new session"));
            }
            SubmitStatus::Submitting => {
                return Err(anyhow!("submission already in flight"));
            }
            SubmitStatus::Idle | SubmitStatus::Error => {}
        }

        let submission = self.build_submission()?;
        self.status = SubmitStatus::Submitting;

        match client.submit_batch(&submission).await {
            Ok(response) => {
                self.status = SubmitStatus::Success;
                tracing::info!(
                    session_id = %self.common.session_id,
                    inserted = response.inserted_count,
                    "feedback submitted"
                );
                Ok(response)
            }
            Err(err) => {
                self.status = SubmitStatus::Error;
                tracing::warn!(
                    session_id = %self.common.session_id,
                    error = %err,
                    "feedback submission failed; answers retained"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use df_core::record::AnswerOption;

    fn common() -> SubmissionCommon {
        SubmissionCommon {
            presentation_id: "p1".into(),
            module_id: "m1".into(),
            form_id: "f1".into(),
            session_id: "sess1".into(),
            reviewer_name: None,
            reviewer_email: None,
        }
    }

    fn question(key: &str, slide_id: &str, required: bool) -> FormQuestion {
        FormQuestion {
            key: key.into(),
            slide_id: slide_id.into(),
            slide_content: SlideContent {
                title: format!("Slide {slide_id}"),
                question_prompt: format!("Prompt for {key}?"),
                question_number: None,
                total_questions: None,
                answer_options: Some(vec![AnswerOption {
                    id: "a".into(),
                    label: "A".into(),
                    description: None,
                }]),
            },
            feedback_type: FeedbackType::General,
            required,
        }
    }

    fn selected(option: &str) -> UserResponse {
        UserResponse {
            selected_option_id: Some(option.into()),
            selected_option_label: Some(option.to_uppercase()),
            ..UserResponse::default()
        }
    }

    #[test]
    fn set_answer_overwrites_previous_answer() {
        let mut session = FormSession::new(common(), vec![question("q1", "s1", true)]);
        session.set_answer("q1", selected("a")).unwrap();
        session.set_answer("q1", selected("b")).unwrap();
        assert_eq!(
            session.answer("q1").unwrap().selected_option_id.as_deref(),
            Some("b")
        );
    }

    #[test]
    fn set_answer_rejects_unknown_question_key() {
        let mut session = FormSession::new(common(), vec![question("q1", "s1", true)]);
        let err = session.set_answer("nope", selected("a")).expect_err("must reject");
        assert_eq!(err.to_string(), "unknown question key: nope");
    }

    #[test]
    fn is_complete_requires_every_required_question_answered() {
        let mut session = FormSession::new(
            common(),
            vec![
                question("q1", "s1", true),
                question("q2", "s2", true),
                question("q3", "s3", false),
            ],
        );
        assert!(!session.is_complete());

        session.set_answer("q1", selected("a")).unwrap();
        assert!(!session.is_complete());

        session.set_answer("q2", selected("a")).unwrap();
        assert!(session.is_complete(), "optional question may stay blank");
    }

    #[test]
    fn blank_custom_text_does_not_count_as_an_answer() {
        let mut session = FormSession::new(common(), vec![question("q1", "s1", true)]);
        session
            .set_answer(
                "q1",
                UserResponse {
                    custom_text: Some("   ".into()),
                    ..UserResponse::default()
                },
            )
            .unwrap();
        assert!(!session.is_complete());
    }

    #[test]
    fn build_submission_flattens_answers_in_question_order() {
        let mut session = FormSession::new(
            common(),
            vec![question("q1", "s1", true), question("q2", "s2", true)],
        );
        session.set_answer("q2", selected("b")).unwrap();
        session.set_answer("q1", selected("a")).unwrap();
        session.set_additional_feedback("great deck");

        let submission = session.build_submission().unwrap();
        assert_eq!(submission.questions.len(), 2);
        assert_eq!(submission.questions[0].slide_id, "s1");
        assert_eq!(submission.questions[1].slide_id, "s2");
        assert_eq!(submission.additional_feedback.as_deref(), Some("great deck"));
        assert_eq!(submission.common.session_id, "sess1");
    }

    #[test]
    fn build_submission_serializes_camel_case_wire_shape() {
        let mut session = FormSession::new(common(), vec![question("q1", "s1", true)]);
        session.set_answer("q1", selected("a")).unwrap();

        let value = serde_json::to_value(session.build_submission().unwrap()).unwrap();
        assert_eq!(value["common"]["presentationId"], "p1");
        assert_eq!(value["questions"][0]["slideId"], "s1");
        assert_eq!(value["questions"][0]["feedbackType"], "general");
        assert_eq!(
            value["questions"][0]["slideContent"]["questionPrompt"],
            "Prompt for q1?"
        );
    }

    #[test]
    fn build_submission_with_no_answers_is_an_error() {
        let session = FormSession::new(common(), vec![question("q1", "s1", true)]);
        assert!(session.build_submission().is_err());
    }

    #[tokio::test]
    async fn failed_submission_preserves_answers_and_allows_retry() {
        let client = GatewayClient::new("http://127.0.0.1:9").unwrap();
        let mut session = FormSession::new(common(), vec![question("q1", "s1", true)]);
        session.set_answer("q1", selected("a")).unwrap();

        let first = session.submit(&client).await;
        assert!(first.is_err());
        assert_eq!(session.status(), SubmitStatus::Error);
        assert!(session.answer("q1").is_some(), "answers survive a failure");

        // Error is a retryable state: the same session may submit again.
        let second = session.submit(&client).await;
        assert!(second.is_err());
        assert_eq!(session.status(), SubmitStatus::Error);
    }

    #[tokio::test]
    async fn success_is_terminal_for_the_session() {
        let client = GatewayClient::new("http://127.0.0.1:9").unwrap();
        let mut session = FormSession::new(common(), vec![question("q1", "s1", true)]);
        session.set_answer("q1", selected("a")).unwrap();
        session.status = SubmitStatus::Success;

        let err = session.submit(&client).await.expect_err("must refuse");
        assert_eq!(
            err.to_string(),
            "form already submitted; start a new session"
        );
        let err = session
            .set_answer("q1", selected("b"))
            .expect_err("edits refused after success");
        assert_eq!(
            err.to_string(),
            "form already submitted; start a new session"
        );
    }
}
