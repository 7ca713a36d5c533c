use anyhow::{anyhow, Result};
use df_core::record::{FeedbackRecord, FeedbackType, SlideContent, UserResponse};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionCommon {
    pub presentation_id: String,
    pub module_id: String,
    pub form_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSubmission {
    pub slide_id: String,
    pub slide_content: SlideContent,
    pub user_response: UserResponse,
    pub feedback_type: FeedbackType,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub common: SubmissionCommon,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_feedback: Option<String>,
    pub questions: Vec<QuestionSubmission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmitResponse {
    pub success: bool,
    pub inserted_count: usize,
    pub document_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResponse {
    pub success: bool,
    pub data: Vec<FeedbackRecord>,
    pub total_count: i64,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub presentation_id: Option<String>,
    pub module_id: Option<String>,
    pub slide_id: Option<String>,
    pub form_id: Option<String>,
    pub session_id: Option<String>,
    pub feedback_type: Option<FeedbackType>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl RetrievalQuery {
    fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let strings = [
            ("presentationId", &self.presentation_id),
            ("moduleId", &self.module_id),
            ("slideId", &self.slide_id),
            ("formId", &self.form_id),
            ("sessionId", &self.session_id),
            ("startDate", &self.start_date),
            ("endDate", &self.end_date),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                pairs.push((name, value.clone()));
            }
        }
        if let Some(feedback_type) = self.feedback_type {
            pairs.push(("feedbackType", feedback_type.as_str().to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset", offset.to_string()));
        }
        pairs
    }
}

/// Thin HTTP client for the submission gateway. One instance per deck
/// viewer; requests carry a bounded timeout so a stalled gateway surfaces
/// as an ordinary submission error.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn feedback_url(&self) -> String {
        format!("{}/v1/feedback", self.base_url)
    }

    pub async fn submit_batch(&self, submission: &BatchSubmission) -> Result<BatchSubmitResponse> {
        let response = self
            .client
            .post(self.feedback_url())
            .json(submission)
            .send()
            .await
            .map_err(|err| anyhow!("gateway request failed: {err}"))?;

        let status = response.status();
        if status.is_success() {
            let body: BatchSubmitResponse = response
                .json()
                .await
                .map_err(|err| anyhow!("invalid gateway response: {err}"))?;
            return Ok(body);
        }

        let reason = response
            .json::<GatewayError>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| "no reason given".to_string());
        Err(anyhow!("gateway rejected submission ({status}): {reason}"))
    }

    pub async fn query(&self, query: &RetrievalQuery) -> Result<RetrievalResponse> {
        let response = self
            .client
            .get(self.feedback_url())
            .query(&query.to_query_pairs())
            .send()
            .await
            .map_err(|err| anyhow!("gateway request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .json::<GatewayError>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(anyhow!("gateway query failed ({status}): {reason}"));
        }

        response
            .json()
            .await
            .map_err(|err| anyhow!("invalid gateway response: {err}"))
    }
}
