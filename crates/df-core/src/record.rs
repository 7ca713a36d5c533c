use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classifies what a question was probing for, so reporting can
/// aggregate across decks. Closed set; unknown tags are rejected at the
/// gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackType {
    Positioning,
    BrandTone,
    LeadStrategy,
    General,
    Custom,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Positioning => "positioning",
            FeedbackType::BrandTone => "brand-tone",
            FeedbackType::LeadStrategy => "lead-strategy",
            FeedbackType::General => "general",
            FeedbackType::Custom => "custom",
        }
    }
}

impl FromStr for FeedbackType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "positioning" => Ok(FeedbackType::Positioning),
            "brand-tone" => Ok(FeedbackType::BrandTone),
            "lead-strategy" => Ok(FeedbackType::LeadStrategy),
            "general" => Ok(FeedbackType::General),
            "custom" => Ok(FeedbackType::Custom),
            other => Err(anyhow::anyhow!("unknown feedback type: {other}")),
        }
    }
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Snapshot of the question as it looked when the viewer answered it.
/// Persisted with the record so later content edits do not break
/// historical analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlideContent {
    pub title: String,
    pub question_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_options: Option<Vec<AnswerOption>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[serde(default)]
    pub selected_option_id: Option<String>,
    #[serde(default)]
    pub selected_option_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_feedback: Option<String>,
}

impl UserResponse {
    /// An answer counts as given once an option is selected or non-blank
    /// custom text was entered.
    pub fn is_answered(&self) -> bool {
        self.selected_option_id.is_some()
            || self
                .custom_text
                .as_deref()
                .is_some_and(|text| !text.trim().is_empty())
    }
}

/// One answered question, immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub record_id: String,
    pub presentation_id: String,
    pub module_id: String,
    pub slide_id: String,
    pub form_id: String,
    pub session_id: String,
    pub feedback_type: FeedbackType,
    pub question_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_email: Option<String>,
    pub slide_content: SlideContent,
    pub user_response: UserResponse,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
