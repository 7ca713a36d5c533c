use anyhow::{anyhow, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use df_core::identity;
use df_core::metrics;
use df_core::record::{FeedbackType, SlideContent, UserResponse};
use serde_json::{json, Value};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState, SERVICE_NAME};

#[derive(Debug)]
pub struct SingleSubmission {
    pub presentation_id: String,
    pub module_id: String,
    pub slide_id: String,
    pub form_id: String,
    pub session_id: String,
    pub feedback_type: FeedbackType,
    pub reviewer_name: Option<String>,
    pub reviewer_email: Option<String>,
    pub slide_content: SlideContent,
    pub user_response: UserResponse,
}

#[derive(Debug)]
pub struct BatchQuestion {
    pub slide_id: String,
    pub feedback_type: FeedbackType,
    pub slide_content: SlideContent,
    pub user_response: UserResponse,
}

#[derive(Debug)]
pub struct BatchSubmission {
    pub presentation_id: String,
    pub module_id: String,
    pub form_id: String,
    pub session_id: String,
    pub reviewer_name: Option<String>,
    pub reviewer_email: Option<String>,
    pub additional_feedback: Option<String>,
    pub questions: Vec<BatchQuestion>,
}

/// The request body resolved into an explicit variant at the boundary:
/// a body carrying both `common` and `questions` is a batch, anything
/// else is treated as a single record.
#[derive(Debug)]
pub enum Submission {
    Single(Box<SingleSubmission>),
    Batch(BatchSubmission),
}

impl Submission {
    pub fn parse(value: &Value) -> Result<Submission> {
        let map = value
            .as_object()
            .ok_or_else(|| anyhow!("body must be a JSON object"))?;

        if map.contains_key("common") && map.contains_key("questions") {
            parse_batch(value).map(Submission::Batch)
        } else {
            parse_single(value).map(|single| Submission::Single(Box::new(single)))
        }
    }
}

fn parse_single(value: &Value) -> Result<SingleSubmission> {
    let presentation_id = require_string(value, "presentationId")?;
    let module_id = require_string(value, "moduleId")?;
    let slide_id = require_string(value, "slideId")?;
    let form_id = require_string(value, "formId")?;
    let session_id = require_string(value, "sessionId")?;
    let feedback_type = require_feedback_type(value, "feedbackType")?;

    let slide_content = parse_slide_content(value.get("slideContent"), "slideContent", true)?;
    let user_response = parse_user_response(value.get("userResponse"), "userResponse")?;

    Ok(SingleSubmission {
        presentation_id,
        module_id,
        slide_id,
        form_id,
        session_id,
        feedback_type,
        reviewer_name: optional_string(value, "reviewerName"),
        reviewer_email: optional_string(value, "reviewerEmail"),
        slide_content,
        user_response,
    })
}

fn parse_batch(value: &Value) -> Result<BatchSubmission> {
    let common = value
        .get("common")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("common must be an object"))?;
    let common_value = Value::Object(common.clone());

    let presentation_id = require_string(&common_value, "presentationId")
        .map_err(|err| anyhow!("common.{err}"))?;
    let module_id =
        require_string(&common_value, "moduleId").map_err(|err| anyhow!("common.{err}"))?;
    let form_id = require_string(&common_value, "formId").map_err(|err| anyhow!("common.{err}"))?;
    let session_id =
        require_string(&common_value, "sessionId").map_err(|err| anyhow!("common.{err}"))?;

    let entries = value
        .get("questions")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("questions must be an array"))?;
    if entries.is_empty() {
        return Err(anyhow!("questions must not be empty"));
    }

    let mut questions = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let slide_id = require_string(entry, "slideId")
            .map_err(|err| anyhow!("questions[{index}].{err}"))?;
        let feedback_type = require_feedback_type(entry, "feedbackType")
            .map_err(|err| anyhow!("questions[{index}]: {err}"))?;
        let slide_content = parse_slide_content(
            entry.get("slideContent"),
            &format!("questions[{index}].slideContent"),
            false,
        )?;
        let user_response = parse_user_response(
            entry.get("userResponse"),
            &format!("questions[{index}].userResponse"),
        )?;
        questions.push(BatchQuestion {
            slide_id,
            feedback_type,
            slide_content,
            user_response,
        });
    }

    Ok(BatchSubmission {
        presentation_id,
        module_id,
        form_id,
        session_id,
        reviewer_name: optional_string(&common_value, "reviewerName"),
        reviewer_email: optional_string(&common_value, "reviewerEmail"),
        additional_feedback: optional_string(value, "additionalFeedback"),
        questions,
    })
}

fn require_string(value: &Value, field: &str) -> Result<String> {
    let raw = value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing field: {field}"))?;
    if raw.trim().is_empty() {
        return Err(anyhow!("{field} must be a non-empty string"));
    }
    Ok(raw.to_string())
}

fn optional_string(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

fn require_feedback_type(value: &Value, field: &str) -> Result<FeedbackType> {
    let raw = value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing field: {field}"))?;
    FeedbackType::from_str(raw)
}

fn parse_slide_content(
    value: Option<&Value>,
    path: &str,
    require_options: bool,
) -> Result<SlideContent> {
    let value = value
        .filter(|v| v.is_object())
        .ok_or_else(|| anyhow!("missing field: {path}"))?;

    require_string(value, "title").map_err(|err| anyhow!("{path}.{err}"))?;
    require_string(value, "questionPrompt").map_err(|err| anyhow!("{path}.{err}"))?;

    match value.get("answerOptions") {
        Some(options) => {
            let options = options
                .as_array()
                .ok_or_else(|| anyhow!("{path}.answerOptions must be an array"))?;
            // A record without its option set cannot be replayed against
            // the original question shape.
            if options.is_empty() {
                return Err(anyhow!("{path}.answerOptions must not be empty"));
            }
        }
        None if require_options => {
            return Err(anyhow!("{path}.answerOptions must be an array"));
        }
        None => {}
    }

    serde_json::from_value(value.clone()).map_err(|err| anyhow!("{path} is invalid: {err}"))
}

fn parse_user_response(value: Option<&Value>, path: &str) -> Result<UserResponse> {
    let value = value
        .filter(|v| v.is_object())
        .ok_or_else(|| anyhow!("missing field: {path}"))?;
    serde_json::from_value(value.clone()).map_err(|err| anyhow!("{path} is invalid: {err}"))
}

pub(crate) async fn submit(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let value: Value = serde_json::from_slice(&body).map_err(|err| {
        metrics::inc_submission_rejected(SERVICE_NAME, "malformed");
        ApiError::validation(format!("invalid JSON body: {err}"))
    })?;

    let submission = Submission::parse(&value).map_err(|err| {
        metrics::inc_submission_rejected(SERVICE_NAME, "invalid");
        ApiError::validation(err.to_string())
    })?;

    match submission {
        Submission::Single(single) => {
            metrics::inc_submission_received(SERVICE_NAME, "single");
            let record_id = insert_single(&state.pool, &single)
                .await
                .map_err(ApiError::internal)?;
            metrics::inc_records_inserted(SERVICE_NAME, 1);
            tracing::info!(session_id = %single.session_id, %record_id, "feedback record stored");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "success": true, "documentId": record_id })),
            )
                .into_response())
        }
        Submission::Batch(batch) => {
            metrics::inc_submission_received(SERVICE_NAME, "batch");
            let record_ids = insert_batch(&state.pool, &batch)
                .await
                .map_err(ApiError::internal)?;
            metrics::inc_records_inserted(SERVICE_NAME, record_ids.len() as u64);
            tracing::info!(
                session_id = %batch.session_id,
                inserted = record_ids.len(),
                "feedback batch stored"
            );
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "insertedCount": record_ids.len(),
                    "documentIds": record_ids
                })),
            )
                .into_response())
        }
    }
}

async fn insert_single(pool: &Pool<Postgres>, single: &SingleSubmission) -> Result<String> {
    let now = Utc::now();
    let record_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;
    insert_record(
        &mut tx,
        &record_id,
        &single.presentation_id,
        &single.module_id,
        &single.slide_id,
        &single.form_id,
        &single.session_id,
        single.feedback_type,
        single.reviewer_name.as_deref(),
        single.reviewer_email.as_deref(),
        &single.slide_content,
        &single.user_response,
        now,
    )
    .await?;
    tx.commit().await?;
    Ok(record_id)
}

// The whole batch is one logical event: one transaction, one shared
// timestamp for every resulting record.
async fn insert_batch(pool: &Pool<Postgres>, batch: &BatchSubmission) -> Result<Vec<String>> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut record_ids = Vec::with_capacity(batch.questions.len());

    for question in &batch.questions {
        let record_id = Uuid::new_v4().to_string();
        let mut user_response = question.user_response.clone();
        if batch.additional_feedback.is_some() {
            user_response.additional_feedback = batch.additional_feedback.clone();
        }
        insert_record(
            &mut tx,
            &record_id,
            &batch.presentation_id,
            &batch.module_id,
            &question.slide_id,
            &batch.form_id,
            &batch.session_id,
            question.feedback_type,
            batch.reviewer_name.as_deref(),
            batch.reviewer_email.as_deref(),
            &question.slide_content,
            &user_response,
            now,
        )
        .await?;
        record_ids.push(record_id);
    }

    tx.commit().await?;
    Ok(record_ids)
}

#[allow(clippy::too_many_arguments)]
async fn insert_record(
    tx: &mut Transaction<'_, Postgres>,
    record_id: &str,
    presentation_id: &str,
    module_id: &str,
    slide_id: &str,
    form_id: &str,
    session_id: &str,
    feedback_type: FeedbackType,
    reviewer_name: Option<&str>,
    reviewer_email: Option<&str>,
    slide_content: &SlideContent,
    user_response: &UserResponse,
    stamped_at: DateTime<Utc>,
) -> Result<()> {
    let question_hash = identity::question_hash(&slide_content.question_prompt);
    sqlx::query(
        "INSERT INTO feedback_records          (record_id, presentation_id, module_id, slide_id, form_id, session_id, feedback_type, question_hash, reviewer_name, reviewer_email, slide_content, user_response, created_at, updated_at)          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)",
    )
    .bind(record_id)
    .bind(presentation_id)
    .bind(module_id)
    .bind(slide_id)
    .bind(form_id)
    .bind(session_id)
    .bind(feedback_type.as_str())
    .bind(&question_hash)
    .bind(reviewer_name)
    .bind(reviewer_email)
    .bind(serde_json::to_value(slide_content)?)
    .bind(serde_json::to_value(user_response)?)
    .bind(stamped_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
