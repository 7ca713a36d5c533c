use anyhow::{anyhow, Result};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use df_core::metrics;
use df_core::record::{FeedbackRecord, FeedbackType};
use serde::Deserialize;
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use std::str::FromStr;

use crate::{ApiError, ApiResult, AppState, SERVICE_NAME};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalParams {
    pub presentation_id: Option<String>,
    pub module_id: Option<String>,
    pub slide_id: Option<String>,
    pub form_id: Option<String>,
    pub session_id: Option<String>,
    pub feedback_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug)]
pub struct RecordFilter {
    pub presentation_id: Option<String>,
    pub module_id: Option<String>,
    pub slide_id: Option<String>,
    pub form_id: Option<String>,
    pub session_id: Option<String>,
    pub feedback_type: Option<FeedbackType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl RecordFilter {
    pub fn from_params(params: RetrievalParams) -> Result<Self> {
        let feedback_type = params
            .feedback_type
            .as_deref()
            .map(FeedbackType::from_str)
            .transpose()?;
        let start_date = parse_timestamp(params.start_date.as_deref(), "startDate")?;
        let end_date = parse_timestamp(params.end_date.as_deref(), "endDate")?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(anyhow!("startDate must not be after endDate"));
            }
        }

        Ok(RecordFilter {
            presentation_id: params.presentation_id,
            module_id: params.module_id,
            slide_id: params.slide_id,
            form_id: params.form_id,
            session_id: params.session_id,
            feedback_type,
            start_date,
            end_date,
            limit: params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: params.offset.unwrap_or(0).max(0),
        })
    }
}

fn parse_timestamp(value: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|_| anyhow!("{field} must be an RFC 3339 timestamp"))?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

fn apply_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    let equality = [
        ("presentation_id", &filter.presentation_id),
        ("module_id", &filter.module_id),
        ("slide_id", &filter.slide_id),
        ("form_id", &filter.form_id),
        ("session_id", &filter.session_id),
    ];
    for (column, value) in equality {
        if let Some(value) = value {
            builder.push(format!(" AND {column} = "));
            builder.push_bind(value.clone());
        }
    }
    if let Some(feedback_type) = filter.feedback_type {
        builder.push(" AND feedback_type = ");
        builder.push_bind(feedback_type.as_str());
    }
    // Date range is inclusive on both ends.
    if let Some(start) = filter.start_date {
        builder.push(" AND created_at >= ");
        builder.push_bind(start);
    }
    if let Some(end) = filter.end_date {
        builder.push(" AND created_at <= ");
        builder.push_bind(end);
    }
}

pub async fn fetch_records(
    pool: &Pool<Postgres>,
    filter: &RecordFilter,
) -> Result<(Vec<FeedbackRecord>, i64)> {
    let mut count_builder =
        QueryBuilder::new("SELECT COUNT(*) FROM feedback_records WHERE TRUE");
    apply_filters(&mut count_builder, filter);
    let total_count: i64 = count_builder
        .build_query_scalar()
        .fetch_one(pool)
        .await?;

    let mut builder = QueryBuilder::new(
        "SELECT record_id, presentation_id, module_id, slide_id, form_id, session_id, feedback_type, question_hash, reviewer_name, reviewer_email, slide_content, user_response, created_at, updated_at          FROM feedback_records WHERE TRUE",
    );
    apply_filters(&mut builder, filter);
    builder.push(" ORDER BY created_at DESC, record_id DESC");
    builder.push(" LIMIT ");
    builder.push_bind(filter.limit);
    builder.push(" OFFSET ");
    builder.push_bind(filter.offset);

    let rows = builder.build().fetch_all(pool).await?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(row_to_record(&row)?);
    }

    Ok((records, total_count))
}

fn row_to_record(row: &PgRow) -> Result<FeedbackRecord> {
    let feedback_type: String = row.try_get("feedback_type")?;
    let slide_content: serde_json::Value = row.try_get("slide_content")?;
    let user_response: serde_json::Value = row.try_get("user_response")?;

    Ok(FeedbackRecord {
        record_id: row.try_get("record_id")?,
        presentation_id: row.try_get("presentation_id")?,
        module_id: row.try_get("module_id")?,
        slide_id: row.try_get("slide_id")?,
        form_id: row.try_get("form_id")?,
        session_id: row.try_get("session_id")?,
        feedback_type: FeedbackType::from_str(&feedback_type)?,
        question_hash: row.try_get("question_hash")?,
        reviewer_name: row.try_get("reviewer_name")?,
        reviewer_email: row.try_get("reviewer_email")?,
        slide_content: serde_json::from_value(slide_content)?,
        user_response: serde_json::from_value(user_response)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) async fn list_feedback(
    State(state): State<AppState>,
    Query(params): Query<RetrievalParams>,
) -> ApiResult<Response> {
    let filter =
        RecordFilter::from_params(params).map_err(|err| ApiError::validation(err.to_string()))?;
    metrics::inc_retrieval_query(SERVICE_NAME);

    let (data, total_count) = fetch_records(&state.pool, &filter)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "success": true,
        "data": data,
        "totalCount": total_count
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_params_applies_default_limit_and_offset() {
        let filter = RecordFilter::from_params(RetrievalParams::default()).unwrap();
        assert_eq!(filter.limit, DEFAULT_LIMIT);
        assert_eq!(filter.offset, 0);
        assert!(filter.presentation_id.is_none());
    }

    #[test]
    fn from_params_clamps_limit_to_maximum() {
        let filter = RecordFilter::from_params(RetrievalParams {
            limit: Some(MAX_LIMIT + 100),
            ..RetrievalParams::default()
        })
        .unwrap();
        assert_eq!(filter.limit, MAX_LIMIT);

        let filter = RecordFilter::from_params(RetrievalParams {
            limit: Some(0),
            offset: Some(-5),
            ..RetrievalParams::default()
        })
        .unwrap();
        assert_eq!(filter.limit, 1);
        assert_eq!(filter.offset, 0);
    }

    #[test]
    fn from_params_parses_rfc3339_dates() {
        let filter = RecordFilter::from_params(RetrievalParams {
            start_date: Some("2026-01-01T00:00:00Z".into()),
            end_date: Some("2026-02-01T00:00:00+09:00".into()),
            ..RetrievalParams::default()
        })
        .unwrap();
        assert!(filter.start_date.is_some());
        assert!(filter.end_date.is_some());
    }

    #[test]
    fn from_params_rejects_invalid_dates_with_stable_reason() {
        let err = RecordFilter::from_params(RetrievalParams {
            start_date: Some("yesterday".into()),
            ..RetrievalParams::default()
        })
        .expect_err("must reject");
        assert_eq!(err.to_string(), "startDate must be an RFC 3339 timestamp");
    }

    #[test]
    fn from_params_rejects_inverted_date_range() {
        let err = RecordFilter::from_params(RetrievalParams {
            start_date: Some("2026-02-01T00:00:00Z".into()),
            end_date: Some("2026-01-01T00:00:00Z".into()),
            ..RetrievalParams::default()
        })
        .expect_err("must reject");
        assert_eq!(err.to_string(), "startDate must not be after endDate");
    }

    #[test]
    fn from_params_rejects_unknown_feedback_type() {
        let err = RecordFilter::from_params(RetrievalParams {
            feedback_type: Some("snark".into()),
            ..RetrievalParams::default()
        })
        .expect_err("must reject");
        assert_eq!(err.to_string(), "unknown feedback type: snark");
    }

    #[test]
    fn apply_filters_emits_a_clause_per_supplied_field() {
        let filter = RecordFilter::from_params(RetrievalParams {
            presentation_id: Some("p1".into()),
            session_id: Some("sess1".into()),
            feedback_type: Some("general".into()),
            start_date: Some("2026-01-01T00:00:00Z".into()),
            ..RetrievalParams::default()
        })
        .unwrap();

        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM feedback_records WHERE TRUE");
        apply_filters(&mut builder, &filter);
        let sql = builder.sql();
        assert!(sql.contains("presentation_id = "));
        assert!(sql.contains("session_id = "));
        assert!(sql.contains("feedback_type = "));
        assert!(sql.contains("created_at >= "));
        assert!(!sql.contains("module_id"));
        assert!(!sql.contains("created_at <= "));
    }
}
