use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::executor::QueryExecutor;
use crate::frame::ResultFrame;
use crate::generate::{AttemptRecord, RetryOutcome, SUGGESTED_QUESTIONS};
use crate::schema::catalog::{categorize, AllowListArtifact, TableCategory};
use crate::sql::validator::format_for_display as format_sql;
use crate::viz::display::format_for_display as format_frame;
use crate::viz::{analyze_and_visualize, create_metric_cards, humanize_label, ChartDecision, MetricCard};
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    /// Request a narrative summary of the result (a second model call).
    #[serde(default)]
    pub analyze: bool,
}

fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub sql: String,
    pub formatted_sql: String,
    pub columns: Vec<String>,
    pub labels: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub formatted_rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub chart: ChartDecision,
    pub chart_note: &'static str,
    pub metric_cards: Vec<MetricCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

/// One clear error message naming the reason, plus the transcript of every
/// attempt when retries occurred.
#[derive(Debug, Serialize)]
pub struct AskFailure {
    pub error: String,
    pub attempts: Vec<AttemptRecord>,
}

/// The full question-to-insight pipeline: generate SQL with bounded retry,
/// execute against the warehouse, pick a presentation.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, Json<AskFailure>)> {
    if payload.question.trim().is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "question is empty", Vec::new()));
    }

    info!("NL question for session '{}': {}", payload.session_id, payload.question);

    let session = state.session(&payload.session_id).await;
    let mut generator = session.lock().await;

    let executor = Arc::clone(&state.executor);
    let report = generator
        .generate_with_retry(
            &payload.question,
            move |sql| {
                let executor = Arc::clone(&executor);
                async move { executor.execute(&sql).await }
            },
            |attempt, message| debug!(attempt, "{}", message),
            None,
        )
        .await;

    match report.outcome {
        RetryOutcome::Success { sql, frame } => {
            let analysis = if payload.analyze {
                Some(
                    generator
                        .analyze_results(&payload.question, &sql, &frame)
                        .await,
                )
            } else {
                None
            };
            drop(generator);

            Ok(Json(build_response(
                sql,
                frame,
                &payload.question,
                analysis,
                report.attempts,
            )))
        }
        RetryOutcome::Exhausted { last_error } => Err(failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            &last_error,
            report.attempts,
        )),
        RetryOutcome::Cancelled => Err(failure(
            StatusCode::CONFLICT,
            "request cancelled",
            report.attempts,
        )),
        RetryOutcome::ModelFailure(e) => Err(failure(
            StatusCode::BAD_GATEWAY,
            &e.to_string(),
            report.attempts,
        )),
    }
}

fn build_response(
    sql: String,
    frame: ResultFrame,
    question: &str,
    analysis: Option<String>,
    attempts: Vec<AttemptRecord>,
) -> AskResponse {
    let chart = analyze_and_visualize(&frame, question);

    // Time series render sorted by their date axis; everything else keeps
    // the query's own ordering.
    let presented = match &chart {
        ChartDecision::TimeSeries { date_column, .. } => frame.sorted_by(date_column),
        _ => frame,
    };

    let metric_cards = create_metric_cards(&presented);
    let formatted = format_frame(&presented);

    AskResponse {
        formatted_sql: format_sql(&sql),
        sql,
        labels: presented.columns.iter().map(|c| humanize_label(c)).collect(),
        columns: presented.columns.clone(),
        row_count: presented.row_count(),
        formatted_rows: formatted.rows,
        rows: presented.rows,
        chart_note: chart.describe(),
        chart,
        metric_cards,
        analysis,
        attempts,
    }
}

fn failure(
    status: StatusCode,
    error: &str,
    attempts: Vec<AttemptRecord>,
) -> (StatusCode, Json<AskFailure>) {
    (
        status,
        Json(AskFailure {
            error: error.to_string(),
            attempts,
        }),
    )
}

pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> StatusCode {
    if state.clear_session(&session_id).await {
        info!("Cleared conversation for session '{}'", session_id);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn suggestions() -> Json<Vec<&'static str>> {
    Json(SUGGESTED_QUESTIONS.to_vec())
}

#[derive(Debug, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub category: TableCategory,
    pub description: String,
    pub column_count: usize,
}

pub async fn schema(State(state): State<Arc<AppState>>) -> Json<Vec<TableSummary>> {
    let tables = state
        .catalog
        .tables()
        .map(|table| TableSummary {
            name: table.name.clone(),
            category: categorize(&table.name),
            description: table.description.clone(),
            column_count: table.columns.len(),
        })
        .collect();
    Json(tables)
}

pub async fn allow_list(State(state): State<Arc<AppState>>) -> Json<AllowListArtifact> {
    Json(state.catalog.allow_list_artifact())
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub table_count: usize,
    pub allowed_table_count: usize,
    pub session_count: usize,
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        table_count: state.catalog.len(),
        allowed_table_count: state.catalog.allowed_tables().len(),
        session_count: state.session_count().await,
    })
}
