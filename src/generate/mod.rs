pub mod conversation;

use crate::config::AppConfig;
use crate::db::executor::ExecutionError;
use crate::frame::ResultFrame;
use crate::llm::{ChatMessage, LlmError, LlmManager};
use crate::schema::catalog::SchemaCatalog;
use crate::schema::context;
use crate::sql::validator::QueryValidator;
use conversation::ConversationState;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Output-token cap for SQL generation calls.
const SQL_MAX_TOKENS: usize = 1000;
/// Output-token cap for the narrative-analysis call.
const ANALYSIS_MAX_TOKENS: usize = 500;
/// Rows of the result sampled into the analysis prompt.
const ANALYSIS_SAMPLE_ROWS: usize = 10;

/// Shown when the narrative-analysis call fails for any reason.
const ANALYSIS_FALLBACK: &str = "Analysis is unavailable for this result.";

/// Starter questions surfaced to new sessions.
pub const SUGGESTED_QUESTIONS: &[&str] = &[
    "What is our total revenue by territory?",
    "Show me the top 10 customers by lifetime value",
    "What is the monthly revenue trend?",
    "Which products have the highest profit margin?",
    "Show me customers at risk of churning",
    "What is the average order value by customer segment?",
    "How many orders do we have by status?",
    "What is revenue by product category?",
    "Show me employee quota achievement rates",
    "What is our inventory value by category?",
];

/// The result of one generation attempt. Transient; produced and consumed
/// within a single generate-or-retry cycle.
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub sql: String,
    pub valid: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    ValidationFailed(String),
    ExecutionFailed(String),
    Succeeded,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }

    fn error_detail(&self) -> Option<&str> {
        match self {
            AttemptOutcome::ValidationFailed(e) | AttemptOutcome::ExecutionFailed(e) => Some(e),
            AttemptOutcome::Succeeded => None,
        }
    }
}

/// One row in a retry transcript, kept for observability and surfaced to the
/// caller when attempts were needed.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub sql: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug)]
pub enum RetryOutcome {
    Success { sql: String, frame: ResultFrame },
    /// Every attempt failed; carries the last validation or execution error.
    Exhausted { last_error: String },
    /// The caller's cancellation flag was raised between attempts.
    Cancelled,
    /// The model call itself failed. Fatal to the request, never retried.
    ModelFailure(LlmError),
}

#[derive(Debug)]
pub struct RetryReport {
    pub outcome: RetryOutcome,
    pub attempts: Vec<AttemptRecord>,
}

/// Produces a safe, executable SQL query from a natural-language question,
/// with bounded automatic repair. Owns the session's conversation state; one
/// generator per session, serialized by the caller.
pub struct QueryGenerator {
    llm: Arc<LlmManager>,
    validator: QueryValidator,
    allow_list: Vec<String>,
    system_prompt: String,
    quick_prompt: String,
    conversation: ConversationState,
    max_attempts: usize,
    analysis_temperature: f32,
}

impl QueryGenerator {
    pub fn new(llm: Arc<LlmManager>, catalog: &SchemaCatalog, config: &AppConfig) -> Self {
        Self {
            llm,
            validator: QueryValidator::new(config.query.strict_tables, config.query.row_limit),
            allow_list: catalog.allowed_tables(),
            system_prompt: context::build_system_prompt(catalog),
            quick_prompt: context::quick_context(catalog),
            conversation: ConversationState::new(),
            max_attempts: config.query.max_attempts.max(1),
            analysis_temperature: config.llm.analysis_temperature,
        }
    }

    /// Generate SQL for one question. The first turn carries the full schema
    /// context; follow-up turns downgrade to the condensed context to bound
    /// token cost. Only validated queries are recorded in the conversation.
    ///
    /// A model transport failure is returned as `Err` and is fatal to the
    /// request; a validation failure comes back as an invalid
    /// `GeneratedQuery` the retry loop can repair.
    pub async fn generate(
        &mut self,
        question: &str,
        use_conversation: bool,
    ) -> Result<GeneratedQuery, LlmError> {
        if use_conversation && !self.conversation.is_fresh() {
            self.conversation.replace_system(self.quick_prompt.clone());
        } else {
            self.conversation.reset(self.system_prompt.clone());
        }

        let mut messages = self.conversation.messages().to_vec();
        messages.push(ChatMessage::user(question));

        // Deterministic decoding for SQL.
        let raw = self.llm.complete(&messages, 0.0, SQL_MAX_TOKENS).await?;

        match self.validator.validate(&raw, &self.allow_list) {
            Ok(sql) => {
                self.conversation.append_turn(question, &sql);
                Ok(GeneratedQuery {
                    sql,
                    valid: true,
                    error: None,
                })
            }
            Err(e) => Ok(GeneratedQuery {
                sql: raw,
                valid: false,
                error: Some(e.to_string()),
            }),
        }
    }

    /// Drive the bounded generate-validate-execute loop. Validation and
    /// execution failures are fed back as corrective context and retried up
    /// to the attempt cap; `status` observes each attempt; `cancel` is
    /// checked between attempts.
    pub async fn generate_with_retry<F, Fut>(
        &mut self,
        question: &str,
        execute: F,
        mut status: impl FnMut(usize, &str),
        cancel: Option<&AtomicBool>,
    ) -> RetryReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<ResultFrame, ExecutionError>>,
    {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut prompt = question.to_string();

        for attempt in 1..=self.max_attempts {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return RetryReport {
                    outcome: RetryOutcome::Cancelled,
                    attempts,
                };
            }

            status(
                attempt,
                &format!("Generating SQL (attempt {}/{})", attempt, self.max_attempts),
            );

            let generated = match self.generate(&prompt, true).await {
                Ok(generated) => generated,
                Err(e) => {
                    return RetryReport {
                        outcome: RetryOutcome::ModelFailure(e),
                        attempts,
                    }
                }
            };

            if !generated.valid {
                let error = generated
                    .error
                    .unwrap_or_else(|| "could not generate a valid query".to_string());
                debug!("Attempt {} failed validation: {}", attempt, error);
                attempts.push(AttemptRecord {
                    attempt,
                    sql: generated.sql,
                    outcome: AttemptOutcome::ValidationFailed(error),
                });
                prompt = corrective_prompt(question, &attempts);
                continue;
            }

            status(attempt, "Executing query");
            match execute(generated.sql.clone()).await {
                Ok(frame) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        sql: generated.sql.clone(),
                        outcome: AttemptOutcome::Succeeded,
                    });
                    return RetryReport {
                        outcome: RetryOutcome::Success {
                            sql: generated.sql,
                            frame,
                        },
                        attempts,
                    };
                }
                Err(e) => {
                    let error = e.to_string();
                    debug!("Attempt {} failed execution: {}", attempt, error);
                    attempts.push(AttemptRecord {
                        attempt,
                        sql: generated.sql,
                        outcome: AttemptOutcome::ExecutionFailed(error),
                    });
                    prompt = corrective_prompt(question, &attempts);
                }
            }
        }

        let last_error = attempts
            .last()
            .and_then(|record| record.outcome.error_detail())
            .unwrap_or("all attempts failed")
            .to_string();

        RetryReport {
            outcome: RetryOutcome::Exhausted { last_error },
            attempts,
        }
    }

    /// Best-effort narrative summary of a result set via a second model call.
    /// Any failure degrades to a static placeholder; the SQL result is
    /// already valid and must still be shown.
    pub async fn analyze_results(
        &self,
        question: &str,
        sql: &str,
        frame: &ResultFrame,
    ) -> String {
        let messages = vec![
            ChatMessage::system(
                "You are a business data analyst. Summarize query results in two or three \
                 plain-language sentences, leading with the headline figure.",
            ),
            ChatMessage::user(format!(
                "Question: {}\n\nSQL used:\n{}\n\nResult ({} rows):\n{}",
                question,
                sql,
                frame.row_count(),
                frame.sample_markdown(ANALYSIS_SAMPLE_ROWS),
            )),
        ];

        match self
            .llm
            .complete(&messages, self.analysis_temperature, ANALYSIS_MAX_TOKENS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => ANALYSIS_FALLBACK.to_string(),
            Err(e) => {
                warn!("Result analysis failed: {}", e);
                ANALYSIS_FALLBACK.to_string()
            }
        }
    }

    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
    }

    pub fn turn_count(&self) -> usize {
        self.conversation.turn_count()
    }
}

/// Fold failed attempts into the next prompt so the model can repair its own
/// query instead of repeating it.
fn corrective_prompt(question: &str, attempts: &[AttemptRecord]) -> String {
    let mut prompt = format!("{}\n\nPrevious attempts that failed:\n", question);
    for record in attempts {
        if let Some(error) = record.outcome.error_detail() {
            prompt.push_str(&format!(
                "Attempt {}:\n{}\nError: {}\n\n",
                record.attempt, record.sql, error
            ));
        }
    }
    prompt.push_str("Please try a different approach.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatModel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Scripted stand-in for a chat provider. Pops one canned reply per call
    /// and records the messages it was given.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: usize,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(sql)) => Ok(sql),
                Some(Err(msg)) => Err(LlmError::Transport(msg)),
                None => Ok("SELECT customer_name FROM mart_customer_analytics".to_string()),
            }
        }
    }

    fn generator_with(replies: Vec<Result<&str, &str>>) -> (QueryGenerator, Arc<ScriptedModel>) {
        let model = Arc::new(ScriptedModel::new(replies));
        let shared = Arc::clone(&model);
        struct Shared(Arc<ScriptedModel>);
        #[async_trait]
        impl ChatModel for Shared {
            async fn complete(
                &self,
                messages: &[ChatMessage],
                temperature: f32,
                max_tokens: usize,
            ) -> Result<String, LlmError> {
                self.0.complete(messages, temperature, max_tokens).await
            }
        }

        let llm = Arc::new(LlmManager::with_model(Box::new(Shared(shared))));
        let catalog = SchemaCatalog::fallback();
        let config = AppConfig::default();
        (QueryGenerator::new(llm, &catalog, &config), model)
    }

    fn ok_frame() -> ResultFrame {
        ResultFrame {
            columns: vec!["customer_name".to_string()],
            rows: vec![vec![json!("Acme Corp")]],
        }
    }

    #[tokio::test]
    async fn generate_uses_full_context_then_quick_context() {
        let (mut generator, model) = generator_with(vec![
            Ok("SELECT customer_name FROM mart_customer_analytics"),
            Ok("SELECT territory_name FROM mart_sales"),
        ]);

        let first = generator.generate("top customers", true).await.unwrap();
        assert!(first.valid);

        let second = generator.generate("and by territory?", true).await.unwrap();
        assert!(second.valid);

        let seen = model.seen.lock().unwrap();
        assert!(seen[0][0].content.contains("## Database Schema"));
        assert!(seen[1][0].content.starts_with("Available tables:"));
        // the prior turn is preserved for the follow-up
        assert!(seen[1].iter().any(|m| m.content == "top customers"));
    }

    #[tokio::test]
    async fn invalid_sql_is_not_recorded_in_conversation() {
        let (mut generator, _model) =
            generator_with(vec![Ok("DROP TABLE mart_sales"), Ok("SELECT 1 FROM mart_sales")]);

        let bad = generator.generate("break things", true).await.unwrap();
        assert!(!bad.valid);
        assert!(bad.error.unwrap().contains("DROP"));
        assert_eq!(generator.turn_count(), 0);

        let good = generator.generate("count rows", true).await.unwrap();
        assert!(good.valid);
        assert_eq!(generator.turn_count(), 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_wrong_table_on_second_attempt() {
        // Attempt 1 references an unauthorized table, attempt 2 is valid.
        let (mut generator, model) = generator_with(vec![
            Ok("SELECT * FROM sales_orders"),
            Ok("SELECT customer_name FROM mart_customer_analytics"),
        ]);

        let exec_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&exec_calls);

        let report = generator
            .generate_with_retry(
                "top customers",
                move |_sql| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(ok_frame())
                    }
                },
                |_, _| {},
                None,
            )
            .await;

        assert!(matches!(report.outcome, RetryOutcome::Success { .. }));
        assert_eq!(report.attempts.len(), 2);
        assert!(matches!(
            report.attempts[0].outcome,
            AttemptOutcome::ValidationFailed(_)
        ));
        assert!(report.attempts[1].outcome.is_success());
        assert_eq!(exec_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        // the second prompt carried the corrective context
        let seen = model.seen.lock().unwrap();
        let retry_prompt = &seen[1].last().unwrap().content;
        assert!(retry_prompt.contains("Previous attempts that failed"));
        assert!(retry_prompt.contains("unauthorized table"));
        assert!(retry_prompt.contains("try a different approach"));
    }

    #[tokio::test]
    async fn exhausted_after_max_attempts_with_full_transcript() {
        let (mut generator, model) = generator_with(vec![
            Ok("SELECT 1 FROM nowhere"),
            Ok("SELECT 2 FROM nowhere"),
            Ok("SELECT 3 FROM nowhere"),
        ]);

        let report = generator
            .generate_with_retry(
                "anything",
                |_sql| async move { Ok(ok_frame()) },
                |_, _| {},
                None,
            )
            .await;

        match report.outcome {
            RetryOutcome::Exhausted { last_error } => {
                assert!(last_error.contains("unauthorized table"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn execution_failures_consume_attempts_too() {
        let (mut generator, model) = generator_with(vec![
            Ok("SELECT 1 FROM mart_sales"),
            Ok("SELECT 2 FROM mart_sales"),
            Ok("SELECT 3 FROM mart_sales"),
        ]);

        let exec_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&exec_calls);

        let report = generator
            .generate_with_retry(
                "anything",
                move |_sql| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(ExecutionError::Query("no such column: x".to_string()))
                    }
                },
                |_, _| {},
                None,
            )
            .await;

        assert!(matches!(report.outcome, RetryOutcome::Exhausted { .. }));
        assert_eq!(report.attempts.len(), 3);
        assert!(report
            .attempts
            .iter()
            .all(|a| matches!(a.outcome, AttemptOutcome::ExecutionFailed(_))));
        // bounded: no more than max_attempts calls to either collaborator
        assert_eq!(exec_calls.load(Ordering::SeqCst), 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transport_failure_is_fatal_without_retry() {
        let (mut generator, model) = generator_with(vec![
            Ok("SELECT 1 FROM nowhere"),
            Err("connection refused"),
        ]);

        let report = generator
            .generate_with_retry(
                "anything",
                |_sql| async move { Ok(ok_frame()) },
                |_, _| {},
                None,
            )
            .await;

        assert!(matches!(
            report.outcome,
            RetryOutcome::ModelFailure(LlmError::Transport(_))
        ));
        // the transcript keeps the attempt that preceded the failure
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_loop() {
        let (mut generator, model) = generator_with(vec![]);
        let cancel = AtomicBool::new(true);

        let report = generator
            .generate_with_retry(
                "anything",
                |_sql| async move { Ok(ok_frame()) },
                |_, _| {},
                Some(&cancel),
            )
            .await;

        assert!(matches!(report.outcome, RetryOutcome::Cancelled));
        assert!(report.attempts.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn status_callback_observes_each_attempt() {
        let (mut generator, _model) = generator_with(vec![
            Ok("SELECT 1 FROM nowhere"),
            Ok("SELECT customer_name FROM mart_customer_analytics"),
        ]);

        let mut observed = Vec::new();
        let report = generator
            .generate_with_retry(
                "anything",
                |_sql| async move { Ok(ok_frame()) },
                |attempt, message| observed.push((attempt, message.to_string())),
                None,
            )
            .await;

        assert!(matches!(report.outcome, RetryOutcome::Success { .. }));
        assert!(observed.iter().any(|(a, m)| *a == 1 && m.contains("1/3")));
        assert!(observed.iter().any(|(a, m)| *a == 2 && m.contains("2/3")));
    }

    #[tokio::test]
    async fn analysis_degrades_to_placeholder_on_failure() {
        let (generator, _model) = generator_with(vec![Err("rate limited")]);
        let summary = generator
            .analyze_results("total revenue", "SELECT 1", &ok_frame())
            .await;
        assert_eq!(summary, ANALYSIS_FALLBACK);
    }

    #[tokio::test]
    async fn analysis_returns_model_text_on_success() {
        let (generator, _model) =
            generator_with(vec![Ok("Revenue is concentrated in two territories.")]);
        let summary = generator
            .analyze_results("total revenue", "SELECT 1", &ok_frame())
            .await;
        assert_eq!(summary, "Revenue is concentrated in two territories.");
    }
}
