//! LLM invocation with strict validation, repair, and raw fallback
//!
//! The invariant of this layer: no model output is ever discarded. A reply
//! that fails strict validation goes through one repair call; if that also
//! fails, the raw content travels up unparsed and the worker persists it as a
//! fallback finding.

use crate::provider::{CompletionRequest, LlmProvider, DEFAULT_MAX_TOKENS};
use crate::schema::{self, AnalysisOutput, FORMAT_INSTRUCTIONS};
use crate::template::{AnalysisKind, PromptTemplate, PromptVariables};
use sourcelens_core::retry::{retry, RetryConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sentinel parsing error after transport retries are exhausted
pub const LLM_UNREACHABLE: &str = "llm_unreachable";

/// Result of one analysis invocation
#[derive(Debug, Clone)]
pub struct LlmAnalysisResult {
    /// Full model reply, always present (empty when the provider was
    /// unreachable)
    pub raw_content: String,
    /// Validated output when parsing (or repair) succeeded
    pub parsed_output: Option<AnalysisOutput>,
    /// Whether `parsed_output` is populated
    pub parsing_succeeded: bool,
    /// The last parse error when it is not
    pub parsing_error: Option<String>,
    /// Non-fatal coercion notes
    pub coercion_warnings: Vec<String>,
    /// Provider label
    pub provider_name: String,
    /// Model name
    pub model_name: String,
}

/// Provider-agnostic analysis client
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
}

impl LlmClient {
    /// Create a client with the default retry policy (3 attempts, backoff)
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Render the template, call the model, validate, repair once if needed.
    ///
    /// Transport failures are retried with backoff; after exhaustion the
    /// result carries empty raw content and the [`LLM_UNREACHABLE`] error so
    /// the worker can continue without structured findings.
    pub async fn invoke(
        &self,
        kind: AnalysisKind,
        variables: &PromptVariables,
        temperature: f32,
    ) -> LlmAnalysisResult {
        let template = PromptTemplate::for_kind(kind);
        let prompt = template.render(variables);
        debug!(
            template = template.name,
            provider = self.provider.name(),
            prompt_bytes = prompt.len(),
            "invoking llm"
        );

        let request = CompletionRequest {
            prompt,
            system: None,
            temperature,
            max_tokens: DEFAULT_MAX_TOKENS,
        };
        let raw_content = match self.complete_with_retry(&request).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "llm unreachable after retries");
                return self.result(String::new(), None, Some(LLM_UNREACHABLE.to_string()), vec![]);
            }
        };
        info!(
            provider = self.provider.name(),
            reply_bytes = raw_content.len(),
            "llm reply received"
        );
        debug!(raw = %raw_content, "raw llm reply");

        match schema::validate(&raw_content) {
            Ok(outcome) => {
                self.result(raw_content, Some(outcome.output), None, outcome.warnings)
            }
            Err(parse_error) => {
                warn!(error = %parse_error, "strict parse failed, attempting repair");
                self.repair(raw_content, parse_error, temperature).await
            }
        }
    }

    /// One repair pass: hand the broken reply and the parse error back to the
    /// model with the schema and ask for a corrected document
    async fn repair(
        &self,
        raw_content: String,
        parse_error: String,
        temperature: f32,
    ) -> LlmAnalysisResult {
        let repair_prompt = format!(
            "Your previous reply could not be parsed as the required JSON \
             document.\n\nParse error: {parse_error}\n\nPrevious reply:\n\
             {raw_content}\n\n{FORMAT_INSTRUCTIONS}\n\nReply with the corrected \
             JSON document only."
        );
        let request = CompletionRequest {
            prompt: repair_prompt,
            system: None,
            temperature,
            max_tokens: DEFAULT_MAX_TOKENS,
        };

        let repaired = match self.complete_with_retry(&request).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "repair call unreachable");
                return self.result(raw_content, None, Some(parse_error), vec![]);
            }
        };

        match schema::validate(&repaired) {
            Ok(outcome) => {
                info!("repair pass recovered a valid document");
                // The original reply stays the raw record of what the model said
                self.result(raw_content, Some(outcome.output), None, outcome.warnings)
            }
            Err(second_error) => {
                warn!(error = %second_error, "repair pass failed, falling back to raw content");
                self.result(raw_content, None, Some(second_error), vec![])
            }
        }
    }

    async fn complete_with_retry(
        &self,
        request: &CompletionRequest,
    ) -> sourcelens_core::Result<String> {
        retry(&self.retry, "llm_complete", || async {
            self.provider.complete(request).await
        })
        .await
    }

    fn result(
        &self,
        raw_content: String,
        parsed_output: Option<AnalysisOutput>,
        parsing_error: Option<String>,
        coercion_warnings: Vec<String>,
    ) -> LlmAnalysisResult {
        LlmAnalysisResult {
            raw_content,
            parsing_succeeded: parsed_output.is_some(),
            parsed_output,
            parsing_error,
            coercion_warnings,
            provider_name: self.provider.name().to_string(),
            model_name: self.provider.model().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sourcelens_core::error::{Error, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted provider: pops one canned reply per call
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted-model"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(Error::llm("script exhausted"));
            }
            replies.remove(0)
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    const GOOD_JSON: &str = r#"{"project_summary": "ok", "findings": []}"#;

    #[tokio::test]
    async fn test_valid_reply_parses_first_try() {
        let provider = ScriptedProvider::new(vec![Ok(GOOD_JSON.to_string())]);
        let client = LlmClient::new(provider.clone()).with_retry(fast_retry());
        let result = client
            .invoke(AnalysisKind::FullArchitecture, &PromptVariables::new(), 0.1)
            .await;
        assert!(result.parsing_succeeded);
        assert_eq!(result.raw_content, GOOD_JSON);
        assert_eq!(result.provider_name, "scripted");
        assert_eq!(provider.call_count(), 1, "no repair call needed");
    }

    #[tokio::test]
    async fn test_prose_wrapped_json_needs_no_repair() {
        let wrapped = format!("Here's the analysis: {GOOD_JSON}");
        let provider = ScriptedProvider::new(vec![Ok(wrapped.clone())]);
        let client = LlmClient::new(provider.clone()).with_retry(fast_retry());
        let result = client
            .invoke(AnalysisKind::FullArchitecture, &PromptVariables::new(), 0.1)
            .await;
        assert!(result.parsing_succeeded, "embedded object extraction handles this");
        assert_eq!(result.raw_content, wrapped);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_repair_recovers_structured_output() {
        let provider = ScriptedProvider::new(vec![
            Ok("I think the code is mostly fine, hard to say.".to_string()),
            Ok(GOOD_JSON.to_string()),
        ]);
        let client = LlmClient::new(provider.clone()).with_retry(fast_retry());
        let result = client
            .invoke(AnalysisKind::CodeReview, &PromptVariables::new(), 0.1)
            .await;
        assert!(result.parsing_succeeded);
        assert!(
            result.raw_content.contains("mostly fine"),
            "raw content must stay the original reply"
        );
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_total_parse_failure_preserves_raw() {
        let prose = "Honestly this is just prose, twice.";
        let provider = ScriptedProvider::new(vec![
            Ok(prose.to_string()),
            Ok("Still prose after repair.".to_string()),
        ]);
        let client = LlmClient::new(provider).with_retry(fast_retry());
        let result = client
            .invoke(AnalysisKind::Security, &PromptVariables::new(), 0.1)
            .await;
        assert!(!result.parsing_succeeded);
        assert_eq!(result.raw_content, prose);
        assert!(result.parsing_error.is_some());
    }

    #[tokio::test]
    async fn test_transport_retry_then_success() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::llm("503")),
            Ok(GOOD_JSON.to_string()),
        ]);
        let client = LlmClient::new(provider.clone()).with_retry(fast_retry());
        let result = client
            .invoke(AnalysisKind::Performance, &PromptVariables::new(), 0.1)
            .await;
        assert!(result.parsing_succeeded);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_provider_degrades() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::llm("down")),
            Err(Error::llm("down")),
            Err(Error::llm("down")),
        ]);
        let client = LlmClient::new(provider.clone()).with_retry(fast_retry());
        let result = client
            .invoke(AnalysisKind::Lifecycle, &PromptVariables::new(), 0.1)
            .await;
        assert!(!result.parsing_succeeded);
        assert_eq!(result.raw_content, "");
        assert_eq!(result.parsing_error.as_deref(), Some(LLM_UNREACHABLE));
        assert_eq!(provider.call_count(), 3, "three transport attempts");
    }
}
