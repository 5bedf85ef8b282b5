//! Extraction Client
//!
//! Turns the raw text of a posting into [`JobFields`] with a single completion call.
//! Failures are reported as [`AppError::Upstream`] (the service could not answer) or
//! [`AppError::Parse`] (it answered with something that is not the requested object).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::LLMConfig;
use crate::llm::LLMAdapter;
use crate::models::JobFields;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> AppResult<JobFields>;
}

pub struct LlmExtractor {
    adapter: Arc<dyn LLMAdapter>,
    model: String,
    max_tokens: u32,
}

impl LlmExtractor {
    pub fn new(adapter: Arc<dyn LLMAdapter>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            adapter,
            model: model.into(),
            max_tokens,
        }
    }

    pub fn from_config(adapter: Arc<dyn LLMAdapter>, config: &LLMConfig) -> Self {
        Self::new(adapter, config.model.clone(), config.max_tokens)
    }

    pub fn build_prompt(text: &str) -> String {
        format!(
            r#"Extract the following information from this job posting and return a JSON object with the extracted data:
```json
{{
    "Job Title": "",
    "Company Name": "",
    "Location": "",
    "Salary": "",
    "Job Description": ""
}}
```
Job Posting:
{}"#,
            text
        )
    }

    fn request_for(&self, text: &str) -> LLMRequest {
        LLMRequest {
            model: self.model.clone(),
            messages: vec![
                LLMMessage::system("You extract structured data from job postings. Reply with JSON only."),
                LLMMessage::user(Self::build_prompt(text)),
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.0),
        }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, text: &str) -> AppResult<JobFields> {
        let request = self.request_for(text);
        let response = self.adapter.create_chat_completion(&request).await?;

        debug!(
            finish_reason = %response.finish_reason,
            completion_tokens = response.usage.completion_tokens,
            "Extraction response received"
        );

        let fields = parse_fields(&response.content)?;
        info!(
            title = fields.job_title.as_deref().unwrap_or(""),
            "Extracted posting fields"
        );
        Ok(fields)
    }
}

/// Parse a completion into fields. Accepts the object bare or wrapped in a
/// Markdown code fence; anything else is a parse error.
pub fn parse_fields(raw: &str) -> AppResult<JobFields> {
    let body = strip_code_fence(raw.trim());

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AppError::Parse(format!("response is not valid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(AppError::Parse(format!(
            "expected a JSON object, got: {}",
            value
        )));
    }

    serde_json::from_value(value)
        .map_err(|e| AppError::Parse(format!("unexpected field shape: {}", e)))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`) on the opening line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LLMResponse, TokenUsage};
    use std::sync::Mutex;

    struct ScriptedAdapter {
        reply: AppResult<String>,
        seen: Mutex<Vec<LLMRequest>>,
    }

    impl ScriptedAdapter {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(AppError::Upstream("timeout".to_string())),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMAdapter for ScriptedAdapter {
        async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(LLMResponse {
                    content: text.clone(),
                    finish_reason: "stop".to_string(),
                    usage: TokenUsage::default(),
                }),
                Err(e) => Err(AppError::Upstream(e.to_string())),
            }
        }
    }

    #[test]
    fn test_prompt_names_every_field_and_embeds_posting() {
        let prompt = LlmExtractor::build_prompt("Engineer at Acme, NYC, $100k");
        for key in ["Job Title", "Company Name", "Location", "Salary", "Job Description"] {
            assert!(prompt.contains(key), "prompt is missing {}", key);
        }
        assert!(prompt.ends_with("Engineer at Acme, NYC, $100k"));
    }

    #[test]
    fn test_parse_plain_object() {
        let fields = parse_fields(
            r#" {"Job Title":"Engineer","Company Name":"Acme","Location":"NYC","Salary":"$100k","Job Description":""} "#,
        )
        .unwrap();
        assert_eq!(fields.job_title.as_deref(), Some("Engineer"));
        assert_eq!(fields.job_description.as_deref(), Some(""));
    }

    #[test]
    fn test_parse_fenced_object() {
        let fields = parse_fields("```json\n{\"Company Name\": \"Acme\"}\n```").unwrap();
        assert_eq!(fields.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_parse_single_line_fence() {
        let fields = parse_fields(r#"```json {"Job Title": "Engineer"}```"#).unwrap();
        assert_eq!(fields.job_title.as_deref(), Some("Engineer"));

        let fields = parse_fields(r#"```{"Location": "NYC"}```"#).unwrap();
        assert_eq!(fields.location.as_deref(), Some("NYC"));
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_fields("Sure! The job title is Engineer.").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_non_object_json() {
        assert!(matches!(parse_fields("[1, 2]").unwrap_err(), AppError::Parse(_)));
        assert!(matches!(parse_fields("\"Engineer\"").unwrap_err(), AppError::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_truncated_output() {
        let err = parse_fields(r#"{"Job Title": "Engineer", "Job Descr"#).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[tokio::test]
    async fn test_extract_sends_bounded_request() {
        let adapter = Arc::new(ScriptedAdapter::replying(r#"{"Job Title":"Engineer"}"#));
        let extractor = LlmExtractor::new(adapter.clone(), "gpt-4o-mini", 150);

        let fields = extractor.extract("Engineer at Acme").await.unwrap();
        assert_eq!(fields.job_title.as_deref(), Some("Engineer"));

        let seen = adapter.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].max_tokens, Some(150));
        assert_eq!(seen[0].model, "gpt-4o-mini");
        assert!(seen[0].messages.last().unwrap().content.contains("Engineer at Acme"));
    }

    #[tokio::test]
    async fn test_extract_propagates_upstream_error_without_retrying() {
        let adapter = Arc::new(ScriptedAdapter::failing());
        let extractor = LlmExtractor::new(adapter.clone(), "gpt-4o-mini", 150);

        let err = extractor.extract("anything").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(adapter.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extract_reports_parse_error() {
        let adapter = Arc::new(ScriptedAdapter::replying("I cannot help with that."));
        let extractor = LlmExtractor::new(adapter, "gpt-4o-mini", 150);

        let err = extractor.extract("anything").await.unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }
}
