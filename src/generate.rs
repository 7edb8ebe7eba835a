//! Answer generation through a remote language model.
//!
//! [`LanguageModel`] is the collaborator seam; [`GeminiModel`] is the
//! production implementation. [`AnswerGenerator`] layers the two response
//! contracts on top:
//!
//! - free text: the model's reply, verbatim
//! - structured: a JSON object validated against [`ResponseSchema`]
//!
//! Failures surface as [`RagError`]; nothing here turns an error into an
//! answer string.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::models::StructuredAnswer;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sampling and output controls passed with every completion.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    /// When set, the model is asked for a JSON object with these string fields.
    pub json_fields: Option<Vec<String>>,
}

impl GenerationOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
            json_fields: None,
        }
    }

    fn with_json(&self, fields: &[String]) -> Self {
        Self {
            json_fields: Some(fields.to_vec()),
            ..self.clone()
        }
    }
}

/// A remote text-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt`, returning the raw reply text.
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

// ============ Gemini ============

/// Gemini `generateContent` client.
pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiModel {
    /// Fails with [`RagError::MissingCredential`] when the API key variable
    /// is unset, so a misconfigured deployment never starts serving.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                return Err(RagError::MissingCredential {
                    name: config.api_key_env.clone(),
                })
            }
        };
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| RagError::Generation(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.trim_start_matches("models/").to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = request_body(prompt, options);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Generation(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!(
                "Gemini API error {}: {}",
                status, text
            )));
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid response body: {}", e)))?;
        candidate_text(&json)
    }
}

fn request_body(prompt: &str, options: &GenerationOptions) -> Value {
    let mut generation_config = json!({
        "temperature": options.temperature,
        "topP": options.top_p,
        "topK": options.top_k,
        "maxOutputTokens": options.max_output_tokens,
    });
    if let Some(fields) = &options.json_fields {
        generation_config["responseMimeType"] = json!("application/json");
        generation_config["responseSchema"] = ResponseSchema::new(fields.clone()).to_json_schema();
    }
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": generation_config,
    })
}

/// Concatenate the parts of the first candidate.
fn candidate_text(response: &Value) -> Result<String> {
    let candidate = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let reason = response
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .map(|r| format!("prompt blocked: {}", r))
                .unwrap_or_else(|| "response has no candidates".to_string());
            RagError::Generation(reason)
        })?;
    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    Ok(text)
}

// ============ Structured output ============

/// A closed set of required string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSchema {
    fields: Vec<String>,
}

impl ResponseSchema {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// OpenAPI-subset schema in the shape Gemini's `responseSchema` accepts.
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.clone(), json!({ "type": "STRING" })))
            .collect();
        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": self.fields,
        })
    }

    /// Parse and validate a model reply. Extra keys are dropped.
    pub fn parse(&self, raw: &str) -> Result<StructuredAnswer> {
        let malformed = |reason: String| RagError::MalformedResponse {
            reason,
            raw: raw.to_string(),
        };
        let value: Value = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| malformed("expected a JSON object".to_string()))?;

        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| !object.contains_key(f.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(malformed(format!("missing fields: {}", missing.join(", "))));
        }

        let mut fields = BTreeMap::new();
        for name in &self.fields {
            match object.get(name).and_then(Value::as_str) {
                Some(s) => {
                    fields.insert(name.clone(), s.to_string());
                }
                None => return Err(malformed(format!("field {} is not a string", name))),
            }
        }
        Ok(StructuredAnswer::from_fields(fields))
    }
}

/// Drop a surrounding Markdown code fence such as ```` ```json ... ``` ````.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. "json") on the opening line.
    match inner.find('\n') {
        Some(nl) => inner[nl + 1..].trim(),
        None => inner.trim(),
    }
}

// ============ AnswerGenerator ============

/// Sends prompts to a [`LanguageModel`] under one of two response contracts.
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    options: GenerationOptions,
    schema: ResponseSchema,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, options: GenerationOptions, schema: ResponseSchema) -> Self {
        Self {
            model,
            options,
            schema,
        }
    }

    /// Wire a [`GeminiModel`] from `[generation]` configuration.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let model = GeminiModel::new(config)?;
        Ok(Self::new(
            Arc::new(model),
            GenerationOptions::from_config(config),
            ResponseSchema::new(config.fields.clone()),
        ))
    }

    pub fn schema(&self) -> &ResponseSchema {
        &self.schema
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        require_prompt(prompt)?;
        let reply = self.model.complete(prompt, &self.options).await?;
        if reply.trim().is_empty() {
            return Err(RagError::Generation("model returned an empty answer".to_string()));
        }
        Ok(reply)
    }

    pub async fn generate_structured(&self, prompt: &str) -> Result<StructuredAnswer> {
        require_prompt(prompt)?;
        let options = self.options.with_json(self.schema.fields());
        let reply = self.model.complete(prompt, &options).await?;
        self.schema.parse(&reply).map_err(|e| {
            tracing::warn!(error = %e, "structured answer rejected");
            e
        })
    }
}

fn require_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(RagError::InvalidArgument("prompt must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        seen: Mutex<Vec<GenerationOptions>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _prompt: &str, options: &GenerationOptions) -> Result<String> {
            self.seen.lock().unwrap().push(options.clone());
            Ok(self.reply.clone())
        }
    }

    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            ["initial", "promotion", "information", "invite"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn generator(model: Arc<Scripted>) -> AnswerGenerator {
        AnswerGenerator::new(
            model,
            GenerationOptions::from_config(&GenerationConfig::default()),
            schema(),
        )
    }

    const FULL: &str = r#"{"initial":"Olá","promotion":"10% off","information":"Aberto","invite":"Venha!"}"#;

    #[tokio::test]
    async fn text_contract_returns_reply() {
        let model = Scripted::new("Resposta");
        let answer = generator(model.clone()).generate_text("pergunta").await.unwrap();
        assert_eq!(answer, "Resposta");
        assert_eq!(model.seen.lock().unwrap()[0].json_fields, None);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_calling_model() {
        let model = Scripted::new("x");
        let err = generator(model.clone()).generate_text("   ").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_reply_is_generation_error() {
        let err = generator(Scripted::new("  ")).generate_text("q").await.unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }

    #[tokio::test]
    async fn structured_contract_requests_json() {
        let model = Scripted::new(FULL);
        let answer = generator(model.clone()).generate_structured("q").await.unwrap();
        assert_eq!(answer.get("invite"), Some("Venha!"));
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].json_fields.as_ref().map(Vec::len), Some(4));
    }

    #[test]
    fn parse_accepts_fenced_json_and_drops_extras() {
        let raw = format!("```json\n{}\n```", FULL.replace("}", r#","extra":"x"}"#));
        let answer = schema().parse(&raw).unwrap();
        assert_eq!(answer.fields().len(), 4);
        assert_eq!(answer.get("extra"), None);
    }

    #[test]
    fn parse_reports_missing_fields_with_raw_payload() {
        let raw = r#"{"initial":"Olá","invite":"Venha"}"#;
        match schema().parse(raw).unwrap_err() {
            RagError::MalformedResponse { reason, raw: payload } => {
                assert!(reason.contains("promotion"));
                assert!(reason.contains("information"));
                assert_eq!(payload, raw);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_non_objects_and_non_strings() {
        assert!(matches!(
            schema().parse("not json"),
            Err(RagError::MalformedResponse { .. })
        ));
        assert!(matches!(
            schema().parse(r#"["a"]"#),
            Err(RagError::MalformedResponse { .. })
        ));
        let numeric = FULL.replace(r#""Aberto""#, "7");
        assert!(matches!(
            schema().parse(&numeric),
            Err(RagError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn request_body_carries_sampling_and_schema() {
        let options = GenerationOptions::from_config(&GenerationConfig::default());
        let body = request_body("hi", &options);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert!(body["generationConfig"].get("responseSchema").is_none());

        let body = request_body("hi", &options.with_json(schema().fields()));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["required"][3], "invite");
    }

    #[test]
    fn candidate_text_joins_parts_and_reports_blocks() {
        let response = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Olá, " }, { "text": "mundo" }] } }]
        });
        assert_eq!(candidate_text(&response).unwrap(), "Olá, mundo");

        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        match candidate_text(&blocked).unwrap_err() {
            RagError::Generation(msg) => assert!(msg.contains("SAFETY")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_key_fails_at_construction() {
        let config = GenerationConfig {
            api_key_env: "DOCBOT_TEST_UNSET_GENERATION_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            GeminiModel::new(&config),
            Err(RagError::MissingCredential { .. })
        ));
    }
}
