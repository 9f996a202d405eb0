//! Gemini-based translation using the Generative Language API.

use crate::chunk::Chunk;
use crate::config::ModelConfig;
use crate::error::{Result, TranslateError};
use crate::keys::{ApiKey, KeyPool};
use crate::translate::retry::parse_retry_delay;
use crate::translate::{language_name, Translator};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Cooldown applied to a rate limited key when the server gives no hint.
const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30);

/// Translator using Google Gemini API with a rotating key pool.
pub struct GeminiTranslator {
    client: Client,
    keys: Arc<KeyPool>,
    model: ModelConfig,
    base_url: String,
}

impl GeminiTranslator {
    pub fn new(keys: Arc<KeyPool>, model: ModelConfig) -> Result<Self> {
        let client = Client::builder().timeout(model.request_timeout()).build()?;
        Ok(Self {
            client,
            keys,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at a different API host (used by tests against a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model.name
    }

    pub fn keys(&self) -> &Arc<KeyPool> {
        &self.keys
    }

    fn endpoint(&self) -> String {
        let model = self.model.name.trim_start_matches("models/");
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    /// Build the translation prompt for one chunk.
    fn build_prompt(&self, chunk: &Chunk, target_lang: &str) -> Result<String> {
        let lang_name = language_name(target_lang);
        let input = serde_json::to_string_pretty(&chunk.to_json_object())?;

        Ok(format!(
            r#"You are an expert translation service. Translate the string values of the following JSON object into {lang_name}.
IMPORTANT RULES:
1. Translate ONLY the values. Never translate or change the keys.
2. Keep a value unchanged if it is an identifier, a file path, a placeholder (such as %s, {{{{variable}}}} or {{0}}), a version number, a URL, an email address, or a random-looking string.
3. Preserve line breaks, Markdown and HTML markup inside each value.
4. Return every key from the input exactly once.
5. Respond with a single valid JSON object only, with no commentary or code fences.

Input JSON to translate:
{input}"#
        ))
    }

    fn build_request(&self, prompt: String) -> GenerateContentRequest {
        let system_instruction = Some(self.model.system_instruction.trim())
            .filter(|s| !s.is_empty())
            .map(|s| Content {
                role: None,
                parts: vec![Part { text: s.to_string() }],
            });

        let thinking_config = self
            .model
            .thinking_budget
            .filter(|_| supports_thinking(&self.model.name))
            .map(|thinking_budget| ThinkingConfig { thinking_budget });

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: prompt }],
            }],
            system_instruction,
            generation_config: GenerationConfig {
                temperature: self.model.temperature,
                response_mime_type: "application/json",
                thinking_config,
            },
        }
    }

    /// Map a non-success response to an error, updating the key's state.
    fn classify_failure(&self, key: &ApiKey, status: u16, body: &str) -> TranslateError {
        let message = error_message(body);

        if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
            let cooldown = parse_retry_delay(body).unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN);
            self.keys.mark_rate_limited(key, cooldown);
            return TranslateError::RateLimited {
                retry_after: self.keys.min_cooldown(),
            };
        }

        let key_invalid = body.contains("API_KEY_INVALID") || body.contains("API key not valid");
        if matches!(status, 401 | 403) || (status == 400 && key_invalid) {
            self.keys.disable(key);
            if self.keys.all_disabled() {
                return TranslateError::Auth(message);
            }
            return TranslateError::KeyRejected {
                key: key.masked(),
                message,
            };
        }

        TranslateError::Api { status, message }
    }

    /// Validate the model output against the chunk's keys.
    ///
    /// Every source key must be present. Keys the model invented are dropped.
    fn parse_translation(&self, text: &str, chunk: &Chunk) -> Result<HashMap<String, String>> {
        let object = extract_json_object(text).ok_or_else(|| {
            TranslateError::InvalidResponse(format!(
                "no JSON object in response: {}",
                preview(text)
            ))
        })?;

        let mut translations = HashMap::with_capacity(chunk.units.len());
        let mut missing = Vec::new();
        let mut malformed = Vec::new();

        for unit in &chunk.units {
            match object.get(&unit.key) {
                Some(Value::String(s)) => {
                    translations.insert(unit.key.clone(), s.clone());
                }
                Some(scalar @ (Value::Number(_) | Value::Bool(_))) => {
                    translations.insert(unit.key.clone(), scalar.to_string());
                }
                Some(Value::Null) | None => missing.push(unit.key.as_str()),
                Some(Value::Array(_) | Value::Object(_)) => malformed.push(unit.key.as_str()),
            }
        }

        if !malformed.is_empty() {
            let shown: Vec<&str> = malformed.iter().take(5).copied().collect();
            return Err(TranslateError::InvalidResponse(format!(
                "{} key(s) have non-string values ({})",
                malformed.len(),
                shown.join(", ")
            )));
        }

        if !missing.is_empty() {
            let shown: Vec<&str> = missing.iter().take(5).copied().collect();
            return Err(TranslateError::InvalidResponse(format!(
                "missing {} of {} keys ({})",
                missing.len(),
                chunk.units.len(),
                shown.join(", ")
            )));
        }

        let expected: HashSet<&str> = chunk.keys().collect();
        let extra: Vec<&String> = object
            .keys()
            .filter(|k| !expected.contains(k.as_str()))
            .collect();
        if !extra.is_empty() {
            warn!(
                "Chunk {}: dropping {} unexpected key(s) from response: {:?}",
                chunk.index,
                extra.len(),
                extra
            );
        }

        Ok(translations)
    }
}

fn supports_thinking(model: &str) -> bool {
    let model = model.trim_start_matches("models/");
    !(model.starts_with("gemini-1.") || model.starts_with("gemini-2.0"))
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(120).collect();
    if text.chars().count() > 120 {
        out.push_str("...");
    }
    out
}

/// Pull the message out of a Google error envelope, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| preview(body.trim()))
}

fn fenced_json_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*\})\s*```").expect("valid fenced JSON regex")
    })
}

/// Find the JSON object in a model reply.
///
/// Accepts a bare object, an object inside a ```json fence, or an object
/// surrounded by stray prose.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();

    let candidate = match fenced_json_regex().captures(trimmed) {
        Some(caps) => caps.get(1)?.as_str(),
        None => {
            let stripped = trimmed.strip_prefix("json").unwrap_or(trimmed);
            let start = stripped.find('{')?;
            let end = stripped.rfind('}')?;
            if end < start {
                return None;
            }
            &stripped[start..=end]
        }
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    message: String,
}

impl GenerateContentResponse {
    /// Concatenated answer text of the first candidate, skipping thoughts.
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(TranslateError::InvalidResponse(format!(
                "prompt blocked: {}",
                reason
            )));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| TranslateError::InvalidResponse("no candidates".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return Err(TranslateError::InvalidResponse(format!(
                "empty response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate_chunk(
        &self,
        chunk: &Chunk,
        target_lang: &str,
    ) -> Result<HashMap<String, String>> {
        if chunk.units.is_empty() {
            return Ok(HashMap::new());
        }

        let key = match self.keys.next_key() {
            Some(key) => key,
            None if self.keys.is_empty() => return Err(TranslateError::NoApiKeys),
            None => {
                return Err(TranslateError::Auth(
                    "every configured API key was rejected".to_string(),
                ))
            }
        };

        // Every key is cooling down; wait for this one
        if let Some(wait) = key.cooldown_remaining() {
            debug!("All keys cooling down, waiting {:.1}s", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }

        debug!(
            "Chunk {}: {} unit(s), {} chars to {} via key {}",
            chunk.index,
            chunk.units.len(),
            chunk.char_len(),
            target_lang,
            key.masked()
        );

        let prompt = self.build_prompt(chunk, target_lang)?;
        let request = self.build_request(prompt);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", key.value())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(self.classify_failure(&key, status.as_u16(), &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            TranslateError::InvalidResponse(format!("malformed response body: {}", e))
        })?;

        let text = parsed.into_text()?;
        self.parse_translation(&text, chunk)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TextUnit;

    fn translator(keys: &[&str]) -> GeminiTranslator {
        let pool = Arc::new(KeyPool::new(keys.iter().map(|k| k.to_string()).collect()));
        GeminiTranslator::new(pool, ModelConfig::default()).unwrap()
    }

    fn chunk() -> Chunk {
        Chunk {
            index: 0,
            units: vec![
                TextUnit::new("menu.title", "Settings"),
                TextUnit::new("menu.items[0]", "Open {file}"),
            ],
        }
    }

    #[test]
    fn test_gemini_translator_creation() {
        let translator = translator(&["test-key"]);
        assert_eq!(translator.name(), "gemini");
        assert_eq!(translator.model(), "gemini-2.0-flash");
        assert_eq!(
            translator.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_with_base_url() {
        let translator = translator(&["k"]).with_base_url("http://127.0.0.1:9999/");
        assert_eq!(
            translator.endpoint(),
            "http://127.0.0.1:9999/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_build_prompt() {
        let prompt = translator(&["k"]).build_prompt(&chunk(), "ja").unwrap();
        assert!(prompt.contains("into Japanese"));
        assert!(prompt.contains("\"menu.title\": \"Settings\""));
        assert!(prompt.contains("{{variable}}"));
    }

    #[test]
    fn test_build_request_json() {
        let translator = translator(&["k"]);
        let request = serde_json::to_value(translator.build_request("hi".into())).unwrap();

        assert_eq!(request["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(
            request["generationConfig"]["responseMimeType"],
            "application/json"
        );
        // 2.0 models reject thinking settings
        assert!(request["generationConfig"].get("thinkingConfig").is_none());
        assert!(request.get("systemInstruction").is_none());
    }

    #[test]
    fn test_build_request_with_thinking_and_system_instruction() {
        let pool = Arc::new(KeyPool::new(vec!["k".into()]));
        let model = ModelConfig {
            name: "gemini-2.5-flash".into(),
            system_instruction: "Use a formal tone.".into(),
            ..ModelConfig::default()
        };
        let translator = GeminiTranslator::new(pool, model).unwrap();
        let request = serde_json::to_value(translator.build_request("hi".into())).unwrap();

        assert_eq!(
            request["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            0
        );
        assert_eq!(
            request["systemInstruction"]["parts"][0]["text"],
            "Use a formal tone."
        );
    }

    #[test]
    fn test_extract_json_object() {
        let plain = extract_json_object(r#"{"a": "x"}"#).unwrap();
        assert_eq!(plain["a"], "x");

        let fenced = extract_json_object("Here you go:\n```json\n{\"a\": \"y\"}\n```\n").unwrap();
        assert_eq!(fenced["a"], "y");

        let prefixed = extract_json_object("json\n{\"a\": \"z\"}").unwrap();
        assert_eq!(prefixed["a"], "z");

        let prose = extract_json_object("Sure! {\"a\": {\"b\": 1}} Hope it helps.").unwrap();
        assert_eq!(prose["a"]["b"], 1);

        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("[1, 2]").is_none());
        assert!(extract_json_object("} backwards {").is_none());
    }

    #[test]
    fn test_parse_translation_drops_extra_keys() {
        let translator = translator(&["k"]);
        let reply = r#"{"menu.title": "Cài đặt", "menu.items[0]": "Mở {file}", "bonus": "?"}"#;
        let result = translator.parse_translation(reply, &chunk()).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result["menu.title"], "Cài đặt");
        assert!(!result.contains_key("bonus"));
    }

    #[test]
    fn test_parse_translation_missing_keys_is_retryable() {
        let translator = translator(&["k"]);
        let err = translator
            .parse_translation(r#"{"menu.title": "Cài đặt"}"#, &chunk())
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidResponse(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("menu.items[0]"));
    }

    #[test]
    fn test_parse_translation_nested_value_is_retryable() {
        let translator = translator(&["k"]);
        let err = translator
            .parse_translation(
                r#"{"menu.title": {"text": "Cài đặt"}, "menu.items[0]": "Mở {file}"}"#,
                &chunk(),
            )
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidResponse(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("menu.title"));
    }

    #[test]
    fn test_parse_translation_stringifies_scalars() {
        let translator = translator(&["k"]);
        let result = translator
            .parse_translation(r#"{"menu.title": 42, "menu.items[0]": true}"#, &chunk())
            .unwrap();
        assert_eq!(result["menu.title"], "42");
        assert_eq!(result["menu.items[0]"], "true");
    }

    #[test]
    fn test_classify_rate_limit_cools_key() {
        let translator = translator(&["key-one", "key-two"]);
        let key = translator.keys().next_key().unwrap();
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;

        let err = translator.classify_failure(&key, 429, body);
        // Another key is free, so no forced wait
        assert!(matches!(err, TranslateError::RateLimited { retry_after: None }));
        assert!(key.is_cooling_down());
    }

    #[test]
    fn test_classify_invalid_key() {
        let translator = translator(&["key-one", "key-two"]);
        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}}"#;

        let first = translator.keys().next_key().unwrap();
        let err = translator.classify_failure(&first, 400, body);
        assert!(matches!(err, TranslateError::KeyRejected { .. }));

        let second = translator.keys().next_key().unwrap();
        let err = translator.classify_failure(&second, 400, body);
        assert!(matches!(err, TranslateError::Auth(ref m) if m.starts_with("API key not valid")));
    }

    #[test]
    fn test_classify_other_errors() {
        let translator = translator(&["k"]);
        let key = translator.keys().next_key().unwrap();
        let err = translator.classify_failure(&key, 500, "upstream exploded");
        assert!(matches!(err, TranslateError::Api { status: 500, ref message } if message == "upstream exploded"));
        assert!(!key.is_disabled());
    }

    #[test]
    fn test_response_text_skips_thoughts() {
        let body = r#"{"candidates": [{"content": {"parts": [
            {"text": "thinking...", "thought": true},
            {"text": "{\"a\": \"b\"}"}
        ]}, "finishReason": "STOP"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_text().unwrap(), "{\"a\": \"b\"}");
    }

    #[test]
    fn test_response_blocked() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let err = parsed.into_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
