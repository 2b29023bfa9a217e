//! Gemini `generateContent` REST client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{GenerateRequest, GenerateResponse, LlmClient, LlmError, TurnRole};
use crate::config::LlmConfig;
use crate::tools::ToolCall;

// ── API types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations<'a> {
    function_declarations: &'a [Value],
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: Some(text.to_string()),
            function_call: None,
        }],
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::NotConfigured("GEMINI_API_KEY is not set".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn build_body<'a>(&self, request: &'a GenerateRequest) -> ApiRequest<'a> {
        let mut contents: Vec<Content> = request
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Model => "model",
                };
                text_content(Some(role), &turn.text)
            })
            .collect();
        contents.push(text_content(Some("user"), &request.message));

        let system_instruction = if request.system.trim().is_empty() {
            None
        } else {
            Some(text_content(None, &request.system))
        };

        let tools = if request.functions.is_empty() {
            Vec::new()
        } else {
            vec![ToolDeclarations {
                function_declarations: &request.functions,
            }]
        };

        ApiRequest {
            contents,
            system_instruction,
            tools,
            generation_config: GenerationConfig {
                temperature: request.temperature.unwrap_or(self.temperature),
            },
        }
    }
}

/// Collect text parts and native function calls from the first candidate.
fn parse_response(body: ApiResponse) -> Result<GenerateResponse, LlmError> {
    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;

    let mut text = String::new();
    let mut function_calls = Vec::new();
    for part in candidate.content.parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(fc) = part.function_call {
            let parameters = if fc.args.is_null() {
                Value::Object(Default::default())
            } else {
                fc.args
            };
            function_calls.push(ToolCall::new(fc.name, parameters));
        }
    }

    if text.is_empty() && function_calls.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(GenerateResponse {
        text,
        function_calls,
    })
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = self.build_body(request);

        debug!(
            "Gemini request: {} history turns, {} functions",
            request.history.len(),
            request.functions.len()
        );

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.error)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed = parsed.ok_or(LlmError::EmptyResponse)?;
        parse_response(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatTurn;

    fn client() -> GeminiClient {
        let config = LlmConfig {
            api_key: Some("test-key".into()),
            ..Default::default()
        };
        GeminiClient::new(&config).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let config = LlmConfig::default();
        assert!(matches!(
            GeminiClient::new(&config),
            Err(LlmError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_body_maps_history_roles() {
        let client = client();
        let mut request = GenerateRequest::new("Eres Posi.", "¿Qué hora es?");
        request.history = vec![ChatTurn::user("Hola"), ChatTurn::model("¡Hola!")];
        request.functions = vec![serde_json::json!({"name": "web_search"})];

        let body = serde_json::to_value(client.build_body(&request)).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "¿Qué hora es?");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Eres Posi.");
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "web_search"
        );
    }

    #[test]
    fn test_body_omits_empty_system_and_tools() {
        let client = client();
        let request = GenerateRequest::new("  ", "hola");
        let body = serde_json::to_value(client.build_body(&request)).unwrap();
        assert!(body.get("systemInstruction").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_text_and_function_calls() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Buscando... "},
                        {"functionCall": {"name": "web_search", "args": {"query": "rust"}}}
                    ]
                }
            }]
        });
        let body: ApiResponse = serde_json::from_value(raw).unwrap();
        let response = parse_response(body).unwrap();
        assert_eq!(response.text, "Buscando... ");
        assert_eq!(response.function_calls.len(), 1);
        assert_eq!(response.function_calls[0].name, "web_search");
        assert_eq!(response.function_calls[0].parameters["query"], "rust");
    }

    #[test]
    fn test_parse_empty_candidates() {
        let body: ApiResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(matches!(parse_response(body), Err(LlmError::EmptyResponse)));
    }
}
