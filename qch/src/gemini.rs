//! Query generation through the Gemini `generateContent` API.

use qch_common::generator::{GeneratorError, QueryGenerator, build_prompt, strip_code_fences};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        api_key_env: &str,
        timeout: Duration,
    ) -> Result<Self, GeneratorError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GeneratorError::MissingApiKey(api_key_env.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl GenerateRequest {
    fn for_prompt(prompt: String) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        }
    }
}

/// Concatenated text of the first candidate, fences stripped.
fn extract_query(response: GenerateResponse) -> Result<String, GeneratorError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    let sql = strip_code_fences(&text);
    if sql.is_empty() {
        return Err(GeneratorError::EmptyResponse);
    }
    Ok(sql)
}

fn api_error(status: u16, body: &str) -> GeneratorError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect());
    GeneratorError::Api { status, message }
}

impl QueryGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, task: &str, schema: &str) -> Result<String, GeneratorError> {
        let request = GenerateRequest::for_prompt(build_prompt(task, schema));
        debug!(model = %self.model, task, "Requesting query from Gemini");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| GeneratorError::Transport(format!("invalid response body: {e}")))?;
        let sql = extract_query(parsed)?;
        debug!(model = %self.model, sql = %sql, "Gemini returned query");
        Ok(sql)
    }
}
