//! LLM client abstraction.
//!
//! A narrow request/response seam around the generative model: one prompt
//! in, one text reply out. The real client speaks either Ollama's generate
//! API or an OpenAI-compatible one, chosen by endpoint shape; the fake
//! client scripts responses for tests.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    /// Apply `CLARE_LLM_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("CLARE_LLM_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("CLARE_LLM_MODEL") {
            self.model = model;
        }
        if let Ok(api_key) = std::env::var("CLARE_LLM_API_KEY") {
            self.api_key = Some(api_key);
        }
        self
    }
}

/// LLM errors. Every variant routes the caller to the deterministic
/// fallback; none of them ever reach the user as a failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is disabled in configuration")]
    Disabled,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

/// One completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub text: String,
    /// Exact token usage when the provider reports it.
    pub tokens_used: Option<u32>,
}

/// Generic LLM client trait.
pub trait LlmClient: Send + Sync {
    /// Generate a completion for one prompt. Called exactly once per
    /// query; there is no retry loop.
    fn generate(&self, prompt: &str) -> Result<LlmReply, LlmError>;
}

/// Real client implementation using blocking HTTP.
pub struct HttpLlmClient {
    config: LlmConfig,
    client: reqwest::blocking::Client,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { config, client })
    }

    fn is_ollama_endpoint(&self) -> bool {
        self.config.endpoint.contains("11434") || self.config.endpoint.contains("ollama")
    }

    fn call_ollama(&self, prompt: &str) -> Result<LlmReply, LlmError> {
        let url = format!("{}/api/generate", self.config.endpoint);
        let request_body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout_secs)
                } else {
                    LlmError::HttpError(format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from Ollama",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let text = json
            .get("response")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::EmptyResponse)?
            .to_string();

        // Ollama reports prompt and completion token counts separately.
        let tokens_used = match (
            json.get("prompt_eval_count").and_then(|v| v.as_u64()),
            json.get("eval_count").and_then(|v| v.as_u64()),
        ) {
            (Some(p), Some(c)) => Some((p + c) as u32),
            _ => None,
        };

        Ok(LlmReply { text, tokens_used })
    }

    fn call_openai_compatible(&self, prompt: &str) -> Result<LlmReply, LlmError> {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "user", "content": prompt},
            ],
        });

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.config.timeout_secs)
            } else {
                LlmError::HttpError(format!("Request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let text = json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::EmptyResponse)?
            .to_string();

        let tokens_used = json
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|v| v.as_u64())
            .map(|t| t as u32);

        Ok(LlmReply { text, tokens_used })
    }
}

impl LlmClient for HttpLlmClient {
    fn generate(&self, prompt: &str) -> Result<LlmReply, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        // One request per query. The protocol is fixed by the configured
        // endpoint; a failure returns immediately so the deterministic
        // fallback takes over instead of waiting out a second timeout.
        if self.is_ollama_endpoint() {
            self.call_ollama(prompt)
        } else {
            self.call_openai_compatible(prompt)
        }
    }
}

/// Fake LLM client for testing: scripted responses plus prompt capture.
pub struct FakeLlmClient {
    responses: std::sync::Mutex<Vec<Result<String, LlmError>>>,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl FakeLlmClient {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Always returns the same completion.
    pub fn always_text(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// Always fails, exercising the fallback path.
    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmClient for FakeLlmClient {
    fn generate(&self, prompt: &str) -> Result<LlmReply, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let mut responses = self.responses.lock().unwrap();
        let scripted = if responses.is_empty() {
            return Err(LlmError::EmptyResponse);
        } else if responses.len() == 1 {
            // Keep returning the same response.
            responses[0].clone()
        } else {
            responses.remove(0)
        };

        scripted.map(|text| LlmReply { text, tokens_used: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = LlmConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn fake_client_repeats_single_response() {
        let client = FakeLlmClient::always_text("grounded answer");
        assert_eq!(client.generate("p1").unwrap().text, "grounded answer");
        assert_eq!(client.generate("p2").unwrap().text, "grounded answer");
        assert_eq!(client.call_count(), 2);
        assert_eq!(client.prompts(), vec!["p1", "p2"]);
    }

    #[test]
    fn fake_client_always_error() {
        let client = FakeLlmClient::always_error(LlmError::Disabled);
        assert!(client.generate("p").is_err());
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn server_error_costs_exactly_one_request() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let served = connections.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                served.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\n\
                      content-length: 0\r\nconnection: close\r\n\r\n",
                );
            }
        });

        // Ollama-shaped endpoint: a failed generate call must not turn
        // into a second request against another protocol.
        let client = HttpLlmClient::new(LlmConfig {
            endpoint: format!("http://127.0.0.1:{port}/ollama"),
            timeout_secs: 5,
            ..LlmConfig::default()
        })
        .unwrap();

        assert!(client.generate("prompt").is_err());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fake_client_scripted_sequence() {
        let client = FakeLlmClient::new(vec![
            Ok("first".to_string()),
            Err(LlmError::Timeout(30)),
        ]);
        assert_eq!(client.generate("").unwrap().text, "first");
        assert!(client.generate("").is_err());
    }
}
