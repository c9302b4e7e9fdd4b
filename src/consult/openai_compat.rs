// src/consult/openai_compat.rs — Consult client for OpenAI-compatible chat endpoints
//
// Used by: DeepSeek (default), and any endpoint speaking `/chat/completions`.

use async_trait::async_trait;

use super::ConsultClient;
use crate::infra::config::ConsultConfig;
use crate::infra::errors::FusionLoopError;

const SYSTEM_PROMPT: &str = "You are a number-set forecasting assistant. \
Answer with the requested numbers only.";

pub struct OpenAiCompatConsult {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatConsult {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, reading the key from `api_key_env`.
    /// Returns `None` when the variable is unset or empty.
    pub fn from_config(cfg: &ConsultConfig) -> Option<Self> {
        let key = std::env::var(&cfg.api_key_env).ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Some(Self::new(key, cfg.base_url.clone(), cfg.model.clone()))
    }

    fn error(&self, message: impl Into<String>) -> FusionLoopError {
        FusionLoopError::Consult {
            client: self.model.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ConsultClient for OpenAiCompatConsult {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        context: &serde_json::Value,
    ) -> Result<String, FusionLoopError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("{}\n\nContext:\n{}", prompt, context) },
            ],
            "temperature": 0.7,
            "max_tokens": 800,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {}: {}", status, error_body)));
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.error(format!("Failed to parse response: {}", e)))?;

        Ok(resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }
}
