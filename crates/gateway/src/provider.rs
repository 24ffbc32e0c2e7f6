use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Upstream LLM. Request and response bodies pass through as opaque JSON.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, body: &Value) -> Result<Value, GatewayError>;
    async fn chat(&self, body: &Value) -> Result<Value, GatewayError>;
}

/// OpenAI-compatible HTTP provider.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: Option<String>, timeout_ms: u64) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(Duration::from_millis(timeout_ms)).build()?;
        Ok(Self { client, base_url, api_key })
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), endpoint);
        let mut r = self.client.post(url).json(body);
        if let Some(k) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            r = r.bearer_auth(k);
        }
        let resp = r.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Provider(format!("status={} body={}", status, body)));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, body: &Value) -> Result<Value, GatewayError> {
        self.post("/v1/completions", body).await
    }

    async fn chat(&self, body: &Value) -> Result<Value, GatewayError> {
        self.post("/v1/chat/completions", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_sends_bearer_and_passes_body_through() {
        let server = MockServer::start().await;
        let reply = json!({"id": "cmpl-1", "choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply.clone()))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(server.uri(), Some("sk-test".into()), 2_000).unwrap();
        let out = provider.chat(&json!({"model": "gpt-4", "messages": []})).await.unwrap();
        assert_eq!(out, reply);
    }

    #[tokio::test]
    async fn completion_hits_completions_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": [{"text": "ok"}]})))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(server.uri(), None, 2_000).unwrap();
        let out = provider.complete(&json!({"model": "m", "prompt": "p"})).await.unwrap();
        assert_eq!(out["choices"][0]["text"], "ok");
    }

    #[tokio::test]
    async fn upstream_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(server.uri(), None, 2_000).unwrap();
        let err = provider.complete(&json!({})).await.unwrap_err();
        match err {
            GatewayError::Provider(m) => {
                assert!(m.contains("429"));
                assert!(m.contains("rate limited"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
