use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Strips personal data from prompt text before it leaves the gateway.
#[async_trait]
pub trait Anonymizer: Send + Sync {
    async fn anonymize(&self, text: &str) -> Result<String, GatewayError>;
}

#[derive(Debug, Serialize)]
struct AnonymizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectedEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnonymizeResponse {
    pub anonymized_text: String,
    #[serde(default)]
    pub entities: Vec<DetectedEntity>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Client for the NLP anonymization service (`POST {base}/api/v1/anonymize`).
pub struct AnonymizationClient {
    base_url: String,
    client: Client,
}

impl AnonymizationClient {
    pub fn new(base_url: String, timeout_ms: u64) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(Duration::from_millis(timeout_ms)).build()?;
        Ok(Self { base_url, client })
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    /// Full service answer, entities included.
    pub async fn analyze(&self, text: &str) -> Result<AnonymizeResponse, GatewayError> {
        let url = format!("{}/api/v1/anonymize", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .headers(self.build_headers())
            .json(&AnonymizeRequest { text })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Anonymization(format!("status={} body={}", status, body)));
        }

        let parsed: AnonymizeResponse = resp.json().await?;
        if let Some(err) = parsed.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(GatewayError::Anonymization(err.to_string()));
        }
        debug!(entities = parsed.entities.len(), "prompt anonymized");
        Ok(parsed)
    }
}

#[async_trait]
impl Anonymizer for AnonymizationClient {
    async fn anonymize(&self, text: &str) -> Result<String, GatewayError> {
        Ok(self.analyze(text).await?.anonymized_text)
    }
}
