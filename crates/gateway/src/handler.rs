use crate::anonymizer::Anonymizer;
use crate::error::GatewayError;
use crate::provider::LlmProvider;
use secura_audit_spec::{ActionType, Metadata, MetadataValue, UserId};
use secura_ledger::CallContext;
use secura_recorder::{AuditReceipt, AuditService, Interaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Caller details recorded as audit metadata.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug)]
pub struct GatewayResponse {
    /// Provider response, unmodified.
    pub body: Value,
    pub audit: AuditReceipt,
}

/// Anonymize, forward, audit. Built once at startup and shared.
pub struct InteractionHandler {
    anonymizer: Arc<dyn Anonymizer>,
    provider: Arc<dyn LlmProvider>,
    audit: AuditService,
}

impl InteractionHandler {
    pub fn new(anonymizer: Arc<dyn Anonymizer>, provider: Arc<dyn LlmProvider>, audit: AuditService) -> Self {
        Self { anonymizer, provider, audit }
    }

    pub async fn completion(
        &self,
        ctx: &CallContext,
        user_id: UserId,
        req: CompletionRequest,
        client: &ClientInfo,
    ) -> Result<GatewayResponse, GatewayError> {
        if req.prompt.is_empty() || req.model.is_empty() {
            return Err(GatewayError::InvalidRequest("prompt and model are required".into()));
        }
        info!(user_id = %user_id, model = %req.model, "processing completion request");

        let request_chars = req.prompt.chars().count() as i64;
        let forwarded = CompletionRequest { prompt: self.anonymize(&req.prompt).await?, ..req };
        let body = to_value(&forwarded)?;
        let response = self.provider.complete(&body).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "provider call failed");
            e
        })?;

        let mut metadata = base_metadata(&forwarded.model, client);
        metadata.insert("request_chars".into(), request_chars.into());
        self.finish(ctx, user_id, ActionType::Completion, body, response, metadata).await
    }

    pub async fn chat(
        &self,
        ctx: &CallContext,
        user_id: UserId,
        req: ChatRequest,
        client: &ClientInfo,
    ) -> Result<GatewayResponse, GatewayError> {
        if req.messages.is_empty() || req.model.is_empty() {
            return Err(GatewayError::InvalidRequest("messages and model are required".into()));
        }
        info!(user_id = %user_id, model = %req.model, "processing chat request");

        let mut messages = Vec::with_capacity(req.messages.len());
        for m in &req.messages {
            messages.push(ChatMessage { role: m.role.clone(), content: self.anonymize(&m.content).await? });
        }
        let forwarded = ChatRequest { messages, ..req };
        let body = to_value(&forwarded)?;
        let response = self.provider.chat(&body).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "provider call failed");
            e
        })?;

        let mut metadata = base_metadata(&forwarded.model, client);
        metadata.insert("messages".into(), (forwarded.messages.len() as i64).into());
        self.finish(ctx, user_id, ActionType::Chat, body, response, metadata).await
    }

    async fn anonymize(&self, text: &str) -> Result<String, GatewayError> {
        self.anonymizer.anonymize(text).await.map_err(|e| {
            error!(error = %e, "anonymization failed");
            e
        })
    }

    async fn finish(
        &self,
        ctx: &CallContext,
        user_id: UserId,
        action_type: ActionType,
        request: Value,
        response: Value,
        mut metadata: Metadata,
    ) -> Result<GatewayResponse, GatewayError> {
        if let Some(total) = total_tokens(&response) {
            metadata.insert("total_tokens".into(), total);
        }
        let interaction = Interaction::new(user_id, action_type, request, response).with_metadata(metadata);
        // The receipt already carries (and has logged) any audit failure.
        let audit = self.audit.submit(ctx, &interaction).await;
        Ok(GatewayResponse { body: interaction.response, audit })
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(v).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

fn base_metadata(model: &str, client: &ClientInfo) -> Metadata {
    let mut m = Metadata::new();
    m.insert("model".into(), model.into());
    m.insert("anonymized".into(), true.into());
    if let Some(ip) = &client.ip_address {
        m.insert("ip_address".into(), ip.as_str().into());
    }
    if let Some(ua) = &client.user_agent {
        m.insert("user_agent".into(), ua.as_str().into());
    }
    m
}

fn total_tokens(response: &Value) -> Option<MetadataValue> {
    let v = response.get("usage")?.get("total_tokens")?;
    v.as_i64().map(MetadataValue::from).or_else(|| v.as_f64().map(MetadataValue::from))
}
