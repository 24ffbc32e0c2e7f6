//! secura_gateway
//!
//! The request path in front of the LLM: anonymize, forward, audit.
//! Transport only; no HTTP server lives here.

mod anonymizer;
mod error;
mod handler;
mod provider;

pub use anonymizer::{AnonymizationClient, AnonymizeResponse, Anonymizer, DetectedEntity};
pub use error::GatewayError;
pub use handler::{ChatMessage, ChatRequest, ClientInfo, CompletionRequest, GatewayResponse, InteractionHandler};
pub use provider::{LlmProvider, OpenAiProvider};
