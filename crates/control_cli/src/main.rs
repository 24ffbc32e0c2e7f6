mod config;

use clap::{Parser, Subcommand};
use config::AuditConfig;
use dotenvy::from_path as dotenv_from_path;
use secura_audit_spec::{ActionType, Metadata, RecordId, UserId};
use secura_common::{content_hash, ContentHash};
use secura_gateway::{
    AnonymizationClient, ChatRequest, ClientInfo, CompletionRequest, GatewayResponse, InteractionHandler, OpenAiProvider,
};
use secura_ledger::{verify_chain, CallContext, FileLedger, Ledger};
use secura_recorder::{AuditReceipt, AuditRecorder, AuditService, Interaction};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] secura_common::CanonError),
    #[error("record error: {0}")]
    Record(#[from] secura_audit_spec::RecordError),
    #[error("ledger error: {0}")]
    Ledger(#[from] secura_ledger::FileLedgerError),
    #[error("audit error: {0}")]
    Audit(#[from] secura_recorder::RecordFailure),
    #[error("verification error: {0}")]
    Verification(#[from] secura_recorder::VerificationError),
    #[error("gateway error: {0}")]
    Gateway(#[from] secura_gateway::GatewayError),
    #[error("config error: {0}")]
    Config(String),
    #[error("no committed record with id {0}")]
    NotFound(RecordId),
}

#[derive(Parser)]
#[command(name = "secura-audit", version, about = "Secura audit trail utilities")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the content hash of a request/response pair.
    Hash {
        #[arg(long)]
        request_json: PathBuf,
        #[arg(long)]
        response_json: PathBuf,
    },

    /// Record an interaction in the ledger and wait for the commit.
    Record {
        #[arg(long)]
        user_id: String,
        /// "completion" or "chat"
        #[arg(long)]
        action: String,
        #[arg(long)]
        request_json: PathBuf,
        #[arg(long)]
        response_json: PathBuf,
        /// Flat JSON object of scalar values
        #[arg(long)]
        metadata_json: Option<PathBuf>,
        /// Ledger file (default: SECURA_LEDGER_PATH)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Check whether a content hash was ever committed.
    Verify {
        #[arg(long)]
        content_hash: String,
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// List a user's committed records, oldest first.
    Trail {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Print one committed record by id.
    Show {
        #[arg(long)]
        record_id: String,
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Walk the ledger file and check every link of the chain.
    VerifyLedger {
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Anonymize a completion request, forward it upstream and audit it.
    Complete {
        #[arg(long)]
        user_id: String,
        /// CompletionRequest JSON: {prompt, model, max_tokens?, temperature?}
        #[arg(long)]
        request_json: PathBuf,
        #[arg(long)]
        ip_address: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Anonymize a chat request, forward it upstream and audit it.
    Chat {
        #[arg(long)]
        user_id: String,
        /// ChatRequest JSON: {messages: [{role, content}], model, max_tokens?, temperature?}
        #[arg(long)]
        request_json: PathBuf,
        #[arg(long)]
        ip_address: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
}

fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    // stdout carries the JSON results
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let s = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

fn emit(v: &JsonValue) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(v)?);
    Ok(())
}

fn open_ledger(flag: Option<PathBuf>, config: &AuditConfig) -> Result<Arc<FileLedger>, CliError> {
    let path = flag.unwrap_or_else(|| config.ledger_path.clone());
    Ok(Arc::new(FileLedger::open(path)?))
}

fn receipt_json(receipt: &AuditReceipt) -> JsonValue {
    let error = match receipt {
        AuditReceipt::Failed { error, .. } => Some(error.to_string()),
        _ => None,
    };
    json!({
        "status": receipt.status(),
        "content_hash": receipt.content_hash(),
        "ledger_ref": receipt.ledger_ref(),
        "error": error,
    })
}

/// The deadline covers the upstream calls as well as the commit.
fn gateway_context(config: &AuditConfig) -> CallContext {
    CallContext::with_timeout(config.ledger_timeout + Duration::from_millis(config.http_timeout_ms))
}

fn build_handler(config: &AuditConfig, audit: AuditService) -> Result<InteractionHandler, CliError> {
    let anonymizer = AnonymizationClient::new(config.nlp_url.clone(), config.http_timeout_ms)?;
    let provider =
        OpenAiProvider::new(config.openai_base_url.clone(), config.openai_api_key.clone(), config.http_timeout_ms)?;
    Ok(InteractionHandler::new(Arc::new(anonymizer), Arc::new(provider), audit))
}

/// The process exits right after printing, so a background commit is
/// awaited first; its deadline is the one the commit runs under.
async fn emit_gateway(out: GatewayResponse) -> Result<(), CliError> {
    let audit = out.audit.settle().await;
    emit(&json!({ "response": out.body, "audit": receipt_json(&audit) }))
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let args = Args::parse();

    // .env is optional; real env vars win
    let _ = dotenv_from_path(".env");
    let config = AuditConfig::from_env().map_err(CliError::Config)?;
    init_logging(&config.log_filter);

    let ctx = CallContext::with_timeout(config.ledger_timeout);

    match args.cmd {
        Command::Hash { request_json, response_json } => {
            let request: JsonValue = read_json(&request_json)?;
            let response: JsonValue = read_json(&response_json)?;
            let hash = content_hash(&request, &response)?;
            emit(&json!({ "content_hash": hash }))?;
        }

        Command::Record { user_id, action, request_json, response_json, metadata_json, ledger } => {
            let action: ActionType = action.parse()?;
            let request: JsonValue = read_json(&request_json)?;
            let response: JsonValue = read_json(&response_json)?;
            let metadata: Metadata = match metadata_json {
                Some(p) => read_json(&p)?,
                None => Metadata::new(),
            };
            let ledger = open_ledger(ledger, &config)?;
            let recorder = AuditRecorder::new(ledger);
            let interaction = Interaction::new(UserId::new(user_id), action, request, response).with_metadata(metadata);

            match recorder.record(&ctx, &interaction).await {
                Ok(rec) => emit(&json!({
                    "record_id": rec.id.to_string(),
                    "content_hash": rec.content_hash,
                    "ledger_ref": rec.ledger_ref,
                    "status": rec.status,
                }))?,
                Err(failure) => {
                    if let Some(rec) = &failure.record {
                        emit(&json!({
                            "record_id": rec.id.to_string(),
                            "content_hash": rec.content_hash,
                            "ledger_ref": JsonValue::Null,
                            "status": rec.status,
                        }))?;
                    }
                    return Err(failure.into());
                }
            }
        }

        Command::Verify { content_hash, ledger } => {
            let hash = ContentHash::parse(&content_hash)?;
            let svc = AuditService::new(open_ledger(ledger, &config)?, config.policy);
            let exists = svc.verifier().verify(&ctx, &hash).await?;
            emit(&json!({ "content_hash": hash, "exists": exists }))?;
        }

        Command::Trail { user_id, ledger } => {
            let svc = AuditService::new(open_ledger(ledger, &config)?, config.policy);
            let records = svc.list_user_audit_trail(&ctx, &UserId::new(user_id)).await?;
            emit(&serde_json::to_value(&records)?)?;
        }

        Command::Show { record_id, ledger } => {
            let id: RecordId = record_id.parse()?;
            let svc = AuditService::new(open_ledger(ledger, &config)?, config.policy);
            match svc.get_audit_record(&ctx, &id).await? {
                Some(rec) => emit(&serde_json::to_value(&rec)?)?,
                None => return Err(CliError::NotFound(id)),
            }
        }

        Command::VerifyLedger { ledger } => {
            let path = ledger.unwrap_or_else(|| config.ledger_path.clone());
            let summary = verify_chain(&path)?;
            info!(path = %path.display(), entries = summary.entries, "ledger chain verified");
            emit(&serde_json::to_value(&summary)?)?;
        }

        Command::Complete { user_id, request_json, ip_address, user_agent, ledger } => {
            let ctx = gateway_context(&config);
            let req: CompletionRequest = read_json(&request_json)?;
            let ledger: Arc<dyn Ledger> = open_ledger(ledger, &config)?;
            let svc = AuditService::new(ledger, config.policy);
            let handler = build_handler(&config, svc)?;
            let client = ClientInfo { ip_address, user_agent };
            let out = handler.completion(&ctx, UserId::new(user_id), req, &client).await?;
            emit_gateway(out).await?;
        }

        Command::Chat { user_id, request_json, ip_address, user_agent, ledger } => {
            let ctx = gateway_context(&config);
            let req: ChatRequest = read_json(&request_json)?;
            let ledger: Arc<dyn Ledger> = open_ledger(ledger, &config)?;
            let svc = AuditService::new(ledger, config.policy);
            let handler = build_handler(&config, svc)?;
            let client = ClientInfo { ip_address, user_agent };
            let out = handler.chat(&ctx, UserId::new(user_id), req, &client).await?;
            emit_gateway(out).await?;
        }
    }

    Ok(())
}
