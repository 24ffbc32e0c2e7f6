use secura_recorder::AuditPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LEDGER_PATH: &str = "runtime/ledger/audit.jsonl";

/// Process configuration, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub ledger_path: PathBuf,
    pub policy: AuditPolicy,
    pub ledger_timeout: Duration,
    pub log_filter: String,
    pub nlp_url: String,
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub http_timeout_ms: u64,
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let policy = match var("SECURA_AUDIT_POLICY") {
            Some(v) => v.parse().map_err(|e| format!("SECURA_AUDIT_POLICY: {e}"))?,
            None => AuditPolicy::default(),
        };
        let timeout_ms: u64 = match var("SECURA_LEDGER_TIMEOUT_MS") {
            Some(v) => v.parse().map_err(|_| format!("SECURA_LEDGER_TIMEOUT_MS: not a number: {v}"))?,
            None => 5_000,
        };
        if timeout_ms == 0 {
            return Err("SECURA_LEDGER_TIMEOUT_MS must be positive".into());
        }
        let http_timeout_ms: u64 = match var("SECURA_HTTP_TIMEOUT_MS") {
            Some(v) => v.parse().map_err(|_| format!("SECURA_HTTP_TIMEOUT_MS: not a number: {v}"))?,
            None => 30_000,
        };

        Ok(Self {
            ledger_path: var("SECURA_LEDGER_PATH").map(PathBuf::from).unwrap_or_else(|| DEFAULT_LEDGER_PATH.into()),
            policy,
            ledger_timeout: Duration::from_millis(timeout_ms),
            log_filter: var("SECURA_LOG").unwrap_or_else(|| "info".into()),
            nlp_url: var("SECURA_NLP_URL").unwrap_or_else(|| "http://localhost:8000".into()),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com".into()),
            openai_api_key: var("OPENAI_API_KEY"),
            http_timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = AuditConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.ledger_path, PathBuf::from(DEFAULT_LEDGER_PATH));
        assert_eq!(cfg.policy, AuditPolicy::BestEffort);
        assert_eq!(cfg.ledger_timeout, Duration::from_millis(5_000));
        assert_eq!(cfg.log_filter, "info");
        assert!(cfg.openai_api_key.is_none());
    }

    #[test]
    fn overrides() {
        let cfg = AuditConfig::from_lookup(lookup(&[
            ("SECURA_LEDGER_PATH", "/tmp/l.jsonl"),
            ("SECURA_AUDIT_POLICY", "durable"),
            ("SECURA_LEDGER_TIMEOUT_MS", "250"),
            ("OPENAI_API_KEY", "sk-x"),
            ("SECURA_NLP_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(cfg.ledger_path, PathBuf::from("/tmp/l.jsonl"));
        assert_eq!(cfg.policy, AuditPolicy::Durable);
        assert_eq!(cfg.ledger_timeout, Duration::from_millis(250));
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-x"));
        assert_eq!(cfg.nlp_url, "http://localhost:8000");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(AuditConfig::from_lookup(lookup(&[("SECURA_AUDIT_POLICY", "sometimes")])).is_err());
        assert!(AuditConfig::from_lookup(lookup(&[("SECURA_LEDGER_TIMEOUT_MS", "soon")])).is_err());
        assert!(AuditConfig::from_lookup(lookup(&[("SECURA_LEDGER_TIMEOUT_MS", "0")])).is_err());
    }
}
