//! secura_common
//!
//! Canonical JSON serialization + SHA-256 content hashing.
//! This exists to guarantee determinism for:
//! - interaction content hashes (request || response)
//! - ledger entry chaining
//! - ledger references
//!
//! Canonical form:
//! - object keys sorted by byte order, at every depth
//! - no whitespace
//! - integral floats inside the exact f64 integer range are written as integers
//!   (`1.0` and `1` produce the same bytes)
//!
//! IMPORTANT: Do not "pretty print". Hashes must be computed over canonical bytes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// Width of a hex encoded SHA-256 digest.
pub const CONTENT_HASH_HEX_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid content hash {0:?}: expected {CONTENT_HASH_HEX_LEN} hex characters")]
    InvalidHash(String),
}

/// Serialize to canonical JSON bytes.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&canonical_value(v))?)
}

/// Rebuild a JSON value in canonical form (sorted keys, normalized numbers).
pub fn canonical_value(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, canonical_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(canonical_value).collect()),
        Value::Number(n) => Value::Number(canonical_number(n)),
        other => other,
    }
}

fn canonical_number(n: Number) -> Number {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_F64_INT => {
            Number::from(f as i64)
        }
        _ => n,
    }
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// Fingerprint of one (request, response) interaction.
///
/// Always 64 lowercase hex characters. Parsing accepts upper case and an
/// optional `0x` prefix, and normalizes both away.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(s: &str) -> Result<Self, CanonError> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if hex_part.len() != CONTENT_HASH_HEX_LEN || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CanonError::InvalidHash(s.to_string()));
        }
        Ok(Self(hex_part.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = CanonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = CanonError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Content hash of an interaction: SHA-256 over canonical(request) || canonical(response).
///
/// Pure and deterministic. Fails only when an input cannot be represented as
/// JSON (for example a map with non-string keys).
pub fn content_hash<Req, Resp>(request: &Req, response: &Resp) -> Result<ContentHash, CanonError>
where
    Req: Serialize + ?Sized,
    Resp: Serialize + ?Sized,
{
    let req_bytes = canonical_json_bytes(request)?;
    let resp_bytes = canonical_json_bytes(response)?;

    let mut hasher = Sha256::new();
    hasher.update(&req_bytes);
    hasher.update(&resp_bytes);
    Ok(ContentHash(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;
    use std::collections::{BTreeMap, HashSet};

    #[derive(Serialize)]
    struct Obj {
        b: u32,
        a: u32,
    }

    #[derive(Serialize)]
    struct ObjSwapped {
        a: u32,
        b: u32,
    }

    #[test]
    fn canonical_hash_is_stable() {
        let hx = sha256_canonical_json(&Obj { b: 2, a: 1 }).unwrap();
        let hy = sha256_canonical_json(&ObjSwapped { a: 1, b: 2 }).unwrap();
        assert_eq!(hx, hy);
    }

    #[test]
    fn golden_content_hash() {
        let h = content_hash(&json!({"prompt": "hi"}), &json!({"text": "hello"})).unwrap();
        assert_eq!(
            h.as_str(),
            "d8ea94f3815a48839372d2fe29e5555b1df40da3042daee677bf72237973fbb8"
        );
    }

    #[test]
    fn content_hash_ignores_key_order_at_every_depth() {
        let req_a = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "x"}], "max_tokens": 10});
        let req_b: Value = serde_json::from_str(
            r#"{"max_tokens":10,"messages":[{"content":"x","role":"user"}],"model":"gpt-4"}"#,
        )
        .unwrap();
        let resp = json!({"usage": {"total_tokens": 3, "prompt_tokens": 1}, "id": "cmpl-1"});

        assert_eq!(content_hash(&req_a, &resp).unwrap(), content_hash(&req_b, &resp).unwrap());
        assert_eq!(content_hash(&req_a, &resp).unwrap(), content_hash(&req_a, &resp).unwrap());
    }

    #[test]
    fn array_order_is_significant() {
        let resp = json!({});
        let a = content_hash(&json!({"stop": ["a", "b"]}), &resp).unwrap();
        let b = content_hash(&json!({"stop": ["b", "a"]}), &resp).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn integral_floats_hash_like_integers() {
        let resp = json!({});
        let int = content_hash(&json!({"temperature": 1}), &resp).unwrap();
        let float = content_hash(&json!({"temperature": 1.0}), &resp).unwrap();
        let other = content_hash(&json!({"temperature": 1.5}), &resp).unwrap();
        assert_eq!(int, float);
        assert_ne!(int, other);
        assert_eq!(canonical_json_bytes(&json!({"t": 0.25})).unwrap(), br#"{"t":0.25}"#.to_vec());
    }

    #[test]
    fn near_identical_responses_produce_distinct_hashes() {
        let req = json!({"prompt": "hi"});
        let responses = ["hello", "hellp", "Hello", "hello ", "hell"];
        let hashes: HashSet<ContentHash> = responses
            .iter()
            .map(|t| content_hash(&req, &json!({"text": t})).unwrap())
            .collect();
        assert_eq!(hashes.len(), responses.len());
    }

    #[test]
    fn request_and_response_are_not_interchangeable() {
        let a = json!({"x": 1});
        let b = json!({"y": 2});
        assert_ne!(content_hash(&a, &b).unwrap(), content_hash(&b, &a).unwrap());
    }

    #[test]
    fn non_string_map_keys_are_an_encoding_error() {
        let mut bad: BTreeMap<(u8, u8), u8> = BTreeMap::new();
        bad.insert((1, 2), 3);
        let err = content_hash(&bad, &json!({})).unwrap_err();
        assert!(matches!(err, CanonError::Json(_)));
    }

    #[test]
    fn content_hash_parse_normalizes() {
        let upper = "0xD8EA94F3815A48839372D2FE29E5555B1DF40DA3042DAEE677BF72237973FBB8";
        let h = ContentHash::parse(upper).unwrap();
        assert_eq!(h.as_str(), "d8ea94f3815a48839372d2fe29e5555b1df40da3042daee677bf72237973fbb8");

        assert!(ContentHash::parse("abc").is_err());
        assert!(ContentHash::parse(&"g".repeat(64)).is_err());

        let via_serde: ContentHash = serde_json::from_str(&format!("\"{}\"", h)).unwrap();
        assert_eq!(via_serde, h);
        assert!(serde_json::from_str::<ContentHash>("\"nope\"").is_err());
    }
}
