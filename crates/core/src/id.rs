//! Deterministic job identifiers.
//!
//! A job's identity is derived from its submission parameters: the same
//! `JobParams` always hash to the same `JobId`, which is what makes
//! resubmission idempotent.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::DomainError;
use crate::job::JobParams;

/// Number of digest bytes kept in the hex-encoded identifier.
const ID_BYTES: usize = 16;

/// Identifier of a job (hex digest of its canonical parameters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Compute the identifier for a set of submission parameters.
    pub fn for_params(params: &JobParams) -> Self {
        let mut canonical = String::new();
        write_canonical(
            &serde_json::json!({
                "url": params.url,
                "type": params.job_type,
                "params": params.params,
            }),
            &mut canonical,
        );

        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(&digest[..ID_BYTES]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DomainError::invalid_id("JobId: empty"));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::invalid_id(format!("JobId: not hex: {s}")));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

/// Serialize a JSON value with object keys in sorted order at every depth.
///
/// Does not depend on the map implementation `serde_json` was compiled with,
/// so the output is stable even if some crate enables `preserve_order`.
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn params(params: JsonValue) -> JobParams {
        JobParams {
            url: "magnet:?xt=urn:btih:abc".to_string(),
            job_type: "concatenate".to_string(),
            params,
        }
    }

    #[test]
    fn same_params_same_id() {
        let a = JobId::for_params(&params(json!({"variants": ["a.mp3", "b.mp3"], "uploadUrl": "http://x"})));
        let b = JobId::for_params(&params(json!({"variants": ["a.mp3", "b.mp3"], "uploadUrl": "http://x"})));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), ID_BYTES * 2);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: JsonValue =
            serde_json::from_str(r#"{"uploadUrl":"http://x","audioCodec":"copy","nested":{"b":1,"a":2}}"#)
                .unwrap();
        let b: JsonValue =
            serde_json::from_str(r#"{"nested":{"a":2,"b":1},"audioCodec":"copy","uploadUrl":"http://x"}"#)
                .unwrap();
        assert_eq!(JobId::for_params(&params(a)), JobId::for_params(&params(b)));
    }

    #[test]
    fn variant_order_matters() {
        let a = JobId::for_params(&params(json!({"variants": ["a.mp3", "b.mp3"]})));
        let b = JobId::for_params(&params(json!({"variants": ["b.mp3", "a.mp3"]})));
        assert_ne!(a, b);
    }

    #[test]
    fn type_and_url_are_part_of_identity() {
        let base = params(json!({}));
        let mut other_type = base.clone();
        other_type.job_type = "upload_original".to_string();
        let mut other_url = base.clone();
        other_url.url = "https://example.com/v".to_string();

        let id = JobId::for_params(&base);
        assert_ne!(id, JobId::for_params(&other_type));
        assert_ne!(id, JobId::for_params(&other_url));
    }

    #[test]
    fn parse_roundtrips_display() {
        let id = JobId::for_params(&params(json!({"k": "v"})));
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("".parse::<JobId>().is_err());
        assert!("not-hex!".parse::<JobId>().is_err());
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": [ {"d": 1, "c": 2} ], "a": null});
        assert_eq!(canonical_json(&v), r#"{"a":null,"b":[{"c":2,"d":1}]}"#);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: building the params object in any key order yields the same id.
        #[test]
        fn id_is_independent_of_insertion_order(
            entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
        ) {
            let mut forward = serde_json::Map::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = serde_json::Map::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }

            let a = JobId::for_params(&params(JsonValue::Object(forward)));
            let b = JobId::for_params(&params(JsonValue::Object(backward)));
            prop_assert_eq!(a, b);
        }
    }
}
