use serde_json::Value;
use sha2::{Digest, Sha256};

pub const CONTRACT_ID: &str = "isoprint.job_contract";
pub const CONTRACT_VERSION: &str = "1";

pub const JOB_KIND_LABEL: &str = "label";
pub const JOB_KIND_REPORT: &str = "report";

/// Text substituted for any label field the submitter left out.
pub const PLACEHOLDER: &str = "-";

/// Marks the start of a named section when it opens a line of report content.
pub const SECTION_DELIMITER: &str = "===";

pub const LABEL_FIELD_TITLE: &str = "title";
pub const LABEL_FIELD_DATE: &str = "date";
pub const LABEL_FIELD_PRODUCER: &str = "producer";
pub const LABEL_FIELD_CODE: &str = "code";
pub const LABEL_FIELD_ENCODED_VALUE: &str = "encodedValue";
pub const LABEL_FIELD_BADGE: &str = "badge";

/// Older submitters send the scannable value under this key.
pub const LABEL_FIELD_ENCODED_VALUE_LEGACY: &str = "qrValue";

pub const REPORT_FIELD_TITLE: &str = "title";
pub const REPORT_FIELD_CONTENT: &str = "content";

/// Serializes `value` with object keys in byte order and no insignificant
/// whitespace, independent of how the map was built.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Fingerprint of one job descriptor. Two submissions of the same kind and
/// payload share a fingerprint; job identity is still assigned per submission.
pub fn job_fingerprint_sha256(kind: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(CONTRACT_ID.as_bytes());
    hasher.update(b"\n");
    hasher.update(CONTRACT_VERSION.as_bytes());
    hasher.update(b"\n");
    hasher.update(kind.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(payload).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"d": [true, null], "c": "x"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"x","d":[true,null]},"b":1}"#
        );
    }

    #[test]
    fn job_fingerprint_ignores_key_order_but_not_kind() {
        let a = json!({"title": "생표고 1kg", "code": "B-001"});
        let b = json!({"code": "B-001", "title": "생표고 1kg"});
        assert_eq!(
            job_fingerprint_sha256(JOB_KIND_LABEL, &a),
            job_fingerprint_sha256(JOB_KIND_LABEL, &b)
        );
        assert_ne!(
            job_fingerprint_sha256(JOB_KIND_LABEL, &a),
            job_fingerprint_sha256(JOB_KIND_REPORT, &a)
        );
    }
}
