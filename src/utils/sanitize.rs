//! Scrubbing of untrusted JSON before it reaches business logic or the logs.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Longest string accepted inside a webhook payload, after cleaning
pub const MAX_WEBHOOK_STRING_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SanitizeError {
    #[error("String too long (max {max} characters)")]
    TooLong { max: usize },
}

fn dangerous_patterns() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)javascript\s*:|on\w+\s*=|<\s*script|<\s*iframe|<\s*object|<\s*embed|<\s*link|<\s*meta|<\s*style",
        )
        .expect("dangerous pattern regex is valid")
    })
}

/// Strip control characters and script vectors, trim, then bound the length.
/// Other characters are kept as sent; escaping belongs to whatever renders the text.
pub fn sanitize_string(value: &str, max_length: Option<usize>) -> Result<String, SanitizeError> {
    let visible: String = value
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();

    let defanged = dangerous_patterns().replace_all(&visible, "");
    let cleaned = defanged.trim().to_string();

    if let Some(max) = max_length {
        if cleaned.chars().count() > max {
            return Err(SanitizeError::TooLong { max });
        }
    }
    Ok(cleaned)
}

/// Recursively clean every string in a webhook payload. Numbers, booleans and nulls
/// pass through unchanged; object keys are kept as sent.
pub fn sanitize_payload(value: &Value) -> Result<Value, SanitizeError> {
    match value {
        Value::String(s) => Ok(Value::String(sanitize_string(
            s,
            Some(MAX_WEBHOOK_STRING_LEN),
        )?)),
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                sanitized.insert(key.clone(), sanitize_payload(val)?);
            }
            Ok(Value::Object(sanitized))
        }
        Value::Array(items) => items
            .iter()
            .map(sanitize_payload)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Copy of `value` safe to log: phone numbers and secrets are masked
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut masked = serde_json::Map::new();
            for (key, val) in map {
                let masked_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    mask_sensitive(val)
                };
                masked.insert(key.clone(), masked_val);
            }
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "phonenumber"
            | "phone_number"
            | "partya"
            | "password"
            | "passkey"
            | "secret"
            | "token"
            | "access_token"
            | "authorization"
    )
}

fn mask_value(value: &Value) -> Value {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Value::String("****".to_string()),
    };
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        Value::String(format!("{}****{}", head, tail))
    } else {
        Value::String("****".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_tags_are_defanged() {
        let cleaned = sanitize_string("<script>alert(1)</script>", None).unwrap();
        assert!(!cleaned.to_lowercase().contains("<script"));
        assert_eq!(cleaned, ">alert(1)</script>");
    }

    #[test]
    fn test_ordinary_punctuation_is_kept_verbatim() {
        let text = r#"Insufficient funds & limit "daily" reached for O'Brien <b>"#;
        assert_eq!(sanitize_string(text, None).unwrap(), text);
    }

    #[test]
    fn test_event_handlers_and_js_urls_removed() {
        let cleaned = sanitize_string("JavaScript:go() ONCLICK=steal()", None).unwrap();
        assert_eq!(cleaned, "go() steal()");
    }

    #[test]
    fn test_control_characters_stripped_and_trimmed() {
        let cleaned = sanitize_string("  ok\u{0000}\u{0007}value\n ", None).unwrap();
        assert_eq!(cleaned, "okvalue");
    }

    #[test]
    fn test_length_limit() {
        let long = "a".repeat(MAX_WEBHOOK_STRING_LEN + 1);
        assert_eq!(
            sanitize_string(&long, Some(MAX_WEBHOOK_STRING_LEN)),
            Err(SanitizeError::TooLong {
                max: MAX_WEBHOOK_STRING_LEN
            })
        );
    }

    #[test]
    fn test_payload_sanitized_recursively() {
        let input = json!({
            "Body": {
                "stkCallback": {
                    "ResultCode": 0,
                    "ResultDesc": "<b>done</b>",
                    "CallbackMetadata": {"Item": [{"Name": "Note", "Value": "<iframe src=x>"}]}
                }
            },
            "flag": true,
            "missing": null
        });

        let out = sanitize_payload(&input).unwrap();
        assert_eq!(out["Body"]["stkCallback"]["ResultCode"], 0);
        assert_eq!(out["Body"]["stkCallback"]["ResultDesc"], "<b>done</b>");
        assert_eq!(
            out["Body"]["stkCallback"]["CallbackMetadata"]["Item"][0]["Value"],
            "src=x>"
        );
        assert_eq!(out["flag"], true);
        assert!(out["missing"].is_null());
    }

    #[test]
    fn test_oversized_nested_string_rejects_payload() {
        let input = json!({"a": [{"b": "x".repeat(1001)}]});
        assert!(sanitize_payload(&input).is_err());
    }

    #[test]
    fn test_mask_sensitive_fields() {
        let input = json!({
            "PhoneNumber": 254708374149u64,
            "nested": {"access_token": "abcdefghijkl", "amount": "100"}
        });
        let masked = mask_sensitive(&input);
        assert_eq!(masked["PhoneNumber"], "2547****149");
        assert_eq!(masked["nested"]["access_token"], "abcd****jkl");
        assert_eq!(masked["nested"]["amount"], "100");
    }
}
