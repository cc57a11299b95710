//! Component J: Response Sanitizer (spec.md §4.J).
//!
//! Every outbound body passes through [`sanitize`] before
//! serialization: keys whose name case-insensitively equals `apiKey`,
//! `privateKey`, or `password` have their value replaced, recursively,
//! through objects and arrays. Running it twice yields the same body
//! (spec.md §8 invariant 5).

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &["apikey", "privatekey", "password"];

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS.contains(&key.to_ascii_lowercase().as_str())
}

/// Strip credential-shaped keys from `body`, in place.
pub fn sanitize(body: &mut Value) {
    match body {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if is_sensitive(key) {
                    *value = Value::String(REDACTED.to_string());
                } else {
                    sanitize(value);
                }
            }
        },
        Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize(item);
            }
        },
        _ => {},
    }
}

/// Sanitize a clone of `body`, leaving the original untouched.
#[must_use]
pub fn sanitized(body: &Value) -> Value {
    let mut copy = body.clone();
    sanitize(&mut copy);
    copy
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn redacts_top_level_sensitive_keys_case_insensitively() {
        let mut body = json!({"apiKey": "sk-123", "ApiKey": "sk-456", "ok": true});
        sanitize(&mut body);
        assert_eq!(body["apiKey"], json!(REDACTED));
        assert_eq!(body["ApiKey"], json!(REDACTED));
        assert_eq!(body["ok"], json!(true));
    }

    #[test]
    fn redacts_nested_keys_in_objects_and_arrays() {
        let mut body = json!({
            "clients": [
                {"username": "alice", "privateKey": "-----BEGIN-----"},
                {"username": "bob", "password": "hunter2"},
            ]
        });
        sanitize(&mut body);
        assert_eq!(body["clients"][0]["privateKey"], json!(REDACTED));
        assert_eq!(body["clients"][1]["password"], json!(REDACTED));
        assert_eq!(body["clients"][0]["username"], json!("alice"));
    }

    #[test]
    fn sanitizer_is_idempotent() {
        let mut body = json!({"apiKey": "sk-123", "nested": {"password": "p"}});
        sanitize(&mut body);
        let once = body.clone();
        sanitize(&mut body);
        assert_eq!(once, body);
    }

    #[test]
    fn sanitized_leaves_the_original_untouched() {
        let body = json!({"apiKey": "sk-123"});
        let masked = sanitized(&body);
        assert_eq!(masked["apiKey"], json!(REDACTED));
        assert_eq!(body["apiKey"], json!("sk-123"));
    }

    #[test]
    fn non_object_bodies_pass_through_unchanged() {
        let mut body = json!([1, 2, 3]);
        sanitize(&mut body);
        assert_eq!(body, json!([1, 2, 3]));
    }
}
