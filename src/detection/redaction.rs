//! Strips credentials and personal data from requests before they are persisted

use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{RequestContext, RequestInfo};

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "cookie", "x-csrf-token"];
const SENSITIVE_FIELDS: [&str; 4] = ["password", "token", "creditcard", "ssn"];

pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.to_lowercase();
            let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name, value)
        })
        .collect()
}

/// Replace sensitive fields at any depth. Key matching ignores case.
pub fn redact_body(body: &Value) -> Value {
    match body {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if SENSITIVE_FIELDS.contains(&key.to_lowercase().as_str()) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_body(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_body).collect()),
        other => other.clone(),
    }
}

pub fn request_context(request: &RequestInfo) -> RequestContext {
    RequestContext {
        method: request.method.clone(),
        path: request.path.clone(),
        redacted_headers: redact_headers(&request.headers),
        redacted_body: request.body.as_ref().map(redact_body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers() {
        let request = RequestInfo::new("1.1.1.1", "ua")
            .with_header("Authorization", "Bearer abc")
            .with_header("Cookie", "sid=1")
            .with_header("X-CSRF-Token", "t")
            .with_header("Accept", "text/html");

        let headers = redact_headers(&request.headers);
        assert_eq!(headers["authorization"], REDACTED);
        assert_eq!(headers["cookie"], REDACTED);
        assert_eq!(headers["x-csrf-token"], REDACTED);
        assert_eq!(headers["accept"], "text/html");
    }

    #[test]
    fn test_nested_body_fields() {
        let body = json!({
            "username": "alice",
            "Password": "hunter2",
            "payment": {"creditCard": "4111", "amount": 5},
            "people": [{"ssn": "123-45-6789", "name": "bob"}],
            "token": {"nested": "value"}
        });

        let redacted = redact_body(&body);
        assert_eq!(redacted["username"], "alice");
        assert_eq!(redacted["Password"], REDACTED);
        assert_eq!(redacted["payment"]["creditCard"], REDACTED);
        assert_eq!(redacted["payment"]["amount"], 5);
        assert_eq!(redacted["people"][0]["ssn"], REDACTED);
        assert_eq!(redacted["people"][0]["name"], "bob");
        assert_eq!(redacted["token"], REDACTED);
    }
}
