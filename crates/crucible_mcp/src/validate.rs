//! Request envelope validation and parameter sanitization.
//!
//! Applied to every request before routing: size cap on the raw frame,
//! JSON-RPC version check, parameter nesting depth cap, and recursive
//! stripping of prototype-pollution keys.

use crate::protocol::JsonRpcRequest;
use serde_json::Value;
use thiserror::Error;

/// Keys stripped from parameters at any depth.
const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Why an envelope was rejected. Version/method problems are malformed
/// requests (-32600); size and depth violations are validation failures
/// (-32006).
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Unsupported JSON-RPC version: {0}")]
    Version(String),

    #[error("Missing method")]
    MissingMethod,

    #[error("Request size {size} exceeds maximum {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Parameter nesting exceeds maximum depth of {0}")]
    TooDeep(usize),
}

/// Envelope validator with configurable caps.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    /// Requests of exactly this many bytes are still accepted.
    pub max_request_bytes: usize,
    /// Nesting of exactly this depth is still accepted.
    pub max_params_depth: usize,
}

impl RequestValidator {
    pub fn new(max_request_bytes: usize, max_params_depth: usize) -> Self {
        Self {
            max_request_bytes,
            max_params_depth,
        }
    }

    /// Check the raw frame size before parsing.
    pub fn check_size(&self, raw: &str) -> Result<(), EnvelopeError> {
        if raw.len() > self.max_request_bytes {
            return Err(EnvelopeError::TooLarge {
                size: raw.len(),
                max: self.max_request_bytes,
            });
        }
        Ok(())
    }

    /// Validate a parsed envelope and sanitize its parameters in place.
    pub fn check_envelope(&self, request: &mut JsonRpcRequest) -> Result<(), EnvelopeError> {
        if request.jsonrpc != "2.0" && request.jsonrpc != "1.0" {
            return Err(EnvelopeError::Version(request.jsonrpc.clone()));
        }
        if request.method.is_empty() {
            return Err(EnvelopeError::MissingMethod);
        }

        if let Some(params) = request.params.as_mut() {
            if depth_of(params) > self.max_params_depth {
                return Err(EnvelopeError::TooDeep(self.max_params_depth));
            }
            sanitize(params);
        }

        Ok(())
    }
}

/// Nesting depth of a JSON value. Scalars have depth 0; each object or
/// array level adds one.
fn depth_of(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

/// Strip dangerous keys recursively.
fn sanitize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in DANGEROUS_KEYS {
                map.remove(key);
            }
            for child in map.values_mut() {
                sanitize(child);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                sanitize(child);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> RequestValidator {
        RequestValidator::new(10 * 1024 * 1024, 10)
    }

    fn request(params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "tools/call".to_string(),
            params: Some(params),
        }
    }

    fn nested(depth: usize) -> Value {
        let mut value = json!(1);
        for _ in 0..depth {
            value = json!({ "inner": value });
        }
        value
    }

    #[test]
    fn test_size_boundary() {
        let v = RequestValidator::new(16, 10);
        assert!(v.check_size("0123456789abcdef").is_ok());
        assert!(v.check_size("0123456789abcdef0").is_err());
    }

    #[test]
    fn test_version_check() {
        let v = validator();
        let mut req = request(json!({}));
        assert!(v.check_envelope(&mut req).is_ok());

        req.jsonrpc = "1.0".to_string();
        assert!(v.check_envelope(&mut req).is_ok());

        req.jsonrpc = "3.0".to_string();
        assert!(v.check_envelope(&mut req).is_err());
    }

    #[test]
    fn test_depth_boundary() {
        let v = validator();

        // Exactly 10 levels is accepted.
        let mut req = request(nested(10));
        assert!(v.check_envelope(&mut req).is_ok());

        // 11 is rejected.
        let mut req = request(nested(11));
        assert!(v.check_envelope(&mut req).is_err());
    }

    #[test]
    fn test_depth_counts_arrays() {
        assert_eq!(depth_of(&json!(5)), 0);
        assert_eq!(depth_of(&json!({"a": 1})), 1);
        assert_eq!(depth_of(&json!([[1]])), 2);
        assert_eq!(depth_of(&json!({"a": [{"b": 1}]})), 3);
    }

    #[test]
    fn test_sanitize_strips_dangerous_keys() {
        let v = validator();
        let mut req = request(json!({
            "__proto__": {"polluted": true},
            "constructor": "bad",
            "nested": { "prototype": 1, "ok": 2 },
            "list": [{ "__proto__": 3 }]
        }));
        v.check_envelope(&mut req).unwrap();

        let params = req.params.unwrap();
        assert!(params.get("__proto__").is_none());
        assert!(params.get("constructor").is_none());
        assert!(params["nested"].get("prototype").is_none());
        assert_eq!(params["nested"]["ok"], 2);
        assert!(params["list"][0].get("__proto__").is_none());
    }
}
