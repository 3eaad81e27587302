//! JSON request processing.
//!
//! Validates a user record, increments its `number` field and keeps running
//! sums of the submitted numbers, both overall and per client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// A validated user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub id: i32,
    pub name: String,
    pub phone: String,
    pub number: i32,
}

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("Empty request body")]
    EmptyBody,
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Expected JSON object")]
    NotAnObject,
    #[error("Missing or invalid '{0}' field")]
    InvalidField(&'static str),
    #[error("Invalid user data")]
    InvalidUserData,
    #[error("Number overflow")]
    Overflow,
}

/// Outcome of processing one payload. The body is always JSON; on failure it
/// is `{"error": ..., "success": false}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub success: bool,
    pub body: Vec<u8>,
}

/// Request counters kept by the handler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerStats {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub struct JsonHandler {
    processed: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_sum: AtomicI64,
    client_sums: Mutex<HashMap<String, i64>>,
}

impl JsonHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a raw request body. Never panics on any input.
    pub fn process(&self, body: &[u8]) -> Reply {
        self.processed.fetch_add(1, Ordering::Relaxed);

        match self.handle(body) {
            Ok(data) => {
                self.successful.fetch_add(1, Ordering::Relaxed);
                let mut value = serde_json::to_value(&data).unwrap_or(Value::Null);
                if let Value::Object(ref mut map) = value {
                    map.insert("success".to_string(), Value::Bool(true));
                }
                debug!(id = data.id, number = data.number, "Processed request");
                Reply {
                    success: true,
                    body: value.to_string().into_bytes(),
                }
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Rejected request");
                Reply {
                    success: false,
                    body: error_body(&e.to_string()),
                }
            }
        }
    }

    fn handle(&self, body: &[u8]) -> Result<UserData, HandlerError> {
        let mut data = parse_user(body)?;
        validate(&data)?;

        let original = data.number;
        data.number = original.checked_add(1).ok_or(HandlerError::Overflow)?;

        self.total_sum.fetch_add(original as i64, Ordering::Relaxed);
        let client_id = format!("user_{}", data.id);
        let mut sums = self.client_sums.lock().unwrap_or_else(PoisonError::into_inner);
        *sums.entry(client_id).or_insert(0) += original as i64;

        Ok(data)
    }

    pub fn total_numbers_sum(&self) -> i64 {
        self.total_sum.load(Ordering::Relaxed)
    }

    pub fn client_numbers_sum(&self, client_id: &str) -> i64 {
        let sums = self.client_sums.lock().unwrap_or_else(PoisonError::into_inner);
        sums.get(client_id).copied().unwrap_or(0)
    }

    /// All per-client sums, sorted by client id.
    pub fn all_client_sums(&self) -> Vec<(String, i64)> {
        let sums = self.client_sums.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = sums.iter().map(|(k, v)| (k.clone(), *v)).collect();
        all.sort();
        all
    }

    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            processed: self.processed.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Field-by-field extraction so each missing or mistyped field gets its own
/// error message.
fn parse_user(body: &[u8]) -> Result<UserData, HandlerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(HandlerError::EmptyBody);
    }

    let value: Value = serde_json::from_slice(body).map_err(|_| HandlerError::InvalidJson)?;
    let obj = value.as_object().ok_or(HandlerError::NotAnObject)?;

    let int_field = |name: &'static str| {
        obj.get(name)
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok())
            .ok_or(HandlerError::InvalidField(name))
    };
    let str_field = |name: &'static str| {
        obj.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(HandlerError::InvalidField(name))
    };

    Ok(UserData {
        id: int_field("id")?,
        name: str_field("name")?,
        phone: str_field("phone")?,
        number: int_field("number")?,
    })
}

fn validate(data: &UserData) -> Result<(), HandlerError> {
    if data.name.is_empty() || data.phone.is_empty() || data.id < 0 {
        return Err(HandlerError::InvalidUserData);
    }
    Ok(())
}

fn error_body(message: &str) -> Vec<u8> {
    serde_json::json!({ "error": message, "success": false })
        .to_string()
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(reply: &Reply) -> Value {
        serde_json::from_slice(&reply.body).unwrap()
    }

    #[test]
    fn test_increments_number() {
        let handler = JsonHandler::new();
        let reply = handler.process(br#"{"id":1,"name":"A","phone":"1","number":5}"#);
        assert!(reply.success);

        let body = parse(&reply);
        assert_eq!(body["number"], 6);
        assert_eq!(body["id"], 1);
        assert_eq!(body["name"], "A");
        assert_eq!(body["success"], true);
    }

    #[test]
    fn test_empty_body() {
        let handler = JsonHandler::new();
        let reply = handler.process(b"");
        assert!(!reply.success);
        assert_eq!(parse(&reply)["error"], "Empty request body");
        assert_eq!(parse(&reply)["success"], false);
    }

    #[test]
    fn test_invalid_payloads() {
        let handler = JsonHandler::new();
        let cases: [(&[u8], &str); 5] = [
            (b"{not json", "Invalid JSON format"),
            (b"[1,2]", "Expected JSON object"),
            (br#"{"name":"A","phone":"1","number":5}"#, "Missing or invalid 'id' field"),
            (
                br#"{"id":1,"name":"A","phone":"1","number":"5"}"#,
                "Missing or invalid 'number' field",
            ),
            (br#"{"id":-1,"name":"A","phone":"1","number":5}"#, "Invalid user data"),
        ];
        for (input, expected) in cases {
            let reply = handler.process(input);
            assert!(!reply.success);
            assert_eq!(parse(&reply)["error"], expected);
        }
        assert_eq!(handler.stats().failed, 5);
        assert_eq!(handler.stats().successful, 0);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let handler = JsonHandler::new();
        let body = format!(r#"{{"id":1,"name":"A","phone":"1","number":{}}}"#, i32::MAX);
        let reply = handler.process(body.as_bytes());
        assert!(!reply.success);
        assert_eq!(handler.total_numbers_sum(), 0);
    }

    #[test]
    fn test_tracks_sums() {
        let handler = JsonHandler::new();
        handler.process(br#"{"id":1,"name":"A","phone":"1","number":5}"#);
        handler.process(br#"{"id":1,"name":"A","phone":"1","number":7}"#);
        handler.process(br#"{"id":2,"name":"B","phone":"2","number":3}"#);

        assert_eq!(handler.total_numbers_sum(), 15);
        assert_eq!(handler.client_numbers_sum("user_1"), 12);
        assert_eq!(handler.client_numbers_sum("user_9"), 0);
        assert_eq!(
            handler.all_client_sums(),
            vec![("user_1".to_string(), 12), ("user_2".to_string(), 3)]
        );
        assert_eq!(handler.stats().processed, 3);
    }
}
