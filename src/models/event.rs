//! "Object created" notifications and the keys used to deduplicate them.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A validated notification for one stored object version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
    pub bucket: String,
    pub object_name: String,
    pub generation: i64,

    /// Content type reported by the notification, when present.
    pub content_type: Option<String>,
}

impl NotificationEvent {
    pub fn new(bucket: impl Into<String>, object_name: impl Into<String>, generation: i64) -> Self {
        Self {
            bucket: bucket.into(),
            object_name: object_name.into(),
            generation,
            content_type: None,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.bucket, &self.object_name, self.generation)
    }
}

/// `bucket/objectName@generation`.
///
/// Two notifications for the same stored bytes share a key; an overwrite
/// produces a new generation and therefore a new key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(bucket: &str, object_name: &str, generation: i64) -> Self {
        Self(format!("{}/{}@{}", bucket, object_name, generation))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `generation` is not an integer: {0}")]
    InvalidGeneration(String),
}

/// Storage notifications send `generation` as a JSON string; accept numbers too.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum GenerationValue {
    Number(i64),
    Text(String),
}

/// The event body before validation. Every field is optional so that a
/// missing field turns into a `ValidationError` rather than a decode error.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub bucket: Option<String>,
    pub name: Option<String>,
    pub generation: Option<GenerationValue>,
    pub content_type: Option<String>,
}

impl NotificationPayload {
    /// Parse a request body in either CloudEvents content mode.
    ///
    /// Binary mode carries the storage object directly as the body; structured
    /// mode wraps it in an envelope under `data`.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| ValidationError::MalformedPayload(err.to_string()))?;

        let inner = match value {
            Value::Object(mut map) if !map.contains_key("bucket") && map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };

        serde_json::from_value(inner).map_err(|err| ValidationError::MalformedPayload(err.to_string()))
    }

    pub fn validate(self) -> Result<NotificationEvent, ValidationError> {
        let bucket = self
            .bucket
            .filter(|b| !b.is_empty())
            .ok_or(ValidationError::MissingField("bucket"))?;
        let object_name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or(ValidationError::MissingField("name"))?;
        let generation = match self.generation {
            Some(GenerationValue::Number(n)) => n,
            Some(GenerationValue::Text(text)) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| ValidationError::InvalidGeneration(text.clone()))?,
            None => return Err(ValidationError::MissingField("generation")),
        };

        Ok(NotificationEvent {
            bucket,
            object_name,
            generation,
            content_type: self.content_type.filter(|ct| !ct.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_is_bucket_name_at_generation() {
        let event = NotificationEvent::new("b", "x.jpg", 5);
        assert_eq!(event.idempotency_key().to_string(), "b/x.jpg@5");
    }

    #[test]
    fn new_generation_yields_new_key() {
        let a = NotificationEvent::new("b", "x.jpg", 5).idempotency_key();
        let b = NotificationEvent::new("b", "x.jpg", 6).idempotency_key();
        assert_ne!(a, b);
    }

    #[test]
    fn parses_binary_mode_body_with_string_generation() {
        let body = br#"{"bucket":"photos","name":"a/b.png","generation":"1700000000","contentType":"image/png"}"#;
        let event = NotificationPayload::from_json(body).unwrap().validate().unwrap();
        assert_eq!(event.bucket, "photos");
        assert_eq!(event.object_name, "a/b.png");
        assert_eq!(event.generation, 1_700_000_000);
        assert_eq!(event.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn parses_structured_mode_envelope() {
        let body = br#"{"specversion":"1.0","type":"google.cloud.storage.object.v1.finalized","data":{"bucket":"b","name":"x.jpg","generation":5}}"#;
        let event = NotificationPayload::from_json(body).unwrap().validate().unwrap();
        assert_eq!(event, NotificationEvent::new("b", "x.jpg", 5));
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let no_gen = NotificationPayload::from_json(br#"{"bucket":"b","name":"x.jpg"}"#).unwrap();
        assert_eq!(no_gen.validate(), Err(ValidationError::MissingField("generation")));

        let empty_name = NotificationPayload::from_json(br#"{"bucket":"b","name":"","generation":1}"#).unwrap();
        assert_eq!(empty_name.validate(), Err(ValidationError::MissingField("name")));

        let no_bucket = NotificationPayload::from_json(br#"{"name":"x.jpg","generation":1}"#).unwrap();
        assert_eq!(no_bucket.validate(), Err(ValidationError::MissingField("bucket")));
    }

    #[test]
    fn non_numeric_generation_is_rejected() {
        let payload = NotificationPayload::from_json(br#"{"bucket":"b","name":"x","generation":"abc"}"#).unwrap();
        assert!(matches!(payload.validate(), Err(ValidationError::InvalidGeneration(_))));
    }

    #[test]
    fn garbage_body_is_malformed() {
        assert!(matches!(
            NotificationPayload::from_json(b"not json"),
            Err(ValidationError::MalformedPayload(_))
        ));
    }
}
