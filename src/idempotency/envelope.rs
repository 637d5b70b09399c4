use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Media type forced onto every replayed response that did not record one.
pub const CANONICAL_CONTENT_TYPE: &str = "application/json";

/// Capability a host response type must offer to be cached and replayed.
///
/// The interceptor only ever talks to responses through this trait, so any
/// framework adapter can take part by implementing it.
pub trait IdempotentResponse: Sized {
    fn status(&self) -> StatusCode;

    /// Encodes the body as a JSON value. Fails for values the encoder cannot
    /// represent (for example maps with non-string keys).
    fn encode_body(&self) -> std::result::Result<Value, serde_json::Error>;

    fn headers(&self) -> &HeaderMap;

    fn content_type(&self) -> Option<String>;

    fn template_name(&self) -> Option<String> {
        None
    }

    /// False for responses that cannot be snapshotted at all (streamed or
    /// oversized bodies). Such responses are returned but never stored.
    fn is_capturable(&self) -> bool {
        true
    }

    /// Rebuilds a response from a cached envelope.
    fn from_envelope(envelope: ResponseEnvelope) -> Result<Self>;
}

/// Serializable snapshot of a successful response.
///
/// Field names are the stored wire format and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub data: Value,
    pub status: u16,
    pub template_name: Option<String>,
    #[serde(with = "ordered_headers")]
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
}

impl ResponseEnvelope {
    /// Snapshots a response.
    pub fn capture<R: IdempotentResponse>(response: &R) -> Result<Self> {
        let data = response.encode_body()?;

        let mut headers = Vec::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            // The body is re-rendered on replay, so framing headers would lie.
            if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING {
                continue;
            }
            let value = value.to_str().map_err(|e| {
                serde_json::Error::custom(format!("header '{}' is not valid text: {}", name, e))
            })?;
            headers.push((name.as_str().to_string(), value.to_string()));
        }

        Ok(Self {
            data,
            status: response.status().as_u16(),
            template_name: response.template_name(),
            headers,
            content_type: response.content_type(),
        })
    }

    /// Reconstructs a concrete response.
    pub fn replay<R: IdempotentResponse>(self) -> Result<R> {
        R::from_envelope(self)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn status_code(&self) -> Result<StatusCode> {
        StatusCode::from_u16(self.status).map_err(|e| {
            serde_json::Error::custom(format!("invalid cached status {}: {}", self.status, e))
                .into()
        })
    }

    /// Captured headers with the output media type forced last.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len() + 1);
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                serde_json::Error::custom(format!("invalid cached header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                serde_json::Error::custom(format!("invalid cached header value: {}", e))
            })?;
            map.append(name, value);
        }

        let media_type = HeaderValue::from_str(self.media_type()).map_err(|e| {
            serde_json::Error::custom(format!("invalid cached content type: {}", e))
        })?;
        map.insert(CONTENT_TYPE, media_type);

        Ok(map)
    }

    pub fn media_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(CANONICAL_CONTENT_TYPE)
    }

    /// Renders the body the way it went out the first time.
    pub fn render_body(&self) -> Result<Vec<u8>> {
        render_json(&self.data)
    }
}

/// JSON rendering shared by first responses and replays. `null` renders as an
/// empty body.
pub fn render_json(data: &Value) -> Result<Vec<u8>> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::to_vec(data)?)
}

/// Headers travel as a JSON object; document order is kept on the way back in.
mod ordered_headers {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(headers: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(headers.len()))?;
        for (name, value) in headers {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Vec<(String, String)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut headers = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    headers.push((name, value));
                }
                Ok(headers)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Vec::new())
            }
        }

        deserializer.deserialize_any(HeadersVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Plain {
        status: StatusCode,
        body: Value,
        headers: HeaderMap,
    }

    impl IdempotentResponse for Plain {
        fn status(&self) -> StatusCode {
            self.status
        }

        fn encode_body(&self) -> std::result::Result<Value, serde_json::Error> {
            Ok(self.body.clone())
        }

        fn headers(&self) -> &HeaderMap {
            &self.headers
        }

        fn content_type(&self) -> Option<String> {
            None
        }

        fn from_envelope(envelope: ResponseEnvelope) -> Result<Self> {
            Ok(Self {
                status: envelope.status_code()?,
                headers: envelope.header_map()?,
                body: envelope.data,
            })
        }
    }

    fn sample() -> Plain {
        let mut headers = HeaderMap::new();
        headers.insert("location", HeaderValue::from_static("/payments/42"));
        headers.insert("x-request-id", HeaderValue::from_static("req-1"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("9"));
        Plain {
            status: StatusCode::CREATED,
            body: json!({"id": 42}),
            headers,
        }
    }

    #[test]
    fn test_wire_format_field_names() {
        let envelope = ResponseEnvelope::capture(&sample()).unwrap();
        let value: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(value["data"], json!({"id": 42}));
        assert_eq!(value["status"], json!(201));
        assert_eq!(value["template_name"], Value::Null);
        assert_eq!(value["headers"]["location"], json!("/payments/42"));
        assert_eq!(value["content_type"], Value::Null);
    }

    #[test]
    fn test_capture_drops_framing_headers() {
        let envelope = ResponseEnvelope::capture(&sample()).unwrap();
        assert!(envelope
            .headers
            .iter()
            .all(|(name, _)| name != "content-length"));
        assert_eq!(envelope.headers.len(), 2);
    }

    #[test]
    fn test_replay_restores_captured_fields() {
        let original = sample();
        let replayed: Plain = ResponseEnvelope::capture(&original)
            .unwrap()
            .replay()
            .unwrap();

        assert_eq!(replayed.status, original.status);
        assert_eq!(replayed.body, original.body);
        assert_eq!(replayed.headers.get("location"), original.headers.get("location"));
        assert_eq!(
            replayed.headers.get(CONTENT_TYPE).unwrap(),
            CANONICAL_CONTENT_TYPE
        );
    }

    #[test]
    fn test_header_order_survives_storage() {
        let raw = br#"{"data":null,"status":200,"template_name":null,
            "headers":{"z-last":"1","a-first":"2","m-middle":"3"},"content_type":null}"#;
        let envelope = ResponseEnvelope::from_bytes(raw).unwrap();
        let names: Vec<&str> = envelope.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["z-last", "a-first", "m-middle"]);
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let raw = br#"{"data":{"ok":true},"status":200,"template_name":"receipt.html",
            "headers":{},"content_type":"application/vnd.api+json"}"#;
        let envelope = ResponseEnvelope::from_bytes(raw).unwrap();
        let headers = envelope.header_map().unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/vnd.api+json");
        assert_eq!(envelope.template_name.as_deref(), Some("receipt.html"));
    }

    #[test]
    fn test_null_body_renders_empty() {
        assert!(render_json(&Value::Null).unwrap().is_empty());
        assert_eq!(render_json(&json!({"id": 42})).unwrap(), br#"{"id":42}"#.to_vec());
    }

    #[test]
    fn test_invalid_cached_status_is_serialization_error() {
        let raw = br#"{"data":null,"status":42,"template_name":null,"headers":{},"content_type":null}"#;
        let envelope = ResponseEnvelope::from_bytes(raw).unwrap();
        let err = envelope.status_code().unwrap_err();
        assert_eq!(err.kind(), "serialization");
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = ResponseEnvelope::from_bytes(b"not json").unwrap_err();
        assert_eq!(err.kind(), "serialization");
    }
}
