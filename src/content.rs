//! Media-typed payloads and the codec registry.
//!
//! Every interaction moves a [`Content`]: raw bytes tagged with a media type. Codecs convert
//! between those bytes and structured [`Value`]s; the [`CodecRegistry`] picks the codec by the
//! canonical media type and falls back to the codec flagged as default for types it does not
//! know.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{ConsumeError, ConsumeResult};
use crate::thing::DataSchema;

/// A media-typed byte payload.
///
/// Equality is byte-wise on the body plus media-type equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub media_type: String,
    pub body: Bytes,
}

impl Content {
    pub fn new(media_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            media_type: media_type.into(),
            body: body.into(),
        }
    }
}

/// Strip parameters and lowercase a media type header.
///
/// `application/JSON; charset=utf-8` and `application/json` canonicalize to the same string;
/// this is the comparison basis for declared vs. observed content types.
pub fn canonical_media_type(header: &str) -> String {
    let essence = header.split(';').next().unwrap_or(header);
    essence.trim().to_ascii_lowercase()
}

/// Outcome of a codec conversion, cause preserved for the registry to wrap.
pub type CodecOutcome<T> = Result<T, Box<dyn StdError + Send + Sync>>;

/// A bidirectional converter between structured values and media-typed bytes.
pub trait ContentCodec: Send + Sync {
    /// The canonical media type this codec serves.
    fn media_type(&self) -> &str;

    fn encode(&self, value: &Value) -> CodecOutcome<Vec<u8>>;

    /// Decode bytes into a value.
    ///
    /// Codecs that support structured validation may consult `schema`; the built-in codecs
    /// ignore it.
    fn decode(&self, bytes: &[u8], schema: Option<&DataSchema>) -> CodecOutcome<Value>;
}

/// Registry mapping canonical media types to codecs.
///
/// One registered codec may hold the default flag; it handles every media type without a
/// dedicated codec. Registration order does not matter except that the most recent
/// `make_default = true` wins.
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn ContentCodec>>,
    default: Option<String>,
}

impl CodecRegistry {
    /// An empty registry, no codecs and no default.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
            default: None,
        }
    }

    /// The stock registry: JSON (default), plain text and octet-stream.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.add_codec(Arc::new(JsonCodec), true);
        registry.add_codec(Arc::new(TextCodec), false);
        registry.add_codec(Arc::new(OctetStreamCodec), false);
        registry
    }

    pub fn add_codec(&mut self, codec: Arc<dyn ContentCodec>, make_default: bool) {
        let media_type = canonical_media_type(codec.media_type());
        if make_default {
            self.default = Some(media_type.clone());
        }
        self.codecs.insert(media_type, codec);
    }

    fn codec_for(&self, canonical: &str) -> Option<&Arc<dyn ContentCodec>> {
        self.codecs.get(canonical).or_else(|| {
            self.default
                .as_deref()
                .and_then(|default| self.codecs.get(default))
        })
    }

    /// Encode `value` under `media_type` into a [`Content`].
    pub fn encode(&self, value: &Value, media_type: &str) -> ConsumeResult<Content> {
        let canonical = canonical_media_type(media_type);
        let codec = self
            .codec_for(&canonical)
            .ok_or_else(|| ConsumeError::UnsupportedMediaType(canonical.clone()))?;
        let body = codec.encode(value).map_err(|source| ConsumeError::Codec {
            media_type: canonical,
            source,
        })?;
        Ok(Content::new(media_type.to_string(), body))
    }

    /// Decode a [`Content`] into a structured value.
    pub fn decode(&self, content: &Content, schema: Option<&DataSchema>) -> ConsumeResult<Value> {
        let canonical = canonical_media_type(&content.media_type);
        let codec = self
            .codec_for(&canonical)
            .ok_or_else(|| ConsumeError::UnsupportedMediaType(canonical.clone()))?;
        codec
            .decode(&content.body, schema)
            .map_err(|source| ConsumeError::Codec {
                media_type: canonical,
                source,
            })
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `application/json` via [serde_json].
pub struct JsonCodec;

impl ContentCodec for JsonCodec {
    fn media_type(&self) -> &str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> CodecOutcome<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8], _schema: Option<&DataSchema>) -> CodecOutcome<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// `text/plain`, UTF-8 strings only.
pub struct TextCodec;

impl ContentCodec for TextCodec {
    fn media_type(&self) -> &str {
        "text/plain"
    }

    fn encode(&self, value: &Value) -> CodecOutcome<Vec<u8>> {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(text.into_bytes())
    }

    fn decode(&self, bytes: &[u8], _schema: Option<&DataSchema>) -> CodecOutcome<Value> {
        let text = std::str::from_utf8(bytes)?;
        Ok(Value::String(text.to_string()))
    }
}

/// `application/octet-stream`: opaque bytes.
///
/// Raw bodies surface through [`InteractionOutput::array_buffer`](crate::consume::InteractionOutput::array_buffer);
/// decoding yields `null` rather than inventing a structured view.
pub struct OctetStreamCodec;

impl ContentCodec for OctetStreamCodec {
    fn media_type(&self) -> &str {
        "application/octet-stream"
    }

    fn encode(&self, value: &Value) -> CodecOutcome<Vec<u8>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::String(s) => Ok(s.clone().into_bytes()),
            other => Err(format!("cannot encode {other} as an octet stream").into()),
        }
    }

    fn decode(&self, _bytes: &[u8], _schema: Option<&DataSchema>) -> CodecOutcome<Value> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonicalization() {
        assert_eq!(
            canonical_media_type("application/JSON; charset=utf-8"),
            "application/json"
        );
        assert_eq!(canonical_media_type(" text/plain "), "text/plain");
        assert_eq!(canonical_media_type("application/json"), "application/json");
    }

    #[test]
    fn json_round_trip() {
        let registry = CodecRegistry::new();
        let value = json!({"value": 42, "unit": "celsius"});

        let content = registry.encode(&value, "application/json").unwrap();
        let decoded = registry.decode(&content, None).unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn unknown_media_type_uses_default() {
        let registry = CodecRegistry::new();
        let content = Content::new("application/senml+json", r#"{"v": 1}"#.as_bytes().to_vec());

        let decoded = registry.decode(&content, None).unwrap();
        assert_eq!(decoded, json!({"v": 1}));
    }

    #[test]
    fn unknown_media_type_without_default_fails() {
        let mut registry = CodecRegistry::empty();
        registry.add_codec(Arc::new(TextCodec), false);

        let err = registry
            .encode(&json!(1), "application/cbor")
            .unwrap_err();
        assert!(matches!(err, ConsumeError::UnsupportedMediaType(t) if t == "application/cbor"));
    }

    #[test]
    fn most_recent_default_wins() {
        let mut registry = CodecRegistry::empty();
        registry.add_codec(Arc::new(JsonCodec), true);
        registry.add_codec(Arc::new(TextCodec), true);

        let content = Content::new("application/unknown", b"plain".to_vec());
        let decoded = registry.decode(&content, None).unwrap();
        assert_eq!(decoded, Value::String("plain".to_string()));
    }

    #[test]
    fn text_codec_accepts_non_strings() {
        let registry = CodecRegistry::new();
        let content = registry.encode(&json!(3.5), "text/plain").unwrap();
        assert_eq!(content.body.as_ref(), b"3.5");
    }

    #[test]
    fn content_equality_is_byte_wise() {
        let a = Content::new("application/json", b"{}".to_vec());
        let b = Content::new("application/json", b"{}".to_vec());
        let c = Content::new("application/json", b"{ }".to_vec());

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
