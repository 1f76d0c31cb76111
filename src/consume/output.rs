//! Tagged value carriers on the input and output side of an interaction.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use futures_util::Stream;
use parking_lot::RwLock;
use serde_json::Value;

use crate::content::{CodecRegistry, Content};
use crate::error::{ConsumeResult, ProtocolError};
use crate::thing::DataSchema;

/// A byte producer used for streaming inputs.
pub type InputStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProtocolError>> + Send>>;

/// The input side of a write or invoke interaction.
pub enum InteractionInput {
    /// A structured value, encoded through the codec registry under the form's content type.
    Value(Value),
    /// A raw byte stream.
    ///
    /// Only bindings with an explicit streaming path accept this; the core write/invoke
    /// operations reject it with `UnsupportedInput`.
    Stream(InputStream),
}

impl fmt::Debug for InteractionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Value> for InteractionInput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl InteractionInput {
    /// Wrap anything that converts into a JSON value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }
}

/// The output of a read, invoke or stream interaction.
///
/// Decoding is lazy: the raw [`Content`] is kept as received and only turned into a structured
/// value on the first [`InteractionOutput::value`] call, which caches the result. Raw bytes stay
/// available through [`InteractionOutput::array_buffer`] regardless.
pub struct InteractionOutput {
    content: Content,
    schema: Option<DataSchema>,
    codecs: Arc<RwLock<CodecRegistry>>,
    value: OnceLock<Value>,
    data_used: AtomicBool,
}

impl InteractionOutput {
    pub(crate) fn new(
        content: Content,
        schema: Option<DataSchema>,
        codecs: Arc<RwLock<CodecRegistry>>,
    ) -> Self {
        Self {
            content,
            schema,
            codecs,
            value: OnceLock::new(),
            data_used: AtomicBool::new(false),
        }
    }

    /// Decode the content into a structured value.
    ///
    /// Idempotent: the first successful call materializes the value, later calls return the
    /// cached one.
    pub fn value(&self) -> ConsumeResult<Value> {
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }
        let decoded = self
            .codecs
            .read()
            .decode(&self.content, self.schema.as_ref())?;
        self.data_used.store(true, Ordering::SeqCst);
        Ok(self.value.get_or_init(|| decoded).clone())
    }

    /// The raw byte body, untouched by any codec.
    pub fn array_buffer(&self) -> Bytes {
        self.content.body.clone()
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn schema(&self) -> Option<&DataSchema> {
        self.schema.as_ref()
    }

    /// Whether [`InteractionOutput::value`] has consumed the data.
    pub fn data_used(&self) -> bool {
        self.data_used.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for InteractionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionOutput")
            .field("content", &self.content)
            .field("data_used", &self.data_used.load(Ordering::SeqCst))
            .finish()
    }
}
