//! Error types raised by the consumption engine.
//!
//! [`ConsumeError`] is the single error surface of the public API. Transport failures are raised
//! by the bindings as [`ProtocolError`] and wrapped so the cause chain stays intact.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::thing::FormOperation;

/// Result alias for every fallible operation of the engine.
pub type ConsumeResult<T> = Result<T, ConsumeError>;

/// Errors surfaced by [`ConsumedThing`](crate::consume::ConsumedThing) interactions.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The interaction names an affordance the Thing Description does not declare.
    #[error("thing {thing} has no {kind} named {name}")]
    MissingAffordance {
        thing: String,
        kind: AffordanceKind,
        name: String,
    },

    /// No form of the affordance can serve the requested operation.
    #[error("thing {thing} has no form supporting {operation}")]
    NoFormForInteraction {
        thing: String,
        operation: FormOperation,
    },

    /// None of the candidate form schemes has a registered client factory.
    #[error("thing {thing} has no client factory for any of the schemes {schemes:?}")]
    NoClientFactoryForSchemes {
        thing: String,
        schemes: Vec<String>,
    },

    /// A protocol binding failed while performing the interaction.
    #[error("protocol client failure while handling {operation}")]
    Protocol {
        operation: FormOperation,
        #[source]
        source: ProtocolError,
    },

    /// The response content type differs from the one the form declared.
    #[error("expected response content type {expected} but the binding returned {found}")]
    MediaTypeMismatch { expected: String, found: String },

    /// No codec is registered for the media type and no default codec is flagged.
    #[error("no codec registered for media type {0}")]
    UnsupportedMediaType(String),

    /// A codec failed to encode or decode a payload.
    #[error("codec failure for media type {media_type}")]
    Codec {
        media_type: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A streaming input was supplied where only a value input is accepted.
    #[error("streaming input is not supported for {operation}")]
    UnsupportedInput { operation: FormOperation },

    /// The affordance already has an active observation or subscription.
    #[error("{kind} {name} is already being observed")]
    DuplicateSubscription { kind: AffordanceKind, name: String },

    /// The TD declares security schemes but no usable credentials were found.
    #[error("no credentials found: {message}")]
    NoCredentialsFound { message: String },
}

/// Which family of affordance an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffordanceKind {
    Property,
    Action,
    Event,
}

impl fmt::Display for AffordanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Property => "property",
            Self::Action => "action",
            Self::Event => "event",
        };
        f.write_str(name)
    }
}

/// A transport-level failure raised by a protocol binding.
///
/// Bindings build this from whatever their transport produces; the engine never inspects it
/// beyond wrapping it with the interaction that failed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProtocolError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ConsumeError {
    pub(crate) fn protocol(operation: FormOperation, source: ProtocolError) -> Self {
        Self::Protocol { operation, source }
    }
}
