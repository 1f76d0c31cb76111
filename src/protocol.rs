//! The contract between the consumption engine and protocol bindings.
//!
//! The engine never talks to a network itself: every interaction goes through a
//! [`ProtocolClient`] obtained from a [`ProtocolClientFactory`] registered on the
//! [`Servient`](crate::servient::Servient). Bindings for HTTP, CoAP, MQTT or WebSocket live in
//! their own crates and only need to satisfy these two traits.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::content::Content;
use crate::error::ProtocolError;
use crate::security::CredentialsProvider;
use crate::thing::Form;

/// The value triple identifying one affordance endpoint on one Thing.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub thing_id: String,
    pub name: String,
    pub form: Form,
}

/// Which kind of stream a subscription carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Property,
    Event,
}

/// A lazy, potentially infinite stream of contents produced by a subscription.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Content, ProtocolError>> + Send>>;

/// A protocol-specific backend.
///
/// Implementations multiplex whatever transport they own (request/response, long-poll,
/// server-sent streams, WebSocket frames, MQTT topics) behind these six operations. Every method
/// may fail with [`ProtocolError`]; the engine wraps it preserving the cause.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn read_resource(&self, resource: &Resource) -> Result<Content, ProtocolError>;

    async fn write_resource(
        &self,
        resource: &Resource,
        content: Content,
    ) -> Result<(), ProtocolError>;

    async fn invoke_resource(
        &self,
        resource: &Resource,
        content: Option<Content>,
    ) -> Result<Content, ProtocolError>;

    /// Open an observation (property) or subscription (event) stream.
    async fn subscribe_resource(
        &self,
        resource: &Resource,
        kind: ResourceType,
    ) -> Result<ContentStream, ProtocolError>;

    /// Release the server-side state behind a terminated stream.
    async fn unlink_resource(
        &self,
        resource: &Resource,
        kind: ResourceType,
    ) -> Result<(), ProtocolError>;

    /// Install the credentials provider.
    ///
    /// Called exactly once, after creation and before the client is cached or used.
    fn set_credentials_provider(&mut self, _provider: CredentialsProvider) {}

    async fn start(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Builds [`ProtocolClient`]s for one URI scheme.
pub trait ProtocolClientFactory: Send + Sync {
    /// The URI scheme this factory serves, e.g. `http`, `coap`, `mqtt`.
    fn scheme(&self) -> &str;

    fn create_client(&self) -> Box<dyn ProtocolClient>;

    /// Called when the owning servient starts.
    fn init(&self) {}

    /// Called when the owning servient shuts down.
    fn destroy(&self) {}
}
