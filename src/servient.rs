//! The servient: the dependency container the consumption engine reads from.
//!
//! A servient owns the registered [`ProtocolClientFactory`]s (registration order doubles as the
//! client-scheme priority), the credential store and the codec registry. Consuming a Thing
//! Description hands the returned [`ConsumedThing`] a handle on all three: the factory list is
//! frozen at that point, the credential store and codec registry stay live and shared.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::consume::ConsumedThing;
use crate::content::{CodecRegistry, ContentCodec};
use crate::protocol::ProtocolClientFactory;
use crate::security::{CredentialStore, Credentials};
use crate::thing::Thing;

pub struct Servient {
    factories: Vec<Arc<dyn ProtocolClientFactory>>,
    credentials: Arc<RwLock<CredentialStore>>,
    codecs: Arc<RwLock<CodecRegistry>>,
}

impl Servient {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            credentials: Arc::new(RwLock::new(CredentialStore::new())),
            codecs: Arc::new(RwLock::new(CodecRegistry::new())),
        }
    }

    /// Register a client factory.
    ///
    /// A factory registered earlier outranks later ones when the dispatch layer orders the
    /// candidate schemes of an interaction.
    pub fn add_client_factory(&mut self, factory: Box<dyn ProtocolClientFactory>) -> &mut Self {
        self.factories.push(Arc::from(factory));
        self
    }

    /// Store credentials for every resource whose href starts with `href_prefix`.
    ///
    /// The store is shared with already-consumed Things, but a client that was created before
    /// this call keeps the credentials it was installed with.
    pub fn add_credentials(
        &self,
        href_prefix: impl Into<String>,
        credentials: Credentials,
    ) -> &Self {
        self.credentials.write().insert(href_prefix, credentials);
        self
    }

    /// Register a content codec, optionally flagging it as the fallback for unknown media types.
    pub fn add_codec(&self, codec: Arc<dyn ContentCodec>, make_default: bool) -> &Self {
        self.codecs.write().add_codec(codec, make_default);
        self
    }

    /// The URI schemes this servient can serve, in priority order.
    pub fn supported_schemes(&self) -> Vec<String> {
        self.factories
            .iter()
            .map(|factory| factory.scheme().to_string())
            .collect()
    }

    /// Initialize every registered factory.
    pub fn start(&self) {
        for factory in &self.factories {
            debug!(scheme = factory.scheme(), "initializing client factory");
            factory.init();
        }
    }

    /// Tear down every registered factory.
    ///
    /// Clients already cached on consumed Things keep working until their owner is dropped;
    /// shutting the servient down only stops new clients from being built.
    pub fn shutdown(&self) {
        for factory in &self.factories {
            debug!(scheme = factory.scheme(), "destroying client factory");
            factory.destroy();
        }
    }

    /// Turn a Thing Description into a live interaction surface backed by this servient.
    pub fn consume(&self, thing: Thing) -> ConsumedThing {
        ConsumedThing::new(self.handle(), thing)
    }

    fn handle(&self) -> ServientHandle {
        ServientHandle {
            factories: self.factories.clone(),
            credentials: Arc::clone(&self.credentials),
            codecs: Arc::clone(&self.codecs),
        }
    }
}

impl Default for Servient {
    fn default() -> Self {
        Self::new()
    }
}

/// The servient state a consumed Thing keeps alive.
pub(crate) struct ServientHandle {
    factories: Vec<Arc<dyn ProtocolClientFactory>>,
    credentials: Arc<RwLock<CredentialStore>>,
    codecs: Arc<RwLock<CodecRegistry>>,
}

impl ServientHandle {
    pub(crate) fn supported_schemes(&self) -> Vec<String> {
        self.factories
            .iter()
            .map(|factory| factory.scheme().to_string())
            .collect()
    }

    pub(crate) fn factory_for(&self, scheme: &str) -> Option<&dyn ProtocolClientFactory> {
        self.factories
            .iter()
            .map(AsRef::as_ref)
            .find(|factory| factory.scheme() == scheme)
    }

    pub(crate) fn codecs(&self) -> Arc<RwLock<CodecRegistry>> {
        Arc::clone(&self.codecs)
    }

    pub(crate) fn credential_snapshot(&self) -> CredentialStore {
        self.credentials.read().clone()
    }
}
