//! Live observation and subscription handles.
//!
//! Per consumed Thing the [`SubscriptionRegistry`] tracks at most one active stream per
//! affordance name. Every termination path (explicit [`Subscription::stop`], stream completion,
//! stream error, owner teardown) funnels into the same idempotent shutdown: mark inactive,
//! cancel the pump, release the server-side resource, drop the registry entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::consume::dispatch::{unsubscribe_form, AugmentedForm};
use crate::error::{AffordanceKind, ConsumeError, ConsumeResult};
use crate::protocol::{ProtocolClient, Resource, ResourceType};
use crate::thing::{Form, FormOperation};

const fn affordance_kind(kind: ResourceType) -> AffordanceKind {
    match kind {
        ResourceType::Property => AffordanceKind::Property,
        ResourceType::Event => AffordanceKind::Event,
    }
}

/// The per-ConsumedThing bookkeeping of live streams.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    observed_properties: Mutex<HashMap<String, Arc<SubscriptionState>>>,
    subscribed_events: Mutex<HashMap<String, Arc<SubscriptionState>>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: ResourceType) -> &Mutex<HashMap<String, Arc<SubscriptionState>>> {
        match kind {
            ResourceType::Property => &self.observed_properties,
            ResourceType::Event => &self.subscribed_events,
        }
    }

    /// Check-then-insert under one lock: the at-most-one guarantee.
    pub(crate) fn register(&self, state: &Arc<SubscriptionState>) -> ConsumeResult<()> {
        let mut slot = self.slot(state.kind).lock();
        if slot.contains_key(&state.name) {
            return Err(ConsumeError::DuplicateSubscription {
                kind: affordance_kind(state.kind),
                name: state.name.clone(),
            });
        }
        slot.insert(state.name.clone(), Arc::clone(state));
        Ok(())
    }

    pub(crate) fn remove(&self, kind: ResourceType, name: &str) {
        self.slot(kind).lock().remove(name);
    }

    pub(crate) fn names(&self, kind: ResourceType) -> Vec<String> {
        self.slot(kind).lock().keys().cloned().collect()
    }

    /// Teardown used by the owner's drop guard: cancel every pump synchronously and release the
    /// server-side resources on detached tasks when a runtime is available.
    pub(crate) fn abort_all(&self) {
        let mut states = Vec::new();
        states.extend(self.observed_properties.lock().drain().map(|(_, s)| s));
        states.extend(self.subscribed_events.lock().drain().map(|(_, s)| s));
        for state in &states {
            SubscriptionState::abort_for_teardown(state);
        }
    }
}

/// Shared state of one live stream.
pub(crate) struct SubscriptionState {
    pub(crate) kind: ResourceType,
    pub(crate) name: String,
    pub(crate) thing_id: String,
    /// The affordance's full form list, hrefs resolved, original indices kept. Needed to score
    /// the unsubscribe form at teardown.
    augmented: Vec<AugmentedForm>,
    /// Index of the form the stream was established with.
    form_index: usize,
    /// The (possibly uri-expanded) form the stream was established with.
    form: Form,
    /// The establishing operation, `observeproperty` or `subscribeevent`.
    pub(crate) operation: FormOperation,
    cancel_operation: FormOperation,
    pub(crate) client: Arc<dyn ProtocolClient>,
    registry: Weak<SubscriptionRegistry>,
    active: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: ResourceType,
        name: impl Into<String>,
        thing_id: impl Into<String>,
        augmented: Vec<AugmentedForm>,
        form_index: usize,
        form: Form,
        operation: FormOperation,
        client: Arc<dyn ProtocolClient>,
        registry: Weak<SubscriptionRegistry>,
    ) -> Arc<Self> {
        let cancel_operation = operation.cancellation().unwrap_or(operation);
        Arc::new(Self {
            kind,
            name: name.into(),
            thing_id: thing_id.into(),
            augmented,
            form_index,
            form,
            operation,
            cancel_operation,
            client,
            registry,
            active: AtomicBool::new(true),
            pump: Mutex::new(None),
        })
    }

    pub(crate) fn resource(&self) -> Resource {
        Resource {
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            form: self.form.clone(),
        }
    }

    pub(crate) fn attach_pump(&self, handle: JoinHandle<()>) {
        *self.pump.lock() = Some(handle);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The four-step teardown. Idempotent: only the first caller acts.
    ///
    /// `cancel_pump` is false when called from inside the pump task itself, which must not abort
    /// the very task running the cleanup.
    pub(crate) async fn shutdown(&self, cancel_pump: bool) -> ConsumeResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let pump = self.pump.lock().take();
        if cancel_pump {
            if let Some(handle) = pump {
                handle.abort();
            }
        }

        let result = self.unlink().await;

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, &self.name);
        }
        debug!(name = self.name.as_str(), "subscription stopped");
        result
    }

    /// Release the server-side resource through the scored unsubscribe form.
    async fn unlink(&self) -> ConsumeResult<()> {
        let form = unsubscribe_form(&self.augmented, self.form_index, self.cancel_operation)
            .ok_or_else(|| ConsumeError::NoFormForInteraction {
                thing: self.thing_id.clone(),
                operation: self.cancel_operation,
            })?;
        let resource = Resource {
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            form,
        };
        self.client
            .unlink_resource(&resource, self.kind)
            .await
            .map_err(|source| ConsumeError::protocol(self.cancel_operation, source))
    }

    /// Synchronous teardown for the owner's drop guard.
    ///
    /// Pumps are aborted on the spot; the unlink round-trip runs on a detached task when a
    /// runtime is present.
    pub(crate) fn abort_for_teardown(this: &Arc<Self>) {
        if !this.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = this.pump.lock().take() {
            handle.abort();
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let state = Arc::clone(this);
            runtime.spawn(async move {
                if let Err(error) = state.unlink().await {
                    debug!(name = state.name.as_str(), %error, "unlink on teardown failed");
                }
            });
        }
    }
}

/// A handle to a live observation (property) or subscription (event) stream.
pub struct Subscription {
    pub(crate) state: Arc<SubscriptionState>,
}

impl Subscription {
    /// The affordance name this stream is attached to.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Whether the stream is still delivering.
    pub fn active(&self) -> bool {
        self.state.is_active()
    }

    /// Stop the stream.
    ///
    /// Cancels the delivery task, releases the server-side resource via the paired unsubscribe
    /// form and drops the registry entry. Calling `stop` again afterwards is a no-op.
    pub async fn stop(&self) -> ConsumeResult<()> {
        self.state.shutdown(true).await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.state.name)
            .field("kind", &self.state.kind)
            .field("active", &self.state.is_active())
            .finish()
    }
}
