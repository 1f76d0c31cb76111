//! Consuming Thing Descriptions.
//!
//! A [`ConsumedThing`] is the runtime proxy over one TD: it exposes the property, action and
//! event affordances of the described Thing as asynchronous operations, multiplexed over the
//! protocol bindings registered on the owning [`Servient`](crate::servient::Servient).
//!
//! ```no_run
//! # async fn demo(servient: wot_consume::Servient, td: wot_consume::Thing) {
//! let thing = servient.consume(td);
//! let output = thing
//!     .read_property("temperature", &Default::default())
//!     .await
//!     .unwrap();
//! println!("{}", output.value().unwrap());
//! # }
//! ```

pub(crate) mod dispatch;
mod output;
mod subscription;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{stream, Stream, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::content::{canonical_media_type, CodecRegistry, Content};
use crate::error::{AffordanceKind, ConsumeError, ConsumeResult};
use crate::protocol::{ContentStream, ProtocolClient, Resource, ResourceType};
use crate::servient::ServientHandle;
use crate::thing::{DataSchema, Form, FormOperation, Thing};

pub use output::{InputStream, InteractionInput, InteractionOutput};
pub use subscription::Subscription;

use subscription::{SubscriptionRegistry, SubscriptionState};

/// How many sub-interactions a multi-property read or write keeps in flight at once.
const CONCURRENT_INTERACTIONS: usize = 8;

/// Listener invoked for every item of a push-style observation.
pub type OnNext = Box<dyn Fn(InteractionOutput) + Send + Sync>;

/// Listener invoked when a push-style observation fails.
pub type OnError = Box<dyn Fn(ConsumeError) + Send + Sync>;

/// The pull-style stream returned by [`ConsumedThing::consume_event`].
pub type InteractionStream = Pin<Box<dyn Stream<Item = ConsumeResult<InteractionOutput>> + Send>>;

/// Per-interaction tuning knobs.
#[derive(Clone, Debug, Default)]
pub struct InteractionOptions {
    /// Use this form (by index into the affordance's form list) instead of letting dispatch
    /// pick one by scheme preference.
    pub form_index: Option<usize>,

    /// Values for the uri-variable placeholders of the chosen form's href.
    pub uri_variables: HashMap<String, String>,

    /// Free-form data some bindings read, e.g. query payloads for long-polls.
    pub data: Option<Value>,
}

impl InteractionOptions {
    pub fn with_form_index(mut self, index: usize) -> Self {
        self.form_index = Some(index);
        self
    }

    pub fn with_uri_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.uri_variables.insert(name.into(), value.into());
        self
    }
}

/// A runtime proxy over one Thing Description.
///
/// Cheap to clone; all clones share the protocol client cache and the subscription registry.
/// Two consumed Things are equal when their TDs are equal, regardless of client state.
#[derive(Clone)]
pub struct ConsumedThing {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) servient: ServientHandle,
    pub(crate) thing: Thing,
    /// The TD id, or its title when no id is present. Used in resources and diagnostics.
    pub(crate) label: String,
    /// One protocol client per scheme, created on first demand.
    pub(crate) clients: tokio::sync::Mutex<HashMap<String, Arc<dyn ProtocolClient>>>,
    pub(crate) registry: Arc<SubscriptionRegistry>,
}

impl PartialEq for ConsumedThing {
    fn eq(&self, other: &Self) -> bool {
        self.inner.thing == other.inner.thing
    }
}

impl std::fmt::Debug for ConsumedThing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumedThing")
            .field("label", &self.inner.label)
            .field("thing", &self.inner.thing)
            .finish()
    }
}

impl ConsumedThing {
    pub(crate) fn new(servient: ServientHandle, thing: Thing) -> Self {
        let label = thing
            .id
            .clone()
            .unwrap_or_else(|| thing.title.clone());
        Self {
            inner: Arc::new(Inner {
                servient,
                thing,
                label,
                clients: tokio::sync::Mutex::new(HashMap::new()),
                registry: Arc::new(SubscriptionRegistry::new()),
            }),
        }
    }

    /// The Thing Description this proxy was built from.
    pub fn thing_description(&self) -> &Thing {
        &self.inner.thing
    }

    /// Names of the properties currently under observation.
    pub fn observed_properties(&self) -> Vec<String> {
        self.inner.registry.names(ResourceType::Property)
    }

    /// Names of the events currently subscribed.
    pub fn subscribed_events(&self) -> Vec<String> {
        self.inner.registry.names(ResourceType::Event)
    }

    /// Read one property.
    pub async fn read_property(
        &self,
        name: &str,
        options: &InteractionOptions,
    ) -> ConsumeResult<InteractionOutput> {
        let property = self.property(name)?;
        let dispatched = self
            .inner
            .dispatch(
                &property.interaction.forms,
                FormOperation::ReadProperty,
                options,
            )
            .await?;
        let resource = self.inner.resource(name, &dispatched.form);
        let content = dispatched
            .client
            .read_resource(&resource)
            .await
            .map_err(|source| ConsumeError::protocol(FormOperation::ReadProperty, source))?;
        check_declared_response(&dispatched.form, &content)?;
        Ok(InteractionOutput::new(
            content,
            Some(property.data_schema.clone()),
            self.inner.servient.codecs(),
        ))
    }

    /// Read several properties concurrently.
    ///
    /// All reads must succeed; the first failure fails the whole call and cancels the reads
    /// still in flight. No order is guaranteed among the underlying reads.
    pub async fn read_multiple_properties(
        &self,
        names: &[&str],
        options: &InteractionOptions,
    ) -> ConsumeResult<HashMap<String, InteractionOutput>> {
        let mut pending = stream::iter(names.iter().copied())
            .map(|name| async move { (name, self.read_property(name, options).await) })
            .buffer_unordered(CONCURRENT_INTERACTIONS);

        let mut outputs = HashMap::with_capacity(names.len());
        while let Some((name, result)) = pending.next().await {
            outputs.insert(name.to_string(), result?);
        }
        Ok(outputs)
    }

    /// Read every readable property.
    ///
    /// Properties for which no readable form can be dispatched are skipped with a log line
    /// rather than failing the call.
    pub async fn read_all_properties(
        &self,
        options: &InteractionOptions,
    ) -> ConsumeResult<HashMap<String, InteractionOutput>> {
        let mut readable = Vec::new();
        if let Some(properties) = &self.inner.thing.properties {
            for (name, property) in properties {
                match self
                    .inner
                    .dispatch(
                        &property.interaction.forms,
                        FormOperation::ReadProperty,
                        options,
                    )
                    .await
                {
                    Ok(_) => readable.push(name.as_str()),
                    Err(error) => warn!(
                        thing = self.inner.label.as_str(),
                        property = name.as_str(),
                        %error,
                        "property not readable, skipping"
                    ),
                }
            }
        }
        readable.sort_unstable();
        self.read_multiple_properties(&readable, options).await
    }

    /// Write one property.
    pub async fn write_property(
        &self,
        name: &str,
        input: InteractionInput,
        options: &InteractionOptions,
    ) -> ConsumeResult<()> {
        let property = self.property(name)?;
        let InteractionInput::Value(value) = input else {
            return Err(ConsumeError::UnsupportedInput {
                operation: FormOperation::WriteProperty,
            });
        };
        let dispatched = self
            .inner
            .dispatch(
                &property.interaction.forms,
                FormOperation::WriteProperty,
                options,
            )
            .await?;
        let codecs = self.inner.servient.codecs();
        let content = codecs.read().encode(&value, &dispatched.form.content_type)?;
        let resource = self.inner.resource(name, &dispatched.form);
        dispatched
            .client
            .write_resource(&resource, content)
            .await
            .map_err(|source| ConsumeError::protocol(FormOperation::WriteProperty, source))
    }

    /// Write several properties concurrently; the first failure fails the whole call.
    pub async fn write_multiple_properties(
        &self,
        values: HashMap<String, InteractionInput>,
        options: &InteractionOptions,
    ) -> ConsumeResult<()> {
        let mut pending = stream::iter(values)
            .map(|(name, input)| async move { self.write_property(&name, input, options).await })
            .buffer_unordered(CONCURRENT_INTERACTIONS);

        while let Some(result) = pending.next().await {
            result?;
        }
        Ok(())
    }

    /// Invoke an action.
    ///
    /// A missing input is sent as a null value encoded under the form's content type. The
    /// result is wrapped with the action's output schema.
    pub async fn invoke_action(
        &self,
        name: &str,
        input: Option<InteractionInput>,
        options: &InteractionOptions,
    ) -> ConsumeResult<InteractionOutput> {
        let action = self.action(name)?;
        let value = match input {
            None => Value::Null,
            Some(InteractionInput::Value(value)) => value,
            Some(InteractionInput::Stream(_)) => {
                return Err(ConsumeError::UnsupportedInput {
                    operation: FormOperation::InvokeAction,
                })
            }
        };
        let dispatched = self
            .inner
            .dispatch(
                &action.interaction.forms,
                FormOperation::InvokeAction,
                options,
            )
            .await?;
        let codecs = self.inner.servient.codecs();
        let content = codecs.read().encode(&value, &dispatched.form.content_type)?;
        let resource = self.inner.resource(name, &dispatched.form);
        let response = dispatched
            .client
            .invoke_resource(&resource, Some(content))
            .await
            .map_err(|source| ConsumeError::protocol(FormOperation::InvokeAction, source))?;
        check_declared_response(&dispatched.form, &response)?;
        Ok(InteractionOutput::new(
            response,
            action.output.clone(),
            codecs,
        ))
    }

    /// Observe a property: `on_next` receives every change notification until the stream ends
    /// or the returned [`Subscription`] is stopped.
    ///
    /// At most one observation per property may be active; a second one fails with
    /// `DuplicateSubscription`. Stream errors go to `on_error` when present and are logged
    /// otherwise; either way the subscription is torn down and the server-side resource
    /// released exactly once.
    pub async fn observe_property<F>(
        &self,
        name: &str,
        on_next: F,
        on_error: Option<OnError>,
        options: &InteractionOptions,
    ) -> ConsumeResult<Subscription>
    where
        F: Fn(InteractionOutput) + Send + Sync + 'static,
    {
        let property = self.property(name)?;
        let forms = property.interaction.forms.clone();
        let schema = property.data_schema.clone();
        self.start_listener(
            name,
            &forms,
            ResourceType::Property,
            FormOperation::ObserveProperty,
            Some(schema),
            Box::new(on_next),
            on_error,
            options,
        )
        .await
    }

    /// Subscribe to an event, push style. Semantics match [`ConsumedThing::observe_property`].
    pub async fn subscribe_event<F>(
        &self,
        name: &str,
        on_next: F,
        on_error: Option<OnError>,
        options: &InteractionOptions,
    ) -> ConsumeResult<Subscription>
    where
        F: Fn(InteractionOutput) + Send + Sync + 'static,
    {
        let event = self.event(name)?;
        let forms = event.interaction.forms.clone();
        let schema = event.data.clone();
        self.start_listener(
            name,
            &forms,
            ResourceType::Event,
            FormOperation::SubscribeEvent,
            schema,
            Box::new(on_next),
            on_error,
            options,
        )
        .await
    }

    /// Subscribe to an event, pull style.
    ///
    /// The returned stream yields one [`InteractionOutput`] per notification. Failures to set
    /// the stream up, including a duplicate subscription, surface as a single terminal error
    /// item. Dropping the stream cancels the subscription and releases the server-side
    /// resource.
    pub async fn consume_event(
        &self,
        name: &str,
        options: &InteractionOptions,
    ) -> InteractionStream {
        match self.start_event_stream(name, options).await {
            Ok(stream) => stream,
            Err(error) => Box::pin(stream::once(async move { Err(error) })),
        }
    }

    fn property(&self, name: &str) -> ConsumeResult<&crate::thing::PropertyAffordance> {
        self.inner
            .thing
            .property(name)
            .ok_or_else(|| self.missing(AffordanceKind::Property, name))
    }

    fn action(&self, name: &str) -> ConsumeResult<&crate::thing::ActionAffordance> {
        self.inner
            .thing
            .action(name)
            .ok_or_else(|| self.missing(AffordanceKind::Action, name))
    }

    fn event(&self, name: &str) -> ConsumeResult<&crate::thing::EventAffordance> {
        self.inner
            .thing
            .event(name)
            .ok_or_else(|| self.missing(AffordanceKind::Event, name))
    }

    fn missing(&self, kind: AffordanceKind, name: &str) -> ConsumeError {
        ConsumeError::MissingAffordance {
            thing: self.inner.label.clone(),
            kind,
            name: name.to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_listener(
        &self,
        name: &str,
        forms: &[Form],
        kind: ResourceType,
        operation: FormOperation,
        schema: Option<DataSchema>,
        on_next: OnNext,
        on_error: Option<OnError>,
        options: &InteractionOptions,
    ) -> ConsumeResult<Subscription> {
        let inner = &self.inner;
        let dispatched = inner.dispatch(forms, operation, options).await?;
        let augmented = dispatch::augment_forms(forms, inner.thing.base.as_deref());
        let state = SubscriptionState::new(
            kind,
            name,
            inner.label.clone(),
            augmented,
            dispatched.index,
            dispatched.form.clone(),
            operation,
            Arc::clone(&dispatched.client),
            Arc::downgrade(&inner.registry),
        );

        inner.registry.register(&state)?;

        let resource = state.resource();
        let stream = match dispatched.client.subscribe_resource(&resource, kind).await {
            Ok(stream) => stream,
            Err(source) => {
                inner.registry.remove(kind, name);
                return Err(ConsumeError::protocol(operation, source));
            }
        };

        let declared = declared_response(&dispatched.form);
        let handle = spawn_pump(
            Arc::clone(&state),
            stream,
            schema,
            declared,
            on_next,
            on_error,
            inner.servient.codecs(),
        );
        state.attach_pump(handle);
        Ok(Subscription { state })
    }

    async fn start_event_stream(
        &self,
        name: &str,
        options: &InteractionOptions,
    ) -> ConsumeResult<InteractionStream> {
        let event = self.event(name)?;
        let forms = event.interaction.forms.clone();
        let schema = event.data.clone();
        let inner = &self.inner;

        let operation = FormOperation::SubscribeEvent;
        let dispatched = inner.dispatch(&forms, operation, options).await?;
        let augmented = dispatch::augment_forms(&forms, inner.thing.base.as_deref());
        let state = SubscriptionState::new(
            ResourceType::Event,
            name,
            inner.label.clone(),
            augmented,
            dispatched.index,
            dispatched.form.clone(),
            operation,
            Arc::clone(&dispatched.client),
            Arc::downgrade(&inner.registry),
        );

        inner.registry.register(&state)?;

        let resource = state.resource();
        let mut stream = match dispatched
            .client
            .subscribe_resource(&resource, ResourceType::Event)
            .await
        {
            Ok(stream) => stream,
            Err(source) => {
                inner.registry.remove(ResourceType::Event, name);
                return Err(ConsumeError::protocol(operation, source));
            }
        };

        let declared = declared_response(&dispatched.form);
        let codecs = inner.servient.codecs();
        let pump_state = Arc::clone(&state);
        let (sender, receiver) = mpsc::channel::<ConsumeResult<InteractionOutput>>(16);
        let handle = tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    item = stream.next() => item,
                    // The consumer dropped the stream: cooperative cancellation.
                    () = sender.closed() => break,
                };
                let Some(item) = item else { break };

                let message = match item {
                    Ok(content) => check_declared_media(declared.as_deref(), &content).map(|()| {
                        InteractionOutput::new(content, schema.clone(), Arc::clone(&codecs))
                    }),
                    Err(source) => Err(ConsumeError::protocol(pump_state.operation, source)),
                };
                let terminal = message.is_err();
                if sender.send(message).await.is_err() || terminal {
                    break;
                }
            }
            finalize(&pump_state).await;
        });
        state.attach_pump(handle);

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }
}

impl Inner {
    pub(crate) fn resource(&self, name: &str, form: &Form) -> Resource {
        Resource {
            thing_id: self.label.clone(),
            name: name.to_string(),
            form: form.clone(),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.registry.abort_all();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            for (_, client) in self.clients.get_mut().drain() {
                runtime.spawn(async move {
                    let _ = client.stop().await;
                });
            }
        }
    }
}

/// The response content type a form declares, if any.
fn declared_response(form: &Form) -> Option<String> {
    form.response
        .as_ref()
        .map(|response| response.content_type.clone())
}

/// Compare declared and observed content types on their canonical forms.
fn check_declared_media(declared: Option<&str>, content: &Content) -> ConsumeResult<()> {
    let Some(declared) = declared else {
        return Ok(());
    };
    let expected = canonical_media_type(declared);
    let found = canonical_media_type(&content.media_type);
    if expected != found {
        return Err(ConsumeError::MediaTypeMismatch { expected, found });
    }
    Ok(())
}

fn check_declared_response(form: &Form, content: &Content) -> ConsumeResult<()> {
    check_declared_media(declared_response(form).as_deref(), content)
}

/// Complete a subscription from within its own pump task.
async fn finalize(state: &Arc<SubscriptionState>) {
    if let Err(error) = state.shutdown(false).await {
        warn!(name = state.name.as_str(), %error, "subscription cleanup failed");
    }
}

/// Drive a push-style subscription: deliver items in transport order, tear down on the first
/// error or on stream completion.
fn spawn_pump(
    state: Arc<SubscriptionState>,
    mut stream: ContentStream,
    schema: Option<DataSchema>,
    declared: Option<String>,
    on_next: OnNext,
    on_error: Option<OnError>,
    codecs: Arc<RwLock<CodecRegistry>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let error = match item {
                Ok(content) => match check_declared_media(declared.as_deref(), &content) {
                    Ok(()) => {
                        on_next(InteractionOutput::new(
                            content,
                            schema.clone(),
                            Arc::clone(&codecs),
                        ));
                        continue;
                    }
                    Err(error) => error,
                },
                Err(source) => ConsumeError::protocol(state.operation, source),
            };

            match &on_error {
                Some(callback) => callback(error),
                None => warn!(name = state.name.as_str(), %error, "subscription stream error"),
            }
            finalize(&state).await;
            return;
        }
        finalize(&state).await;
    })
}
