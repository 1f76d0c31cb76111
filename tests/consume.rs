//! End-to-end interaction scenarios against an in-memory protocol binding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::json;
use wot_consume::consume::{InteractionInput, InteractionOptions};
use wot_consume::content::Content;
use wot_consume::error::{ConsumeError, ProtocolError};
use wot_consume::protocol::{
    ContentStream, ProtocolClient, ProtocolClientFactory, Resource, ResourceType,
};
use wot_consume::security::{BasicCredentials, Credentials};
use wot_consume::{Servient, Thing};

/// Everything the mock binding observed, asserted after the fact.
#[derive(Default)]
struct Recorder {
    clients_created: Vec<String>,
    reads: Vec<String>,
    writes: Vec<(String, Vec<u8>)>,
    unlinks: Vec<(String, String, ResourceType)>,
    credential_kinds: Vec<Option<String>>,
}

#[derive(Clone)]
enum StreamSpec {
    /// Deliver these items, then end the stream.
    Items(Vec<Result<Content, String>>),
    /// Stay silent forever.
    Pending,
}

#[derive(Clone, Default)]
struct MockConfig {
    reads: HashMap<String, Content>,
    invokes: HashMap<String, Content>,
    streams: HashMap<String, StreamSpec>,
}

struct MockClient {
    config: MockConfig,
    recorder: Arc<Mutex<Recorder>>,
    provider: Option<wot_consume::security::CredentialsProvider>,
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn read_resource(&self, resource: &Resource) -> Result<Content, ProtocolError> {
        let mut recorder = self.recorder.lock().unwrap();
        recorder.reads.push(resource.form.href.clone());
        if let Some(provider) = &self.provider {
            let kind = provider
                .credentials_for(&resource.form)
                .ok()
                .flatten()
                .map(|credentials| credentials.kind().to_string());
            recorder.credential_kinds.push(kind);
        }
        drop(recorder);

        self.config
            .reads
            .get(&resource.name)
            .cloned()
            .ok_or_else(|| ProtocolError::new(format!("no such resource {}", resource.name)))
    }

    async fn write_resource(
        &self,
        resource: &Resource,
        content: Content,
    ) -> Result<(), ProtocolError> {
        self.recorder
            .lock()
            .unwrap()
            .writes
            .push((resource.name.clone(), content.body.to_vec()));
        Ok(())
    }

    async fn invoke_resource(
        &self,
        resource: &Resource,
        _content: Option<Content>,
    ) -> Result<Content, ProtocolError> {
        self.config
            .invokes
            .get(&resource.name)
            .cloned()
            .ok_or_else(|| ProtocolError::new(format!("no such action {}", resource.name)))
    }

    async fn subscribe_resource(
        &self,
        resource: &Resource,
        _kind: ResourceType,
    ) -> Result<ContentStream, ProtocolError> {
        match self.config.streams.get(&resource.name) {
            Some(StreamSpec::Items(items)) => {
                let items: Vec<Result<Content, ProtocolError>> = items
                    .clone()
                    .into_iter()
                    .map(|item| item.map_err(ProtocolError::new))
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Some(StreamSpec::Pending) => Ok(Box::pin(stream::pending())),
            None => Err(ProtocolError::new(format!(
                "no stream for {}",
                resource.name
            ))),
        }
    }

    async fn unlink_resource(
        &self,
        resource: &Resource,
        kind: ResourceType,
    ) -> Result<(), ProtocolError> {
        self.recorder.lock().unwrap().unlinks.push((
            resource.name.clone(),
            resource.form.href.clone(),
            kind,
        ));
        Ok(())
    }

    fn set_credentials_provider(
        &mut self,
        provider: wot_consume::security::CredentialsProvider,
    ) {
        self.provider = Some(provider);
    }
}

struct MockFactory {
    scheme: String,
    config: MockConfig,
    recorder: Arc<Mutex<Recorder>>,
}

impl ProtocolClientFactory for MockFactory {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn create_client(&self) -> Box<dyn ProtocolClient> {
        self.recorder
            .lock()
            .unwrap()
            .clients_created
            .push(self.scheme.clone());
        Box::new(MockClient {
            config: self.config.clone(),
            recorder: Arc::clone(&self.recorder),
            provider: None,
        })
    }
}

fn servient_with(scheme: &str, config: MockConfig) -> (Servient, Arc<Mutex<Recorder>>) {
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let mut servient = Servient::new();
    servient.add_client_factory(Box::new(MockFactory {
        scheme: scheme.to_string(),
        config,
        recorder: Arc::clone(&recorder),
    }));
    (servient, recorder)
}

fn td(raw: serde_json::Value) -> Thing {
    serde_json::from_value(raw).unwrap()
}

fn json_content(value: serde_json::Value) -> Content {
    Content::new("application/json", serde_json::to_vec(&value).unwrap())
}

async fn settled(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not settled in time");
}

#[tokio::test]
async fn basic_read() {
    let mut config = MockConfig::default();
    config
        .reads
        .insert("temp".to_string(), json_content(json!({"value": 42})));
    let (servient, _recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Sensor",
        "properties": {
            "temp": {
                "type": "object",
                "forms": [{
                    "href": "http://h/temp",
                    "op": "readproperty",
                    "contentType": "application/json"
                }]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let output = thing
        .read_property("temp", &InteractionOptions::default())
        .await
        .unwrap();
    assert_eq!(output.value().unwrap(), json!({"value": 42}));
}

#[tokio::test]
async fn observe_auto_cleanup_on_error() {
    let mut config = MockConfig::default();
    config.streams.insert(
        "p".to_string(),
        StreamSpec::Items(vec![
            Ok(json_content(json!("a"))),
            Err("transport failed".to_string()),
        ]),
    );
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Observable",
        "properties": {
            "p": {
                "type": "string",
                "observable": true,
                "forms": [{
                    "href": "http://h/p",
                    "op": ["observeproperty", "unobserveproperty"]
                }]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen_tx = Arc::clone(&seen);
    let errors_tx = Arc::clone(&errors);

    let subscription = thing
        .observe_property(
            "p",
            move |output| {
                seen_tx.lock().unwrap().push(output.value().unwrap());
            },
            Some(Box::new(move |error| {
                errors_tx.lock().unwrap().push(error.to_string());
            })),
            &InteractionOptions::default(),
        )
        .await
        .unwrap();

    settled(|| {
        !errors.lock().unwrap().is_empty() && thing.observed_properties().is_empty()
    })
    .await;

    assert_eq!(*seen.lock().unwrap(), vec![json!("a")]);
    assert!(!subscription.active());

    let unlinks = recorder.lock().unwrap().unlinks.clone();
    assert_eq!(unlinks.len(), 1);
    assert_eq!(unlinks[0].0, "p");
    assert_eq!(unlinks[0].2, ResourceType::Property);

    // A late stop is a no-op: no second unlink.
    subscription.stop().await.unwrap();
    assert_eq!(recorder.lock().unwrap().unlinks.len(), 1);
}

#[tokio::test]
async fn duplicate_subscription_leaves_first_untouched() {
    let mut config = MockConfig::default();
    config
        .streams
        .insert("e".to_string(), StreamSpec::Pending);
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Emitter",
        "events": {
            "e": {
                "data": {"type": "string"},
                "forms": [{
                    "href": "http://h/e",
                    "op": ["subscribeevent", "unsubscribeevent"]
                }]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let first = thing
        .subscribe_event("e", |_| {}, None, &InteractionOptions::default())
        .await
        .unwrap();

    let err = thing
        .subscribe_event("e", |_| {}, None, &InteractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumeError::DuplicateSubscription { .. }));

    assert!(first.active());
    assert_eq!(thing.subscribed_events(), ["e"]);
    assert!(recorder.lock().unwrap().unlinks.is_empty());

    first.stop().await.unwrap();
    assert!(thing.subscribed_events().is_empty());
    assert_eq!(recorder.lock().unwrap().unlinks.len(), 1);
}

#[tokio::test]
async fn scheme_preference_skips_factoryless_schemes() {
    let mut config = MockConfig::default();
    config
        .reads
        .insert("temp".to_string(), json_content(json!(21)));
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Sensor",
        "properties": {
            "temp": {
                "type": "number",
                "forms": [
                    {"href": "coap://h/temp", "op": "readproperty"},
                    {"href": "http://h/temp", "op": "readproperty"}
                ]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let output = thing
        .read_property("temp", &InteractionOptions::default())
        .await
        .unwrap();
    assert_eq!(output.value().unwrap(), json!(21));

    let recorder = recorder.lock().unwrap();
    assert_eq!(recorder.clients_created, ["http"]);
    assert_eq!(recorder.reads, ["http://h/temp"]);
}

#[tokio::test]
async fn credentials_installed_on_client_creation() {
    let mut config = MockConfig::default();
    config
        .reads
        .insert("status".to_string(), json_content(json!("ok")));
    let (servient, recorder) = servient_with("https", config);
    servient.add_credentials(
        "https://example.com/device1",
        Credentials::Basic(BasicCredentials {
            username: "u".to_string(),
            password: "p".to_string(),
        }),
    );

    let thing = servient.consume(td(json!({
        "title": "Device",
        "properties": {
            "status": {
                "type": "string",
                "forms": [{"href": "https://example.com/device1/status", "op": "readproperty"}]
            }
        },
        "securityDefinitions": {"basic_sc": {"scheme": "basic"}},
        "security": "basic_sc"
    })));

    thing
        .read_property("status", &InteractionOptions::default())
        .await
        .unwrap();

    let kinds = recorder.lock().unwrap().credential_kinds.clone();
    assert_eq!(kinds, [Some("BasicCredentials".to_string())]);
}

#[tokio::test]
async fn unsubscribe_uses_scored_form() {
    let mut config = MockConfig::default();
    config
        .streams
        .insert("q".to_string(), StreamSpec::Pending);
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Scored",
        "properties": {
            "q": {
                "type": "string",
                "observable": true,
                "forms": [
                    {"href": "http://h/q/sub", "op": "observeproperty"},
                    {"href": "http://h/q/unsub", "op": "unobserveproperty"}
                ]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let subscription = thing
        .observe_property("q", |_| {}, None, &InteractionOptions::default())
        .await
        .unwrap();
    subscription.stop().await.unwrap();

    let unlinks = recorder.lock().unwrap().unlinks.clone();
    assert_eq!(unlinks.len(), 1);
    assert_eq!(unlinks[0].1, "http://h/q/unsub");
    assert!(thing.observed_properties().is_empty());
}

#[tokio::test]
async fn consume_event_pull_stream_completes_and_cleans_up() {
    let mut config = MockConfig::default();
    config.streams.insert(
        "tick".to_string(),
        StreamSpec::Items(vec![
            Ok(json_content(json!(1))),
            Ok(json_content(json!(2))),
        ]),
    );
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Ticker",
        "events": {
            "tick": {
                "data": {"type": "integer"},
                "forms": [{
                    "href": "http://h/tick",
                    "op": ["subscribeevent", "unsubscribeevent"]
                }]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let outputs: Vec<_> = thing
        .consume_event("tick", &InteractionOptions::default())
        .await
        .collect()
        .await;

    assert_eq!(outputs.len(), 2);
    let values: Vec<_> = outputs
        .into_iter()
        .map(|output| output.unwrap().value().unwrap())
        .collect();
    assert_eq!(values, [json!(1), json!(2)]);

    settled(|| thing.subscribed_events().is_empty()).await;
    assert_eq!(recorder.lock().unwrap().unlinks.len(), 1);
}

#[tokio::test]
async fn duplicate_consume_event_errors_without_unlinking() {
    let mut config = MockConfig::default();
    config
        .streams
        .insert("tick".to_string(), StreamSpec::Pending);
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Ticker",
        "events": {
            "tick": {
                "data": {"type": "integer"},
                "forms": [{
                    "href": "http://h/tick",
                    "op": ["subscribeevent", "unsubscribeevent"]
                }]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let _first = thing
        .consume_event("tick", &InteractionOptions::default())
        .await;

    let second: Vec<_> = thing
        .consume_event("tick", &InteractionOptions::default())
        .await
        .collect()
        .await;
    assert_eq!(second.len(), 1);
    assert!(matches!(
        second[0],
        Err(ConsumeError::DuplicateSubscription { .. })
    ));

    assert_eq!(thing.subscribed_events(), ["tick"]);
    assert!(recorder.lock().unwrap().unlinks.is_empty());
}

#[tokio::test]
async fn write_property_encodes_under_form_content_type() {
    let (servient, recorder) = servient_with("http", MockConfig::default());

    let thing = servient.consume(td(json!({
        "title": "Lamp",
        "properties": {
            "brightness": {
                "type": "integer",
                "forms": [{"href": "http://h/brightness", "op": "writeproperty"}]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    thing
        .write_property(
            "brightness",
            InteractionInput::value(80),
            &InteractionOptions::default(),
        )
        .await
        .unwrap();

    let writes = recorder.lock().unwrap().writes.clone();
    assert_eq!(writes, [("brightness".to_string(), b"80".to_vec())]);

    // Streaming inputs have no encoding path here.
    let err = thing
        .write_property(
            "brightness",
            InteractionInput::Stream(Box::pin(stream::empty())),
            &InteractionOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumeError::UnsupportedInput { .. }));
}

#[tokio::test]
async fn invoke_action_wraps_output_and_checks_media_type() {
    let mut config = MockConfig::default();
    config
        .invokes
        .insert("fade".to_string(), json_content(json!({"took_ms": 120})));
    config
        .invokes
        .insert("mismatch".to_string(), json_content(json!(0)));
    let (servient, _recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Lamp",
        "actions": {
            "fade": {
                "output": {"type": "object"},
                "forms": [{"href": "http://h/fade", "op": "invokeaction"}]
            },
            "mismatch": {
                "forms": [{
                    "href": "http://h/mismatch",
                    "op": "invokeaction",
                    "response": {"contentType": "application/cbor"}
                }]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let output = thing
        .invoke_action("fade", None, &InteractionOptions::default())
        .await
        .unwrap();
    assert_eq!(output.value().unwrap(), json!({"took_ms": 120}));

    let err = thing
        .invoke_action("mismatch", None, &InteractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConsumeError::MediaTypeMismatch { ref expected, ref found }
            if expected == "application/cbor" && found == "application/json"
    ));
}

#[tokio::test]
async fn read_multiple_and_read_all_properties() {
    let mut config = MockConfig::default();
    config
        .reads
        .insert("a".to_string(), json_content(json!(1)));
    config
        .reads
        .insert("b".to_string(), json_content(json!(2)));
    let (servient, _recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Multi",
        "properties": {
            "a": {
                "type": "integer",
                "forms": [{"href": "http://h/a", "op": "readproperty"}]
            },
            "b": {
                "type": "integer",
                "forms": [{"href": "http://h/b", "op": "readproperty"}]
            },
            "writeonly": {
                "type": "integer",
                "forms": [{"href": "http://h/w", "op": "writeproperty"}]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let outputs = thing
        .read_multiple_properties(&["a", "b"], &InteractionOptions::default())
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs["a"].value().unwrap(), json!(1));
    assert_eq!(outputs["b"].value().unwrap(), json!(2));

    // readAllProperties drops the write-only property instead of failing.
    let outputs = thing
        .read_all_properties(&InteractionOptions::default())
        .await
        .unwrap();
    let mut names: Vec<_> = outputs.keys().cloned().collect();
    names.sort();
    assert_eq!(names, ["a", "b"]);
}

#[tokio::test]
async fn read_multiple_fails_as_a_whole() {
    let mut config = MockConfig::default();
    config
        .reads
        .insert("a".to_string(), json_content(json!(1)));
    let (servient, _recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Multi",
        "properties": {
            "a": {
                "type": "integer",
                "forms": [{"href": "http://h/a", "op": "readproperty"}]
            },
            "broken": {
                "type": "integer",
                "forms": [{"href": "http://h/broken", "op": "readproperty"}]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let err = thing
        .read_multiple_properties(&["a", "broken"], &InteractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumeError::Protocol { .. }));
}

#[tokio::test]
async fn uri_variables_expand_the_form_href() {
    let mut config = MockConfig::default();
    config
        .reads
        .insert("cell".to_string(), json_content(json!(7)));
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Grid",
        "properties": {
            "cell": {
                "type": "integer",
                "uriVariables": {"row": {"type": "integer"}},
                "forms": [{"href": "http://h/cells/{row}", "op": "readproperty"}]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let options = InteractionOptions::default().with_uri_variable("row", "3");
    thing.read_property("cell", &options).await.unwrap();

    assert_eq!(recorder.lock().unwrap().reads, ["http://h/cells/3"]);
}

#[tokio::test]
async fn explicit_form_index_bypasses_scheme_preference() {
    let mut config = MockConfig::default();
    config
        .reads
        .insert("temp".to_string(), json_content(json!(20)));
    let (servient, recorder) = servient_with("http", config);

    let thing = servient.consume(td(json!({
        "title": "Sensor",
        "properties": {
            "temp": {
                "type": "number",
                "forms": [
                    {"href": "http://h/temp", "op": "readproperty"},
                    {"href": "http://h/temp-alt", "op": "readproperty"}
                ]
            }
        },
        "securityDefinitions": {"nosec": {"scheme": "nosec"}},
        "security": "nosec"
    })));

    let options = InteractionOptions::default().with_form_index(1);
    thing.read_property("temp", &options).await.unwrap();

    assert_eq!(recorder.lock().unwrap().reads, ["http://h/temp-alt"]);
}
