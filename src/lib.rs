//! Web of Things consumption runtime
//!
//! Turn a declarative [Thing Description](https://www.w3.org/TR/wot-thing-description11/) into a
//! live interaction surface:
//! > A Thing Description describes the metadata and interfaces of Things,
//! > where a Thing is an abstraction of a physical or virtual entity that
//! > provides interactions to and participates in the Web of Things.
//!
//! The crate relies on [serde](https://docs.rs/serde) to deserialize descriptions and exposes a
//! [`Servient`]: register a [`ProtocolClientFactory`](protocol::ProtocolClientFactory) per URI
//! scheme, [consume](servient::Servient::consume) a [`Thing`], then read, write, observe and
//! invoke through the returned [`ConsumedThing`]. Concrete protocol bindings live in their own
//! crates.

pub mod consume;
pub mod content;
pub mod error;
pub mod protocol;
pub mod security;
pub mod servient;
pub mod template;
pub mod thing;

pub use consume::ConsumedThing;
pub use servient::Servient;
pub use thing::Thing;
