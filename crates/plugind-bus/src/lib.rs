//! Progress events and their AMQP publisher.
//!
//! Every state transition of an install or uninstall pipeline is mirrored
//! on the message bus as a typed event keyed by the request uuid.
//! Consumers reconstruct a request's stream from that key; ordering is
//! only guaranteed within one uuid.

pub mod events;
pub mod publisher;

pub use events::{ProgressError, ProgressEvent};
pub use publisher::{BusPublisher, InMemoryPublisher, ProgressPublisher};
