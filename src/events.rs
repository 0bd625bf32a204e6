//! Events: envelopes, buses and commit-time buffering.

mod buffered;
mod bus;
mod envelope;

pub use buffered::BufferedEventBus;
pub use bus::{EventBus, EventSubscriber, InMemoryEventBus, NullEventBus};
pub use envelope::EventEnvelope;
