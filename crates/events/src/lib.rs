//! Lifecycle event plumbing: the event contract, the envelope that carries it,
//! and a broadcast bus for distributing it to interested components.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
