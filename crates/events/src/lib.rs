//! Domain events emitted by marketplace operations and the bus that carries them.
//!
//! Events are published only after the transaction that produced them has
//! committed, so a subscriber never observes a change that was rolled back.

pub mod bus;
pub mod envelope;
pub mod event;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
