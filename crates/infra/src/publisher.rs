//! Post-commit event publication.
//!
//! Services record events into an [`Outbox`] while the transaction runs. The
//! outbox is flushed to the [`EventPublisher`] only after a successful commit
//! and discarded otherwise, so subscribers never see rolled-back changes.
//! Publication is best-effort: a failing bus is logged, never surfaced.

use std::convert::Infallible;
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use propmarket_events::{Event, EventBus, EventEnvelope, Subscription};

pub trait EventPublisher: Send + Sync {
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>);
}

/// In-process broadcast of committed envelopes.
///
/// Every subscription gets its own copy of each envelope published after it
/// subscribed. A subscription whose receiver was dropped is forgotten on the
/// next publish.
#[derive(Debug, Default)]
pub struct EnvelopeBus {
    subscribers: Mutex<Vec<Sender<EventEnvelope<JsonValue>>>>,
}

impl EnvelopeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Deliver to every live subscriber; returns how many received it.
    fn broadcast(&self, envelope: &EventEnvelope<JsonValue>) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        subscribers.len()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Sender<EventEnvelope<JsonValue>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventBus<EventEnvelope<JsonValue>> for EnvelopeBus {
    type Error = Infallible;

    fn publish(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        self.broadcast(&envelope);
        Ok(())
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers().push(tx);
        Subscription::new(rx)
    }
}

impl EventPublisher for EnvelopeBus {
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>) {
        let delivered = self.broadcast(&envelope);
        debug!(event_type = envelope.event_type(), delivered, "event published");
    }
}

/// Events decided inside a transaction, waiting for the commit.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<EventEnvelope<JsonValue>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<E>(&mut self, subject_type: &str, event: &E)
    where
        E: Event + Serialize,
    {
        match EventEnvelope::from_event(subject_type, event) {
            Ok(envelope) => self.pending.push(envelope),
            Err(error) => {
                warn!(event_type = event.event_type(), %error, "event serialization failed")
            }
        }
    }

    pub fn record_all<'a, E>(&mut self, subject_type: &str, events: impl IntoIterator<Item = &'a E>)
    where
        E: Event + Serialize,
    {
        for event in events {
            self.record(subject_type, event);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn flush(self, publisher: &dyn EventPublisher) {
        for envelope in self.pending {
            publisher.publish_envelope(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use propmarket_core::{AccountId, BalanceId, Credits};
    use propmarket_ledger::CreditBalance;

    #[test]
    fn flushed_envelopes_reach_subscribers_in_order() {
        let bus = EnvelopeBus::new();
        let sub = bus.subscribe();

        let mut balance = CreditBalance::open(BalanceId::new(), AccountId::new(), Utc::now());
        let credited = balance.credit(Credits::whole(10), Utc::now()).unwrap();
        let debited = balance.debit(Credits::whole(4), Utc::now()).unwrap();

        let mut outbox = Outbox::new();
        outbox.record_all("ledger", [&credited, &debited]);
        assert_eq!(outbox.len(), 2);
        assert!(sub.drain().is_empty());

        outbox.flush(&bus);

        let types: Vec<String> = sub
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(types, vec!["ledger.credited", "ledger.debited"]);
    }

    #[test]
    fn dropped_subscriptions_stop_receiving() {
        let bus = EnvelopeBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        let mut balance = CreditBalance::open(BalanceId::new(), AccountId::new(), Utc::now());
        let mut outbox = Outbox::new();
        outbox.record("ledger", &balance.credit(Credits::whole(3), Utc::now()).unwrap());
        outbox.flush(&bus);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.drain().len(), 1);
    }
}
