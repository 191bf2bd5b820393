use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::event::Event;

/// Envelope for a published event: routing metadata plus the payload.
///
/// `subject_type` names the kind of record (`"listing"`, `"ledger"`, ...),
/// `subject_id` its identifier, `event_type` the stable event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    subject_type: String,
    subject_id: Uuid,
    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        subject_type: impl Into<String>,
        subject_id: Uuid,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            subject_type: subject_type.into(),
            subject_id,
            event_type: event_type.into(),
            event_version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn subject_id(&self) -> Uuid {
        self.subject_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event, serializing it to a JSON payload.
    pub fn from_event<E>(subject_type: impl Into<String>, event: &E) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            Uuid::now_v7(),
            subject_type,
            event.subject_id(),
            event.event_type(),
            event.version(),
            event.occurred_at(),
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Pinged {
        id: Uuid,
        at: DateTime<Utc>,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }

        fn subject_id(&self) -> Uuid {
            self.id
        }
    }

    #[test]
    fn from_event_copies_metadata_and_serializes_payload() {
        let event = Pinged {
            id: Uuid::now_v7(),
            at: Utc::now(),
        };

        let envelope = EventEnvelope::from_event("test", &event).unwrap();

        assert_eq!(envelope.subject_type(), "test");
        assert_eq!(envelope.subject_id(), event.id);
        assert_eq!(envelope.event_type(), "test.pinged");
        assert_eq!(envelope.event_version(), 2);
        assert_eq!(envelope.occurred_at(), event.at);
        assert_eq!(envelope.payload()["id"], serde_json::json!(event.id));
    }
}
