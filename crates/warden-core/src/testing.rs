//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::event::{AggregateType, Event, EventType};

pub const INSTANCE_ID: &str = "instance-id";
pub const AGGREGATE_ID: &str = "agg-id";
pub const RESOURCE_OWNER: &str = "ro-id";

/// Creation date of every fixture event.
pub fn creation_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// An event with fixed identifiers, sequence 15 and previous sequence 10.
pub fn test_event(event_type: EventType, aggregate_type: AggregateType, payload: &[u8]) -> Event {
    Event {
        instance_id: INSTANCE_ID.into(),
        aggregate_type: aggregate_type.as_str().into(),
        aggregate_id: AGGREGATE_ID.into(),
        resource_owner: RESOURCE_OWNER.into(),
        event_type: event_type.as_str().into(),
        sequence: 15,
        previous_sequence: 10,
        creation_date: creation_date(),
        payload: payload.to_vec(),
    }
}

/// An event of a type no reducer handles.
pub fn base_event() -> Event {
    Event {
        event_type: "base.event".into(),
        ..test_event(EventType::ApplicationAdded, AggregateType::Project, b"{}")
    }
}

/// An event of `aggregate_id` at the given position in the stream.
pub fn sequenced(
    event_type: EventType,
    aggregate_id: &str,
    sequence: u64,
    previous_sequence: u64,
    payload: &[u8],
) -> Event {
    Event {
        aggregate_id: aggregate_id.into(),
        sequence,
        previous_sequence,
        ..test_event(event_type, event_type.aggregate_type(), payload)
    }
}

/// An initialised in-memory engine with every built-in projection.
pub fn engine(config: crate::config::SchedulerConfig) -> crate::scheduler::EngineContext {
    let db = crate::db::Database::in_memory().unwrap();
    let registry = crate::projection::default_registry().unwrap();
    let ctx = crate::scheduler::EngineContext::new(db, registry, config);
    ctx.initialize().unwrap();
    ctx
}
