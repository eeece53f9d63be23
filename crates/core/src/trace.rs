//! Glue between kernel components and `ptides-trace`.

pub use ptides_trace::{records, RecordBuilder, TraceError, TraceHook};

use crate::event::Event;
use crate::tag::Tag;

pub type TraceResult = Result<(), TraceError>;

/// Emits a record through an optional hook, ignoring backend failures.
pub fn emit(trace: &Option<TraceHook>, record: u8, payload: &[u8], timestamp: bool) {
    if let Some(trace) = trace {
        if let Err(err) = trace(record, payload, timestamp) {
            log::trace!("trace record {record} dropped: {err}");
        }
    }
}

pub fn tag_fields(builder: RecordBuilder, tag: Tag) -> RecordBuilder {
    builder.tag(tag.timestamp.ticks(), tag.microstep)
}

/// `[event id, tag]` payload shared by queue and oracle records.
pub fn event_payload(event: &Event) -> Vec<u8> {
    tag_fields(
        RecordBuilder::with_capacity(24).i64(event.id().raw() as i64),
        event.tag(),
    )
    .finish()
}
