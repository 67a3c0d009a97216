//! Audit events
//!
//! Every evaluated open produces at most one `EventRecord`. Records go
//! through a bounded channel that never makes the decision path wait; a record
//! that does not fit is dropped and counted.

pub mod record;
pub mod reporter;

pub use record::{
    BlockedEvent, EventDecodeError, EventRecord, OpenEvent, COMM_LEN, FILENAME_LEN,
    OPEN_EVENT_SIZE,
};
pub use reporter::{channel, EventConsumer, EventReporter, DEFAULT_EVENT_BUFFER_BYTES};
