//! Bounded, non-blocking audit channel
//!
//! A `tokio::sync::mpsc` channel sized from a byte budget. `emit` uses
//! `try_send` and never waits: if the channel is full or the consumer is
//! gone, the record is dropped and counted. Producer contention never
//! causes a drop.
//!
//! ```text
//!  evaluate() ──try_send──► ┌──────────────────────────┐ ──recv──► consumer
//!  evaluate() ──try_send──► │  mpsc::channel(slots)    │
//!  evaluate() ──try_send──► └──────────────────────────┘
//!                             Full | Closed → dropped += 1
//! ```
//!
//! The reporter keeps one strong `Sender` for as long as the channel is
//! open and emits through a `WeakSender`, so `close` only has to drop the
//! strong handle for the consumer to see the end of the stream.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::record::{EventRecord, OPEN_EVENT_SIZE};
use crate::metrics;

/// Default channel budget, 256 KiB worth of records
pub const DEFAULT_EVENT_BUFFER_BYTES: usize = 256 * 1024;

/// Producer side, owned by the decision engine
pub struct EventReporter {
    tx: mpsc::WeakSender<EventRecord>,
    open: Mutex<Option<mpsc::Sender<EventRecord>>>,
    slots: usize,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

/// Consumer side, handed to the audit collaborator
pub struct EventConsumer {
    rx: mpsc::Receiver<EventRecord>,
}

/// Number of records a byte budget holds (at least one)
pub fn slots_for_budget(budget_bytes: usize) -> usize {
    (budget_bytes / OPEN_EVENT_SIZE).max(1)
}

/// Create a reporter/consumer pair with room for `budget_bytes` of records
pub fn channel(budget_bytes: usize) -> (EventReporter, EventConsumer) {
    let slots = slots_for_budget(budget_bytes);
    let (tx, rx) = mpsc::channel(slots);

    (
        EventReporter {
            tx: tx.downgrade(),
            open: Mutex::new(Some(tx)),
            slots,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        },
        EventConsumer { rx },
    )
}

impl EventReporter {
    /// Queue `record`. Returns false if it was dropped.
    pub fn emit(&self, record: EventRecord) -> bool {
        let sent = match self.tx.upgrade() {
            Some(tx) => match tx.try_send(record) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
            },
            None => false,
        };

        if sent {
            self.emitted.fetch_add(1, Ordering::Relaxed);
            metrics::EVENTS_EMITTED.inc();
        } else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::EVENTS_DROPPED.inc();
            if dropped.is_power_of_two() {
                tracing::warn!(dropped, slots = self.slots, "audit events dropped");
            }
        }
        sent
    }

    /// Stop accepting records. The consumer still drains what is queued.
    pub fn close(&self) {
        self.open.lock().take();
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn slots(&self) -> usize {
        self.slots
    }
}

impl EventConsumer {
    /// Next queued record, without waiting
    pub fn try_recv(&mut self) -> Option<EventRecord> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next record. Returns `None` once the reporter is closed
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        self.rx.recv().await
    }

    /// Take up to `max` queued records
    pub fn drain(&mut self, max: usize) -> Vec<EventRecord> {
        let mut records = Vec::with_capacity(max.min(self.rx.len()));
        while records.len() < max {
            match self.rx.try_recv() {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }
        records
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}
