//! Per-rig debug event rings.
//!
//! Every byte exchanged with a rig (and every line through the listener) is
//! recorded as a [`DebugEvent`] in a bounded ring so the UI debug panes can
//! replay recent traffic. One writer per ring; readers take point-in-time
//! copies and never block the writer for long.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Default capacity of a debug ring.
pub const DEBUG_RING_CAPACITY: usize = 500;

/// Direction / origin of a recorded protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugEventKind {
    /// Command sent to a rig.
    Tx,
    /// Reply received from a rig.
    Rx,
    /// Line received by the rigctl listener from an external client.
    ServerRx,
    /// Reply written by the rigctl listener to an external client.
    ServerTx,
}

/// One recorded protocol exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugEvent {
    /// Milliseconds since the Unix epoch.
    pub ts_ms: u64,
    /// Direction / origin.
    pub kind: DebugEventKind,
    /// Human-readable meaning (e.g. "set frequency 14074000 Hz").
    pub semantic: String,
    /// The raw line(s) on the wire.
    pub payload: String,
}

/// A bounded ring of recent [`DebugEvent`]s.
///
/// Cloning the ring clones the handle, not the events; all clones feed the
/// same buffer.
#[derive(Debug, Clone)]
pub struct DebugRing {
    inner: Arc<Mutex<VecDeque<DebugEvent>>>,
    capacity: usize,
}

impl DebugRing {
    /// Create a ring with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEBUG_RING_CAPACITY)
    }

    /// Create a ring holding at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        DebugRing {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append an event, evicting the oldest when full.
    pub fn record(&self, kind: DebugEventKind, semantic: impl Into<String>, payload: impl Into<String>) {
        let event = DebugEvent {
            ts_ms: now_ms(),
            kind,
            semantic: semantic.into(),
            payload: payload.into(),
        };
        let mut ring = self.inner.lock().expect("debug ring poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// A point-in-time copy of the buffered events, oldest first.
    pub fn snapshot(&self) -> Vec<DebugEvent> {
        self.inner
            .lock()
            .expect("debug ring poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("debug ring poisoned").len()
    }

    /// Whether the ring holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DebugRing {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_snapshot() {
        let ring = DebugRing::new();
        assert!(ring.is_empty());

        ring.record(DebugEventKind::Tx, "set frequency", "\\set_freq 14074000");
        ring.record(DebugEventKind::Rx, "RPRT 0", "RPRT 0");

        let events = ring.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, DebugEventKind::Tx);
        assert_eq!(events[1].kind, DebugEventKind::Rx);
        assert!(events[0].ts_ms > 0);
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let ring = DebugRing::with_capacity(3);
        for i in 0..5 {
            ring.record(DebugEventKind::Tx, format!("event {i}"), "");
        }
        let events = ring.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].semantic, "event 2");
        assert_eq!(events[2].semantic, "event 4");
    }

    #[test]
    fn clones_share_the_buffer() {
        let ring = DebugRing::new();
        let other = ring.clone();
        other.record(DebugEventKind::ServerRx, "f", "+f");
        assert_eq!(ring.len(), 1);
    }
}
