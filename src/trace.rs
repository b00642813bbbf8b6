//! Per-thread append-only event trace, merged into a single
//! Chrome-trace-compatible JSON array at teardown.
//!
//! Grounded on SPEC_FULL §2/§9's generalisation of
//! `original_source/ufo/ufo-scheduler.c`'s ad hoc `trace()` calls into
//! structured events: each worker accumulates into its own `Vec`
//! (`Arc<Mutex<Vec<Event>>>` per node, matching the teacher's
//! `dataflow_graph.rs` per-node bookkeeping shape), and the scheduler
//! merges + sorts by timestamp once every worker has joined — no global
//! mutable state is touched while workers are running (§5).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A single Chrome-trace "complete" event (`ph: "X"`), covering one
/// `process`/`generate` call or one blocking wait.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: String,
    pub cat: String,
    pub ph: &'static str,
    pub ts: u64,
    pub dur: u64,
    pub pid: u32,
    pub tid: String,
}

/// Per-worker append-only buffer. Cloning shares the same backing
/// `Vec` (via `Arc<Mutex<_>>`) so `TraceHandle::for_node` can hand out
/// cheap handles without the scheduler needing to collect anything
/// until after every worker has joined.
#[derive(Clone)]
pub struct Trace {
    epoch: Arc<Instant>,
    events: Arc<Mutex<Vec<Event>>>,
    seq: Arc<AtomicU64>,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            epoch: Arc::new(Instant::now()),
            events: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn handle_for(&self, node: &str) -> TraceHandle {
        TraceHandle {
            node: node.to_string(),
            trace: self.clone(),
        }
    }

    fn record(&self, node: &str, name: &str, cat: &str, start: Instant, dur_micros: u64) {
        let ts = start.duration_since(*self.epoch).as_micros() as u64;
        self.seq.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            name: name.to_string(),
            cat: cat.to_string(),
            ph: "X",
            ts,
            dur: dur_micros,
            pid: 1,
            tid: node.to_string(),
        };
        self.events.lock().expect("trace mutex poisoned").push(event);
    }

    /// Merge all recorded events, sorted by timestamp, into a Chrome
    /// trace JSON document.
    pub fn to_json(&self) -> serde_json::Value {
        let mut events = self.events.lock().expect("trace mutex poisoned").clone();
        events.sort_by_key(|e| e.ts);
        serde_json::json!({ "traceEvents": events })
    }

    pub fn write_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = self.to_json();
        std::fs::write(path, serde_json::to_vec_pretty(&json)?)
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

/// A node-scoped handle into a shared [`Trace`], used by the scheduler
/// to time one worker's calls without any cross-thread lock contention
/// beyond the final push.
pub struct TraceHandle {
    node: String,
    trace: Trace,
}

impl TraceHandle {
    /// Time `f`, recording one event named `name` under category `cat`.
    pub fn timed<R>(&self, name: &str, cat: &str, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        let dur = start.elapsed().as_micros() as u64;
        self.trace.record(&self.node, name, cat, start, dur);
        result
    }
}
