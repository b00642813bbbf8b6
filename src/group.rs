//! Group: the queue fabric realising one producer's outgoing edge (or
//! broadcast fan-out) to its consumers.
//!
//! Grounded on `ufo_group`'s two-sided free/full queue per target and
//! lazy pool growth up to `|targets|`. The original's out-of-band EOS
//! sentinel (a tagged pointer value) is replaced with a typed
//! `Item::Eos` variant sent down the same channel as real buffers. The
//! free side's storage and allocation accounting is delegated to
//! `BufferPool`; a small bounded "doorbell" channel of `()` tokens
//! signals the producer when a buffer becomes available, since the pool
//! itself can't block a waiting receiver.
//!
//! Blocking waits poll a shared cancellation flag on a short timeout,
//! the same shutdown-flag idiom the teacher's `node_task.rs` /
//! `dataflow_graph.rs` use to unblock threads parked on a channel recv
//! once the run is being torn down.

use crate::buffer::{Buffer, Layout, Requisition};
use crate::buffer_pool::BufferPool;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPattern {
    Scatter,
    Broadcast,
}

#[derive(Debug)]
pub enum Item<T> {
    Buffer(T),
    Eos,
}

struct Target {
    full_tx: Sender<Item<Buffer>>,
    full_rx: Receiver<Item<Buffer>>,
    input_port: u32,
}

/// One `Group` per producer. `targets.len()` bounds both the send
/// pattern's fan-out and the number of buffers ever in circulation for
/// this edge.
pub struct Group {
    pattern: SendPattern,
    targets: Vec<Target>,
    pool: BufferPool,
    doorbell_tx: Sender<()>,
    doorbell_rx: Receiver<()>,
    created: AtomicUsize,
    cursor: AtomicUsize,
    cancel: Arc<AtomicBool>,
}

impl Group {
    /// `targets` is the ordered list of `(input_port)` values for each
    /// consumer of this producer, in registration order (scatter cycles
    /// through them in this order). `cancel` is shared across every
    /// group in a run; setting it unblocks any thread parked in
    /// `pop_output`/`pop_input`, used to tear down a pipeline after a
    /// worker error.
    pub fn new(pattern: SendPattern, targets: &[u32], layout: Layout, cancel: Arc<AtomicBool>) -> Self {
        let n = targets.len().max(1);
        let pool = BufferPool::new(layout, n);
        let (doorbell_tx, doorbell_rx) = channel::bounded(n);
        let targets = targets
            .iter()
            .map(|&input_port| {
                let (full_tx, full_rx) = channel::unbounded();
                Target {
                    full_tx,
                    full_rx,
                    input_port,
                }
            })
            .collect();
        Self {
            pattern,
            targets,
            pool,
            doorbell_tx,
            doorbell_rx,
            created: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            cancel,
        }
    }

    pub fn n_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn pattern(&self) -> SendPattern {
        self.pattern
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Producer side. Grows the pool (by at most one buffer) if fewer
    /// than `n_targets` buffers have ever been created, then waits for a
    /// free buffer and resizes it to `requisition` if needed. Returns
    /// `None` if the run is cancelled while waiting.
    pub fn pop_output(&self, requisition: &Requisition) -> Option<Buffer> {
        let cap = self.targets.len().max(1);
        if self.created.load(Ordering::Relaxed) < cap {
            let prior = self.created.fetch_add(1, Ordering::Relaxed);
            if prior < cap {
                self.pool.seed(Buffer::new(requisition.clone(), self.pool.layout()));
                // Capacity was reserved up front, so this never blocks.
                let _ = self.doorbell_tx.send(());
            }
        }
        loop {
            if self.cancelled() {
                return None;
            }
            match self.doorbell_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) => {
                    if let Some(buf) = self.pool.try_acquire(requisition) {
                        return Some(buf);
                    }
                    // A concurrent cancel drained the doorbell racily; keep polling.
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Producer side. Routes `buf` to one (scatter) or all (broadcast)
    /// targets.
    pub fn push_output(&self, buf: Buffer) {
        match self.pattern {
            SendPattern::Scatter => {
                if self.targets.is_empty() {
                    return;
                }
                let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.targets.len();
                let _ = self.targets[idx].full_tx.send(Item::Buffer(buf));
            }
            SendPattern::Broadcast => {
                let (last, rest) = match self.targets.split_last() {
                    Some(split) => split,
                    None => return,
                };
                for target in rest {
                    let _ = target.full_tx.send(Item::Buffer(buf.clone()));
                }
                let _ = last.full_tx.send(Item::Buffer(buf));
            }
        }
    }

    /// Consumer side. Waits until the producer pushes a buffer or
    /// finishes, or the run is cancelled; `None` means no more input.
    pub fn pop_input(&self, target_idx: usize) -> Option<Buffer> {
        loop {
            if self.cancelled() {
                return None;
            }
            match self.targets[target_idx].full_rx.recv_timeout(POLL_INTERVAL) {
                Ok(Item::Buffer(b)) => return Some(b),
                Ok(Item::Eos) => return None,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Consumer side: return a buffer to the free pool for recycling.
    pub fn push_input(&self, buf: Buffer) {
        self.pool.release(buf);
        let _ = self.doorbell_tx.send(());
    }

    /// Producer side: return an acquired-but-unused output buffer
    /// directly to the free pool instead of forwarding it downstream.
    /// Used when a task declines to produce on this tick (see
    /// `Task::process`'s forwarding contract).
    pub fn release_output(&self, buf: Buffer) {
        self.pool.release(buf);
        let _ = self.doorbell_tx.send(());
    }

    /// Push exactly one end-of-stream marker to every target.
    pub fn finish(&self) {
        for target in &self.targets {
            let _ = target.full_tx.send(Item::Eos);
        }
    }

    pub fn input_port(&self, target_idx: usize) -> u32 {
        self.targets[target_idx].input_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> Requisition {
        Requisition::new(vec![4])
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn scatter_distributes_round_robin() {
        // Pool capacity equals target count, so the consumer side must
        // recycle each buffer before the producer can draw the next one.
        let group = Group::new(SendPattern::Scatter, &[0, 0], Layout::Real, no_cancel());
        let mut counts = [0usize; 2];
        for i in 0..10 {
            let buf = group.pop_output(&req()).unwrap();
            group.push_output(buf);
            let idx = i % 2;
            let recv = group.pop_input(idx).unwrap();
            counts[idx] += 1;
            group.push_input(recv);
        }
        assert_eq!(counts, [5, 5]);
    }

    #[test]
    fn scatter_splits_uneven_count_by_ceil_floor() {
        let group = Group::new(SendPattern::Scatter, &[0, 0, 0], Layout::Real, no_cancel());
        let mut counts = [0usize; 3];
        for i in 0..10 {
            let buf = group.pop_output(&req()).unwrap();
            group.push_output(buf);
            let idx = i % 3;
            let recv = group.pop_input(idx).unwrap();
            counts[idx] += 1;
            group.push_input(recv);
        }
        let total: usize = counts.iter().sum();
        assert_eq!(total, 10);
        for c in counts {
            assert!(c == 3 || c == 4, "got {c}");
        }
    }

    #[test]
    fn broadcast_delivers_to_every_target() {
        let group = Group::new(SendPattern::Broadcast, &[0, 0], Layout::Real, no_cancel());
        let mut buf = group.pop_output(&req()).unwrap();
        buf.set_host_array(vec![9.0; 4]).unwrap();
        group.push_output(buf);
        group.finish();

        for idx in 0..2 {
            let mut received = group.pop_input(idx).unwrap();
            assert_eq!(received.get_host_array(false).unwrap(), &[9.0; 4][..]);
            assert!(group.pop_input(idx).is_none());
        }
    }

    #[test]
    fn finish_sends_exactly_one_eos_per_target() {
        let group = Group::new(SendPattern::Scatter, &[0, 0], Layout::Real, no_cancel());
        group.finish();
        assert!(group.pop_input(0).is_none());
        assert!(group.pop_input(1).is_none());
    }

    #[test]
    fn pool_never_exceeds_target_count() {
        let group = Group::new(SendPattern::Scatter, &[0, 0], Layout::Real, no_cancel());
        // Pop without pushing back: at most 2 buffers should ever be created.
        let b1 = group.pop_output(&req()).unwrap();
        let b2 = group.pop_output(&req()).unwrap();
        assert_eq!(group.created.load(Ordering::Relaxed), 2);
        group.push_input(b1);
        group.push_input(b2);
    }

    #[test]
    fn release_output_frees_buffer_for_next_pop() {
        let group = Group::new(SendPattern::Scatter, &[0], Layout::Real, no_cancel());
        let b1 = group.pop_output(&req()).unwrap();
        // Pool is already at capacity (1 target); declining to forward
        // `b1` must still make it available for the next pop_output.
        group.release_output(b1);
        let b2 = group.pop_output(&req()).unwrap();
        group.push_input(b2);
    }

    #[test]
    fn cancel_unblocks_pending_pop_input() {
        use std::thread;
        let group = Arc::new(Group::new(SendPattern::Scatter, &[0], Layout::Real, no_cancel()));
        let cancel = group.cancel.clone();
        let g = group.clone();
        let handle = thread::spawn(move || g.pop_input(0));
        thread::sleep(Duration::from_millis(120));
        cancel.store(true, Ordering::Relaxed);
        assert!(handle.join().unwrap().is_none());
    }
}
