//! Lock-free buffer pool recycling shaped [`Buffer`]s between a producer
//! and its consumers.
//!
//! One pool is owned by each [`crate::group::Group`]; capacity grows
//! lazily up to the group's target count rather than being fixed at
//! construction, since that's the maximum useful number of buffers in
//! flight for a single producer (see `Group::pop_output`).

use crate::buffer::{Buffer, Layout, Requisition};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct BufferPool {
    free: Arc<ArrayQueue<Buffer>>,
    layout: Layout,
    max_buffers: usize,
    stats: Arc<BufferPoolStats>,
}

struct BufferPoolStats {
    allocations: AtomicUsize,
    reuses: AtomicUsize,
    current_size: AtomicUsize,
}

impl BufferPool {
    pub fn new(layout: Layout, max_buffers: usize) -> Self {
        Self {
            free: Arc::new(ArrayQueue::new(max_buffers.max(1))),
            layout,
            max_buffers,
            stats: Arc::new(BufferPoolStats {
                allocations: AtomicUsize::new(0),
                reuses: AtomicUsize::new(0),
                current_size: AtomicUsize::new(0),
            }),
        }
    }

    pub fn prefill(&self, requisition: Requisition, count: usize) {
        let count = count.min(self.max_buffers);
        for _ in 0..count {
            let buffer = Buffer::new(requisition.clone(), self.layout);
            if self.free.push(buffer).is_err() {
                break;
            }
        }
        self.stats.current_size.store(count, Ordering::Relaxed);
    }

    /// Acquire a buffer sized for `requisition`, from the pool if
    /// available (resizing if the shape differs), otherwise freshly
    /// allocated.
    pub fn acquire(&self, requisition: &Requisition) -> Buffer {
        match self.try_acquire(requisition) {
            Some(buffer) => buffer,
            None => {
                self.stats.allocations.fetch_add(1, Ordering::Relaxed);
                Buffer::new(requisition.clone(), self.layout)
            }
        }
    }

    /// Pop a buffer already circulating in the pool, resizing it to
    /// `requisition` if needed. Never allocates; returns `None` if the
    /// pool is currently empty. Used by callers (like `Group`) that gate
    /// how many buffers are ever created themselves, rather than letting
    /// the pool allocate on demand.
    pub fn try_acquire(&self, requisition: &Requisition) -> Option<Buffer> {
        let mut buffer = self.free.pop()?;
        self.stats.reuses.fetch_add(1, Ordering::Relaxed);
        self.stats.current_size.fetch_sub(1, Ordering::Relaxed);
        buffer.resize(requisition.clone());
        Some(buffer)
    }

    /// Put a freshly allocated buffer directly into circulation,
    /// recording it as an allocation. Used by a gated caller growing the
    /// pool by exactly one buffer at a time up to its own cap.
    pub fn seed(&self, buffer: Buffer) {
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        if self.free.push(buffer).is_ok() {
            self.stats.current_size.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Return a buffer to the pool for reuse. Dropped silently if the
    /// pool is already at capacity.
    pub fn release(&self, buffer: Buffer) {
        if self.free.push(buffer).is_ok() {
            self.stats.current_size.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> (usize, usize, usize, usize) {
        (
            self.stats.allocations.load(Ordering::Relaxed),
            self.stats.reuses.load(Ordering::Relaxed),
            self.stats.current_size.load(Ordering::Relaxed),
            self.max_buffers,
        )
    }

    pub fn efficiency(&self) -> f64 {
        let allocs = self.stats.allocations.load(Ordering::Relaxed);
        let reuses = self.stats.reuses.load(Ordering::Relaxed);
        let total = allocs + reuses;
        if total == 0 {
            0.0
        } else {
            reuses as f64 / total as f64
        }
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    /// Number of buffers currently tracked by the pool (free + never
    /// released). Used by `Group::pop_output` to decide whether to grow
    /// the pool before popping.
    pub fn tracked(&self) -> usize {
        self.stats.current_size.load(Ordering::Relaxed)
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            free: self.free.clone(),
            layout: self.layout,
            max_buffers: self.max_buffers,
            stats: self.stats.clone(),
        }
    }
}
