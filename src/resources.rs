//! Resource loader stub: kernel lookup and command-queue access.
//!
//! A real engine would compile OpenCL programs and hand out `cl_kernel`
//! objects here; that's out of scope (see the crate's top-level docs).
//! `Resources` is read-only after setup, so it's freely shareable across
//! worker threads without synchronization.

use crate::error::{Result, UfoError};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Kernel {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub usize);

#[derive(Debug, Clone)]
pub struct Queue {
    pub id: QueueId,
}

/// Shared, read-only-after-setup kernel/queue registry.
#[derive(Debug, Default)]
pub struct Resources {
    kernels: HashMap<String, Kernel>,
    queues: Vec<Queue>,
}

impl Resources {
    pub fn new(num_queues: usize) -> Self {
        Self {
            kernels: HashMap::new(),
            queues: (0..num_queues).map(|i| Queue { id: QueueId(i) }).collect(),
        }
    }

    pub fn register_kernel(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.kernels.insert(name.clone(), Kernel { name });
    }

    pub fn get_kernel(&self, name: &str) -> Result<&Kernel> {
        self.kernels
            .get(name)
            .ok_or_else(|| UfoError::Setup {
                node: name.to_string(),
                reason: "kernel not found".to_string(),
            })
    }

    pub fn get_cmd_queues(&self) -> &[Queue] {
        &self.queues
    }
}
