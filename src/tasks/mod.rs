//! Demo task implementations used only by tests and examples. Concrete
//! plugins (FFT wrappers, filter kernels, file readers/writers) are out
//! of scope for this crate; these exist to exercise the engine end to
//! end against the seed scenarios.
//!
//! Grounded on the teacher's `src/nodes/` style: small, single-purpose
//! structs, one per file's worth of behavior, implementing the task
//! trait directly rather than through a builder.

use crate::buffer::{Buffer, Requisition, SourceDepth};
use crate::error::Result;
use crate::resources::Resources;
use crate::task::{InputParam, Structure, Task, TaskMode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Emits `count` buffers of `dims` shape filled with `value`, then
/// stops.
pub struct ConstantSource {
    value: f32,
    dims: Vec<u32>,
    remaining: usize,
}

impl ConstantSource {
    pub fn new(value: f32, dims: impl Into<Vec<u32>>, count: usize) -> Self {
        Self {
            value,
            dims: dims.into(),
            remaining: count,
        }
    }
}

impl Task for ConstantSource {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 0,
            input_params: vec![],
            mode: TaskMode::Source,
        }
    }

    fn get_requisition(&mut self, _: &[&Buffer]) -> Result<Requisition> {
        if self.remaining == 0 {
            Ok(Requisition::none())
        } else {
            Ok(Requisition::new(self.dims.clone()))
        }
    }

    fn process(&mut self, _: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
        Ok(false)
    }

    fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        let n = output.requisition().n_elements();
        output.set_host_array(vec![self.value; n])?;
        self.remaining -= 1;
        Ok(true)
    }

    fn name(&self) -> &str {
        "constant-source"
    }
}

/// Like [`ConstantSource`], but sleeps a random handful of microseconds
/// before each tick. Used to exercise the ordering guarantees of §5
/// under realistic jitter rather than the lockstep timing a plain
/// `ConstantSource` produces — a scatter/broadcast test that only passes
/// under perfectly synchronized producers would be a false positive.
pub struct JitterSource {
    value: f32,
    dims: Vec<u32>,
    remaining: usize,
    max_jitter_micros: u64,
}

impl JitterSource {
    pub fn new(value: f32, dims: impl Into<Vec<u32>>, count: usize, max_jitter_micros: u64) -> Self {
        Self {
            value,
            dims: dims.into(),
            remaining: count,
            max_jitter_micros,
        }
    }
}

impl Task for JitterSource {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 0,
            input_params: vec![],
            mode: TaskMode::Source,
        }
    }

    fn get_requisition(&mut self, _: &[&Buffer]) -> Result<Requisition> {
        if self.remaining == 0 {
            Ok(Requisition::none())
        } else {
            Ok(Requisition::new(self.dims.clone()))
        }
    }

    fn process(&mut self, _: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
        Ok(false)
    }

    fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        if self.max_jitter_micros > 0 {
            let wait = fastrand::u64(0..=self.max_jitter_micros);
            std::thread::sleep(std::time::Duration::from_micros(wait));
        }
        let n = output.requisition().n_elements();
        output.set_host_array(vec![self.value; n])?;
        self.remaining -= 1;
        Ok(true)
    }

    fn name(&self) -> &str {
        "jitter-source"
    }
}

/// Produces a single buffer carrying a bit-pattern payload, used to
/// exercise `Buffer::reinterpret` against packed integer samples.
pub struct RawBitsSource {
    bits: Vec<u32>,
    emitted: bool,
}

impl RawBitsSource {
    pub fn new(bits: Vec<u32>) -> Self {
        Self {
            bits,
            emitted: false,
        }
    }
}

impl Task for RawBitsSource {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 0,
            input_params: vec![],
            mode: TaskMode::Source,
        }
    }

    fn get_requisition(&mut self, _: &[&Buffer]) -> Result<Requisition> {
        if self.emitted {
            Ok(Requisition::none())
        } else {
            Ok(Requisition::new(vec![self.bits.len() as u32]))
        }
    }

    fn process(&mut self, _: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
        Ok(false)
    }

    fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
        if self.emitted {
            return Ok(false);
        }
        let raw: Vec<f32> = self.bits.iter().map(|&b| f32::from_bits(b)).collect();
        output.set_host_array(raw)?;
        self.emitted = true;
        Ok(true)
    }

    fn name(&self) -> &str {
        "raw-bits-source"
    }
}

/// Passes its single input through to the output unchanged.
pub struct Identity;

impl Task for Identity {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 1,
            input_params: vec![InputParam::unbounded(1)],
            mode: TaskMode::Processor,
        }
    }

    fn get_requisition(&mut self, inputs: &[&Buffer]) -> Result<Requisition> {
        Ok(inputs[0].requisition().clone())
    }

    fn process(&mut self, inputs: &[&Buffer], output: Option<&mut Buffer>) -> Result<bool> {
        if let Some(out) = output {
            out.copy_from(inputs[0]);
        }
        Ok(true)
    }

    fn generate(&mut self, _: &mut Buffer) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Converts a raw-bits buffer in place via `reinterpret`.
pub struct Reinterpret {
    depth: SourceDepth,
}

impl Reinterpret {
    pub fn new(depth: SourceDepth) -> Self {
        Self { depth }
    }
}

impl Task for Reinterpret {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 1,
            input_params: vec![InputParam::unbounded(1)],
            mode: TaskMode::Processor,
        }
    }

    fn get_requisition(&mut self, inputs: &[&Buffer]) -> Result<Requisition> {
        Ok(inputs[0].requisition().clone())
    }

    fn process(&mut self, inputs: &[&Buffer], output: Option<&mut Buffer>) -> Result<bool> {
        if let Some(out) = output {
            out.copy_from(inputs[0]);
            out.reinterpret(self.depth)?;
        }
        Ok(true)
    }

    fn generate(&mut self, _: &mut Buffer) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "reinterpret"
    }
}

/// Sink that accumulates the sum of every element it sees into a shared
/// handle, readable after the scheduler joins.
#[derive(Clone)]
pub struct SumSink {
    total: Arc<Mutex<f32>>,
    count: Arc<AtomicU32>,
}

impl SumSink {
    pub fn new() -> Self {
        Self {
            total: Arc::new(Mutex::new(0.0)),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn total(&self) -> f32 {
        *self.total.lock().expect("sink mutex poisoned")
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for SumSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for SumSink {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 1,
            input_params: vec![InputParam::unbounded(1)],
            mode: TaskMode::Sink,
        }
    }

    fn get_requisition(&mut self, _: &[&Buffer]) -> Result<Requisition> {
        Ok(Requisition::none())
    }

    fn process(&mut self, inputs: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
        let mut total = self.total.lock().expect("sink mutex poisoned");
        for buf in inputs {
            let mut b = (*buf).clone();
            for &v in b.get_host_array(true)? {
                *total += v;
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn generate(&mut self, _: &mut Buffer) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "sum-sink"
    }
}

/// Two-input sink that tracks the largest per-element absolute
/// difference it has seen between port 0 and port 1. Used to exercise a
/// spectral-pair round trip (forward transform followed by its inverse)
/// without pulling in a real FFT crate: a no-op forward/inverse pair run
/// through this sink alongside the untouched source payload should see
/// `max_diff() == 0.0`.
#[derive(Clone)]
pub struct CompareSink {
    max_diff: Arc<Mutex<f32>>,
}

impl CompareSink {
    pub fn new() -> Self {
        Self {
            max_diff: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn max_diff(&self) -> f32 {
        *self.max_diff.lock().expect("sink mutex poisoned")
    }
}

impl Default for CompareSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for CompareSink {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 2,
            input_params: vec![InputParam::unbounded(2), InputParam::unbounded(2)],
            mode: TaskMode::Sink,
        }
    }

    fn get_requisition(&mut self, _: &[&Buffer]) -> Result<Requisition> {
        Ok(Requisition::none())
    }

    fn process(&mut self, inputs: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
        let mut a = inputs[0].clone();
        let mut b = inputs[1].clone();
        let av = a.get_host_array(true)?.to_vec();
        let bv = b.get_host_array(true)?.to_vec();
        let diff = av
            .iter()
            .zip(bv.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0f32, f32::max);
        let mut max_diff = self.max_diff.lock().expect("sink mutex poisoned");
        if diff > *max_diff {
            *max_diff = diff;
        }
        Ok(true)
    }

    fn generate(&mut self, _: &mut Buffer) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "compare-sink"
    }
}

/// Sink that counts the number of buffers it receives.
#[derive(Clone)]
pub struct CountSink {
    count: Arc<AtomicU32>,
}

impl CountSink {
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for CountSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for CountSink {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 1,
            input_params: vec![InputParam::unbounded(1)],
            mode: TaskMode::Sink,
        }
    }

    fn get_requisition(&mut self, _: &[&Buffer]) -> Result<Requisition> {
        Ok(Requisition::none())
    }

    fn process(&mut self, _: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn generate(&mut self, _: &mut Buffer) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "count-sink"
    }
}

/// Reductor: folds every input into a running sum, then emits that sum
/// once `generate` is called after end-of-stream.
pub struct ReduceSum {
    sum: f32,
    dims: Vec<u32>,
    received: bool,
    emitted: bool,
}

impl ReduceSum {
    pub fn new(dims: impl Into<Vec<u32>>) -> Self {
        Self {
            sum: 0.0,
            dims: dims.into(),
            received: false,
            emitted: false,
        }
    }
}

impl Task for ReduceSum {
    fn setup(&mut self, _: &Resources) -> Result<()> {
        Ok(())
    }

    fn get_structure(&self) -> Structure {
        Structure {
            n_inputs: 1,
            input_params: vec![InputParam::unbounded(1)],
            mode: TaskMode::Reductor,
        }
    }

    fn get_requisition(&mut self, _: &[&Buffer]) -> Result<Requisition> {
        // Zero inputs means nothing to drain (§8 boundary case): suppress
        // the generate call entirely rather than emitting an empty sum.
        if self.emitted || !self.received {
            Ok(Requisition::none())
        } else {
            Ok(Requisition::new(self.dims.clone()))
        }
    }

    fn process(&mut self, inputs: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
        self.received = true;
        let mut b = inputs[0].clone();
        for &v in b.get_host_array(true)? {
            self.sum += v;
        }
        Ok(true)
    }

    fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
        if self.emitted || !self.received {
            self.emitted = true;
            return Ok(false);
        }
        let n: usize = self.dims.iter().map(|&d| d as usize).product();
        output.set_host_array(vec![self.sum; n.max(1)])?;
        self.emitted = true;
        Ok(true)
    }

    fn name(&self) -> &str {
        "reduce-sum"
    }
}
