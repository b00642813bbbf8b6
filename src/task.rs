//! The task contract: the polymorphic unit of computation that the
//! scheduler drives through its per-mode state machine.

use crate::buffer::Buffer;
use crate::error::Result;
use crate::resources::Resources;

/// Declares how many inputs a port expects before end-of-stream.
/// `n_expected = -1` means an unbounded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputParam {
    pub n_dims: u32,
    pub n_expected: i32,
}

impl InputParam {
    pub fn unbounded(n_dims: u32) -> Self {
        Self {
            n_dims,
            n_expected: -1,
        }
    }

    pub fn exactly(n_dims: u32, n: u32) -> Self {
        Self {
            n_dims,
            n_expected: n as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    Source,
    Processor,
    Reductor,
    Sink,
}

/// Structural description returned once, after `setup`, by
/// `Task::get_structure`.
#[derive(Debug, Clone)]
pub struct Structure {
    pub n_inputs: usize,
    pub input_params: Vec<InputParam>,
    pub mode: TaskMode,
}

/// A unit of computation. Implementations are boxed trait objects owned
/// by exactly one worker thread for the lifetime of a run; nothing here
/// needs to be `Sync`, only `Send`.
pub trait Task: Send {
    /// Called once before the first tick. Load kernels, allocate
    /// auxiliary state.
    fn setup(&mut self, resources: &Resources) -> Result<()>;

    /// Called once after `setup`. Defines the task's wiring.
    fn get_structure(&self) -> Structure;

    /// Called once per tick, before producing. May return a zero-dim
    /// requisition to suppress output on this tick.
    fn get_requisition(&mut self, inputs: &[&Buffer]) -> Result<crate::buffer::Requisition>;

    /// Processor/Reductor/Sink: consume `inputs`, optionally write
    /// `output`. For a Reductor, `false` signals the fold is done. For a
    /// Processor, `true` means `output` (when present) was actually
    /// written this tick and should be forwarded downstream; `false`
    /// means skip forwarding — used by a task that pipelines asynchronous
    /// work (e.g. `RemoteTask`) on ticks where no result is ready yet.
    /// Plain in-process tasks always write `output` when it's present
    /// and so always return `true`.
    fn process(&mut self, inputs: &[&Buffer], output: Option<&mut Buffer>) -> Result<bool>;

    /// Source/Reductor: produce the next output. Returns `true` while
    /// more output remains. Also used by a pipelining Processor (see
    /// `pending_count`) to drain results still outstanding after its
    /// inputs reach end-of-stream.
    fn generate(&mut self, output: &mut Buffer) -> Result<bool>;

    /// A human-readable name for logging/tracing, not identity.
    fn name(&self) -> &str {
        "task"
    }

    /// Processor only: number of results still owed after end-of-stream
    /// (e.g. in-flight remote requests sent but not yet collected). The
    /// worker loop calls `generate` this many times to drain them before
    /// finishing. Defaults to `0` — ordinary in-process tasks never carry
    /// pipelined state across ticks.
    fn pending_count(&self) -> usize {
        0
    }

    /// Whether a source task can honor `(index, total)` partition
    /// stamping by emitting only its designated share of the stream.
    /// Defaults to `false`; the pipeline loader rejects replicate mode
    /// for sources that don't override this.
    fn cooperates_with_partition(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Task for Noop {
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
        fn get_requisition(&mut self, _: &[&Buffer]) -> Result<crate::buffer::Requisition> {
            Ok(crate::buffer::Requisition::none())
        }
        fn process(&mut self, _: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
            Ok(false)
        }
        fn generate(&mut self, _: &mut Buffer) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn default_partition_cooperation_is_false() {
        assert!(!Noop.cooperates_with_partition());
    }

    #[test]
    fn input_param_unbounded_is_negative_one() {
        assert_eq!(InputParam::unbounded(2).n_expected, -1);
        assert_eq!(InputParam::exactly(2, 5).n_expected, 5);
    }
}
