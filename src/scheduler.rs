//! Scheduler: setup, graph rewrites, group construction, worker spawn,
//! run loop, join & teardown.
//!
//! Grounded on the teacher's `src/dataflow_graph.rs` (`DataflowGraph`:
//! builds a dependency graph, a shared buffer pool, per-node channels,
//! spawns one thread per node, joins with per-task error logging at
//! shutdown) generalized to the five-mode worker loop and the stricter
//! cancel-on-error policy this design calls for (the teacher logs a
//! worker's error and moves on; here the first error is propagated and
//! every other worker is cancelled via `Group::finish` plus the shared
//! cancellation flag).
//!
//! The Reductor loop is written once, linearly (process until
//! end-of-stream, then generate until `false`) rather than porting
//! `original_source/ufo/ufo-scheduler.c`'s two-loop `run_task` arm for
//! `UFO_TASK_MODE_REDUCTOR` — see DESIGN.md.

use crate::buffer::{Buffer, Layout, Location};
use crate::error::{Result, TopologyError, UfoError};
use crate::group::Group;
use crate::resources::Resources;
use crate::task::{Structure, Task, TaskMode};
use crate::task_graph::TaskGraph;
use crate::trace::{Trace, TraceHandle};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Instantiates a fresh `Task` from a plugin name, used by `expand` to
/// re-create tasks for cloned chain nodes (boxed trait objects aren't
/// required to be `Clone`).
pub trait TaskFactory: Send + Sync {
    fn create(&self, plugin_name: &str) -> Result<Box<dyn Task>>;
}

pub struct Scheduler {
    graph: TaskGraph,
    tasks: HashMap<String, Box<dyn Task>>,
    resources: Resources,
}

impl Scheduler {
    pub fn new(graph: TaskGraph, tasks: HashMap<String, Box<dyn Task>>, resources: Resources) -> Self {
        Self {
            graph,
            tasks,
            resources,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    /// Replicate the chain between `source` and `sink` across `factor`
    /// GPUs, instantiating fresh tasks for each clone via `factory`.
    /// Reductors must not appear in the replicated chain — the caller is
    /// expected to have checked task modes before calling this (a
    /// `Group`-level rewrite has no notion of task mode).
    pub fn expand(
        &mut self,
        factory: &dyn TaskFactory,
        source: &str,
        sink: &str,
        factor: usize,
    ) -> Result<()> {
        let _span = tracing::debug_span!("scheduler.expand", factor).entered();
        for mode_node in self.chain_between(source, sink)? {
            if self
                .tasks
                .get(&mode_node)
                .map(|t| matches!(t.get_structure().mode, TaskMode::Reductor))
                .unwrap_or(false)
            {
                return Err(UfoError::Topology(TopologyError::ConflictingSendPattern(format!(
                    "cannot expand across reductor '{mode_node}'"
                ))));
            }
        }

        let plan = crate::transforms::expand(&mut self.graph, source, sink, factor)?;
        if plan.replicas.is_empty() {
            return Ok(());
        }

        self.tasks.insert(
            plan.copy_node.clone(),
            factory.create("copy").unwrap_or_else(|_| Box::new(crate::tasks::Identity)),
        );
        self.tasks.insert(plan.merge_node.clone(), factory.create("merge")?);

        for branch in &plan.replicas {
            for clone_id in branch {
                let base_plugin = self
                    .graph
                    .node(clone_id)
                    .map(|m| m.plugin_name.clone())
                    .unwrap_or_default();
                self.tasks.insert(clone_id.clone(), factory.create(&base_plugin)?);
            }
        }
        Ok(())
    }

    /// Stamp the local partition share on every source ahead of shipping
    /// this graph to `total - 1` remote workers. Rejects the graph if a
    /// source doesn't cooperate with partitioning (§9 Open Question
    /// decision) before mutating anything.
    pub fn replicate(&mut self, total: u32) -> Result<()> {
        crate::transforms::replicate(&mut self.graph, &self.tasks, total)
    }

    fn chain_between(&self, source: &str, sink: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut cursor = source.to_string();
        loop {
            let succs = self.graph.successors(&cursor)?;
            if succs.len() != 1 {
                break;
            }
            let (next, _) = succs.into_iter().next().expect("len == 1");
            if next == sink {
                break;
            }
            chain.push(next.clone());
            cursor = next;
        }
        Ok(chain)
    }

    /// Runs the full pipeline to completion: setup every task, build the
    /// group fabric, spawn one worker thread per node, and join. Returns
    /// the first error encountered by any worker, if any.
    pub fn run(self) -> Result<()> {
        self.run_traced(None)
    }

    /// Same as [`Scheduler::run`], but times every `process`/`generate`
    /// call into `trace` if one is supplied. The caller is responsible
    /// for writing `trace.to_json()` out after this returns.
    pub fn run_traced(mut self, trace: Option<&Trace>) -> Result<()> {
        let order = self.graph.topological_order()?;

        let mut structures = HashMap::new();
        {
            let _span = tracing::debug_span!("scheduler.setup").entered();
            for id in &order {
                let task = self
                    .tasks
                    .get_mut(id)
                    .unwrap_or_else(|| panic!("task missing for graph node '{id}'"));
                task.setup(&self.resources).map_err(|e| UfoError::Setup {
                    node: id.clone(),
                    reason: e.to_string(),
                })?;
                structures.insert(id.clone(), task.get_structure());
                tracing::debug!(node = %id, "setup complete");
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));

        let mut groups: HashMap<String, Arc<Group>> = HashMap::new();
        {
            let _span = tracing::debug_span!("scheduler.groups").entered();
            for id in &order {
                let successors = self.graph.successors(id)?;
                if successors.is_empty() {
                    continue;
                }
                let ports: Vec<u32> = successors.iter().map(|(_, p)| *p).collect();
                let pattern = self
                    .graph
                    .node(id)
                    .unwrap_or_else(|| panic!("node metadata missing for '{id}'"))
                    .send_pattern;
                groups.insert(
                    id.clone(),
                    Arc::new(Group::new(pattern, &ports, Layout::Real, cancel.clone())),
                );
            }
            tracing::debug!(count = groups.len(), "groups constructed");
        }

        let mut in_ports: HashMap<String, Vec<Option<(Arc<Group>, usize)>>> = HashMap::new();
        for id in &order {
            let n_inputs = structures[id].n_inputs;
            in_ports.insert(id.clone(), vec![None; n_inputs]);
        }
        for id in &order {
            let Some(group) = groups.get(id).cloned() else {
                continue;
            };
            for (target_idx, (consumer, port)) in self.graph.successors(id)?.into_iter().enumerate() {
                if let Some(slots) = in_ports.get_mut(&consumer) {
                    if let Some(slot) = slots.get_mut(port as usize) {
                        *slot = Some((group.clone(), target_idx));
                    }
                }
            }
        }
        for id in &order {
            for (port, slot) in in_ports[id].iter().enumerate() {
                if slot.is_none() {
                    return Err(UfoError::Topology(TopologyError::OrphanInput {
                        node: id.clone(),
                        port: port as u32,
                    }));
                }
            }
        }

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let n_cpus = num_cpus::get().max(1);

        let mut handles: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();
        {
            let _span = tracing::debug_span!("scheduler.spawn").entered();
            for (slot, id) in order.clone().into_iter().enumerate() {
                let task = self.tasks.remove(&id).expect("task present for every graph node");
                let structure = structures[&id].clone();
                let wired_inputs: Vec<(Arc<Group>, usize)> = in_ports
                    .remove(&id)
                    .expect("port slots present")
                    .into_iter()
                    .map(|port| port.expect("orphan check passed above"))
                    .collect();
                let out_group = groups.get(&id).cloned();
                let node_name = id.clone();
                let trace_handle = trace.map(|t| t.handle_for(&id));
                let core = (!core_ids.is_empty()).then(|| core_ids[slot % core_ids.len().min(n_cpus)]);
                let handle = thread::Builder::new()
                    .name(format!("ufo-worker-{id}"))
                    .spawn(move || {
                        if let Some(core) = core {
                            if !core_affinity::set_for_current(core) {
                                tracing::debug!(node = %node_name, "could not set CPU affinity for worker");
                            }
                        }
                        worker_loop(node_name, task, structure, wired_inputs, out_group, trace_handle)
                    })
                    .expect("failed to spawn worker thread");
                handles.push((id, handle));
            }
        }

        let _span = tracing::debug_span!("scheduler.join").entered();
        let mut first_err: Option<UfoError> = None;
        let all_groups: Vec<Arc<Group>> = groups.values().cloned().collect();
        for (id, handle) in handles {
            let result = handle.join().unwrap_or_else(|_| {
                Err(UfoError::Runtime(crate::error::RuntimeError::Protocol {
                    node: id.clone(),
                    reason: "worker thread panicked".to_string(),
                }))
            });
            if let Err(e) = result {
                if first_err.is_none() {
                    tracing::error!(node = %id, error = %e, "worker failed; cancelling pipeline");
                    cancel.store(true, std::sync::atomic::Ordering::Relaxed);
                    for g in &all_groups {
                        g.finish();
                    }
                    first_err = Some(e);
                } else {
                    tracing::error!(node = %id, error = %e, "additional worker error after cancellation");
                }
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(())
    }
}

fn worker_loop(
    id: String,
    mut task: Box<dyn Task>,
    structure: Structure,
    in_ports: Vec<(Arc<Group>, usize)>,
    out_group: Option<Arc<Group>>,
    trace: Option<TraceHandle>,
) -> Result<()> {
    let span = tracing::debug_span!("worker", node = %id, mode = ?structure.mode);
    let _enter = span.enter();
    match structure.mode {
        TaskMode::Source => run_source(task.as_mut(), out_group.as_deref(), trace.as_ref()),
        TaskMode::Processor => run_processor(task.as_mut(), &in_ports, out_group.as_deref(), trace.as_ref()),
        TaskMode::Reductor => run_reductor(task.as_mut(), &in_ports, out_group.as_deref(), trace.as_ref()),
        TaskMode::Sink => run_sink(task.as_mut(), &in_ports, trace.as_ref()),
    }
}

fn run_source(task: &mut dyn Task, out_group: Option<&Group>, trace: Option<&TraceHandle>) -> Result<()> {
    let Some(out_group) = out_group else {
        return Ok(());
    };
    loop {
        let req = task.get_requisition(&[])?;
        if req.n_dims() == 0 {
            break;
        }
        let Some(mut buf) = out_group.pop_output(&req) else {
            return Ok(());
        };
        buf.discard_location(Location::HostOnly);
        let more = match trace {
            Some(t) => t.timed("generate", "source", || task.generate(&mut buf))?,
            None => task.generate(&mut buf)?,
        };
        out_group.push_output(buf);
        if !more {
            break;
        }
    }
    out_group.finish();
    Ok(())
}

/// Pops one buffer per input port. `Ok(None)` means every port the
/// producer sent EOS on — this is an approximation for nodes with more
/// than one input port: the first port to signal EOS ends the node's
/// processing, rather than tracking each port's termination
/// independently (see DESIGN.md).
fn collect_inputs(in_ports: &[(Arc<Group>, usize)]) -> Option<Vec<Buffer>> {
    let mut inputs = Vec::with_capacity(in_ports.len());
    for (group, idx) in in_ports {
        match group.pop_input(*idx) {
            Some(buf) => inputs.push(buf),
            None => return None,
        }
    }
    Some(inputs)
}

fn recycle_inputs(in_ports: &[(Arc<Group>, usize)], inputs: Vec<Buffer>) {
    for ((group, _), buf) in in_ports.iter().zip(inputs.into_iter()) {
        group.push_input(buf);
    }
}

fn run_processor(
    task: &mut dyn Task,
    in_ports: &[(Arc<Group>, usize)],
    out_group: Option<&Group>,
    trace: Option<&TraceHandle>,
) -> Result<()> {
    loop {
        let Some(inputs) = collect_inputs(in_ports) else {
            break;
        };
        let input_refs: Vec<&Buffer> = inputs.iter().collect();
        let req = task.get_requisition(&input_refs)?;
        let mut out_buf = if req.n_dims() > 0 {
            match out_group {
                Some(g) => match g.pop_output(&req) {
                    Some(mut b) => {
                        b.discard_location(Location::HostOnly);
                        Some(b)
                    }
                    None => return Ok(()),
                },
                None => None,
            }
        } else {
            None
        };
        let produced = match trace {
            Some(t) => t.timed("process", "processor", || task.process(&input_refs, out_buf.as_mut()))?,
            None => task.process(&input_refs, out_buf.as_mut())?,
        };
        drop(input_refs);
        if let (Some(buf), Some(g)) = (out_buf, out_group) {
            if produced {
                g.push_output(buf);
            } else {
                g.release_output(buf);
            }
        }
        recycle_inputs(in_ports, inputs);
    }

    // Drain any results a pipelining task (e.g. a RemoteTask) still owes
    // after its inputs reached end-of-stream, so in-flight work sent
    // before EOS isn't dropped on the floor.
    if let Some(g) = out_group {
        while task.pending_count() > 0 {
            let req = task.get_requisition(&[])?;
            if req.n_dims() == 0 {
                break;
            }
            let Some(mut buf) = g.pop_output(&req) else {
                return Ok(());
            };
            buf.discard_location(Location::HostOnly);
            let produced = match trace {
                Some(t) => t.timed("generate", "processor", || task.generate(&mut buf))?,
                None => task.generate(&mut buf)?,
            };
            if produced {
                g.push_output(buf);
            } else {
                g.release_output(buf);
                break;
            }
        }
        g.finish();
    }
    Ok(())
}

fn run_reductor(
    task: &mut dyn Task,
    in_ports: &[(Arc<Group>, usize)],
    out_group: Option<&Group>,
    trace: Option<&TraceHandle>,
) -> Result<()> {
    loop {
        let Some(inputs) = collect_inputs(in_ports) else {
            break;
        };
        let input_refs: Vec<&Buffer> = inputs.iter().collect();
        match trace {
            Some(t) => t.timed("process", "reductor", || task.process(&input_refs, None))?,
            None => task.process(&input_refs, None)?,
        };
        drop(input_refs);
        recycle_inputs(in_ports, inputs);
    }

    if let Some(g) = out_group {
        loop {
            let req = task.get_requisition(&[])?;
            if req.n_dims() == 0 {
                break;
            }
            let Some(mut buf) = g.pop_output(&req) else {
                return Ok(());
            };
            buf.discard_location(Location::HostOnly);
            let more = match trace {
                Some(t) => t.timed("generate", "reductor", || task.generate(&mut buf))?,
                None => task.generate(&mut buf)?,
            };
            g.push_output(buf);
            if !more {
                break;
            }
        }
        g.finish();
    }
    Ok(())
}

fn run_sink(task: &mut dyn Task, in_ports: &[(Arc<Group>, usize)], trace: Option<&TraceHandle>) -> Result<()> {
    loop {
        let Some(inputs) = collect_inputs(in_ports) else {
            return Ok(());
        };
        let input_refs: Vec<&Buffer> = inputs.iter().collect();
        match trace {
            Some(t) => t.timed("process", "sink", || task.process(&input_refs, None))?,
            None => task.process(&input_refs, None)?,
        };
        drop(input_refs);
        recycle_inputs(in_ports, inputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::SendPattern;
    use crate::task_graph::NodeMeta;
    use crate::tasks::{
        ConstantSource, CountSink, Identity, JitterSource, RawBitsSource, ReduceSum, Reinterpret, SumSink,
    };

    fn resources() -> Resources {
        Resources::new(1)
    }

    #[test]
    fn source_to_sum_sink() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("sink", "sum-sink"));
        graph.connect("src", "sink", 0).unwrap();

        let sink = SumSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(ConstantSource::new(1.0, vec![1], 4)));
        tasks.insert("sink".to_string(), Box::new(sink.clone()));

        Scheduler::new(graph, tasks, resources()).run().unwrap();

        assert_eq!(sink.count(), 4);
        assert_eq!(sink.total(), 4.0);
    }

    #[test]
    fn scatter_through_identity_preserves_total_count() {
        // Exercises a scatter edge (src -> p1) end to end through the
        // scheduler; full fan-in merge semantics (multiple producers on
        // one consumer's distinct ports, each with independent EOS) are
        // covered at the `Group` layer in group.rs's tests, since the
        // processor worker loop here waits on all of a node's ports in
        // lockstep per tick (see `collect_inputs`).
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("p1", "identity"));
        graph.add_node(NodeMeta::new("sink", "count-sink"));
        graph.connect("src", "p1", 0).unwrap();
        graph.connect("p1", "sink", 0).unwrap();

        let count = CountSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(ConstantSource::new(2.0, vec![1], 10)));
        tasks.insert("p1".to_string(), Box::new(Identity));
        tasks.insert("sink".to_string(), Box::new(count.clone()));

        Scheduler::new(graph, tasks, resources()).run().unwrap();
        assert_eq!(count.count(), 10);
    }

    #[test]
    fn broadcast_delivers_identical_payload_to_two_sinks() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("sum", "sum-sink"));
        graph.add_node(NodeMeta::new("count", "count-sink"));
        graph.node_mut("src").unwrap().send_pattern = SendPattern::Broadcast;
        graph.connect("src", "sum", 0).unwrap();
        graph.connect("src", "count", 0).unwrap();

        let sum = SumSink::new();
        let count = CountSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(ConstantSource::new(1.0, vec![1], 6)));
        tasks.insert("sum".to_string(), Box::new(sum.clone()));
        tasks.insert("count".to_string(), Box::new(count.clone()));

        Scheduler::new(graph, tasks, resources()).run().unwrap();

        assert_eq!(sum.total(), 6.0);
        assert_eq!(count.count(), 6);
    }

    #[test]
    fn u8_reinterpret_is_exact() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "raw-bits-source"));
        graph.add_node(NodeMeta::new("conv", "reinterpret"));
        graph.add_node(NodeMeta::new("sink", "sum-sink"));
        graph.connect("src", "conv", 0).unwrap();
        graph.connect("conv", "sink", 0).unwrap();

        let sink = SumSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(RawBitsSource::new(vec![255])));
        tasks.insert(
            "conv".to_string(),
            Box::new(Reinterpret::new(crate::buffer::SourceDepth::U8)),
        );
        tasks.insert("sink".to_string(), Box::new(sink.clone()));

        Scheduler::new(graph, tasks, resources()).run().unwrap();
        assert_eq!(sink.total(), 1.0);
    }

    #[test]
    fn reductor_drains_after_eos() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("reduce", "reduce-sum"));
        graph.add_node(NodeMeta::new("sink", "sum-sink"));
        graph.connect("src", "reduce", 0).unwrap();
        graph.connect("reduce", "sink", 0).unwrap();

        let sink = SumSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(ConstantSource::new(2.0, vec![1], 5)));
        tasks.insert("reduce".to_string(), Box::new(ReduceSum::new(vec![1])));
        tasks.insert("sink".to_string(), Box::new(sink.clone()));

        Scheduler::new(graph, tasks, resources()).run().unwrap();
        assert_eq!(sink.total(), 10.0);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn reductor_with_zero_inputs_produces_zero_outputs() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("reduce", "reduce-sum"));
        graph.add_node(NodeMeta::new("sink", "count-sink"));
        graph.connect("src", "reduce", 0).unwrap();
        graph.connect("reduce", "sink", 0).unwrap();

        let sink = CountSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(ConstantSource::new(2.0, vec![1], 0)));
        tasks.insert("reduce".to_string(), Box::new(ReduceSum::new(vec![1])));
        tasks.insert("sink".to_string(), Box::new(sink.clone()));

        Scheduler::new(graph, tasks, resources()).run().unwrap();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn jittered_source_still_delivers_every_item_in_order() {
        // Randomized per-tick delay must not change the delivered count
        // or per-edge push order (§5 "Ordering guarantees").
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "jitter-source"));
        graph.add_node(NodeMeta::new("sink", "count-sink"));
        graph.connect("src", "sink", 0).unwrap();

        let sink = CountSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(JitterSource::new(1.0, vec![1], 20, 300)));
        tasks.insert("sink".to_string(), Box::new(sink.clone()));

        Scheduler::new(graph, tasks, resources()).run().unwrap();
        assert_eq!(sink.count(), 20);
    }

    #[test]
    fn cycle_construction_fails_before_run() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("a", "identity"));
        graph.add_node(NodeMeta::new("b", "identity"));
        graph.connect("a", "b", 0).unwrap();
        assert!(graph.connect("b", "a", 0).is_err());
    }

    #[test]
    fn run_traced_records_one_event_per_tick() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("sink", "sum-sink"));
        graph.connect("src", "sink", 0).unwrap();

        let sink = SumSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(ConstantSource::new(1.0, vec![1], 3)));
        tasks.insert("sink".to_string(), Box::new(sink.clone()));

        let trace = crate::trace::Trace::new();
        Scheduler::new(graph, tasks, resources())
            .run_traced(Some(&trace))
            .unwrap();

        assert_eq!(sink.count(), 3);
        let json = trace.to_json();
        let events = json["traceEvents"].as_array().unwrap();
        // 3 generate calls on "src" plus 3 process calls on "sink".
        assert_eq!(events.len(), 6);
    }

    #[test]
    fn replicate_rejects_source_that_ignores_partitioning() {
        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("sink", "sum-sink"));
        graph.connect("src", "sink", 0).unwrap();

        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(ConstantSource::new(1.0, vec![1], 1)));
        tasks.insert("sink".to_string(), Box::new(SumSink::new()));

        let mut scheduler = Scheduler::new(graph, tasks, resources());
        let err = scheduler.replicate(3).unwrap_err();
        assert!(matches!(
            err,
            UfoError::Topology(crate::error::TopologyError::PartitionUnsupported(_))
        ));
    }

    #[test]
    fn replicate_stamps_cooperating_source_then_runs_normally() {
        struct CooperatingSource(ConstantSource);
        impl Task for CooperatingSource {
            fn setup(&mut self, r: &Resources) -> Result<()> {
                self.0.setup(r)
            }
            fn get_structure(&self) -> Structure {
                self.0.get_structure()
            }
            fn get_requisition(&mut self, inputs: &[&Buffer]) -> Result<crate::buffer::Requisition> {
                self.0.get_requisition(inputs)
            }
            fn process(&mut self, inputs: &[&Buffer], output: Option<&mut Buffer>) -> Result<bool> {
                self.0.process(inputs, output)
            }
            fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
                self.0.generate(output)
            }
            fn cooperates_with_partition(&self) -> bool {
                true
            }
        }

        let mut graph = TaskGraph::new();
        graph.add_node(NodeMeta::new("src", "constant-source"));
        graph.add_node(NodeMeta::new("sink", "sum-sink"));
        graph.connect("src", "sink", 0).unwrap();

        let sink = SumSink::new();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert(
            "src".to_string(),
            Box::new(CooperatingSource(ConstantSource::new(1.0, vec![1], 4))),
        );
        tasks.insert("sink".to_string(), Box::new(sink.clone()));

        let mut scheduler = Scheduler::new(graph, tasks, resources());
        scheduler.replicate(3).unwrap();
        assert_eq!(scheduler.graph().node("src").unwrap().partition, (0, 3));
        scheduler.run().unwrap();
        assert_eq!(sink.count(), 4);
    }
}
