//! GraphTransforms: the rewrites the scheduler applies between setup and
//! worker spawn — multi-GPU expansion, proc-node mapping, and partition
//! stamping for data-parallel replicas.
//!
//! Grounded on `original_source/ufo/ufo-scheduler.c`'s graph-rewrite
//! calls and SPEC_FULL §4.6. Reductors are treated as expand barriers
//! (an Open Question decision, see DESIGN.md) — callers must not expand
//! a chain that crosses a Reductor; `expand` itself only knows graph
//! topology, so that check lives with the scheduler, which knows task
//! modes.

use crate::error::{Result, TopologyError, UfoError};
use crate::group::SendPattern;
use crate::resources::QueueId;
use crate::task::Task;
use crate::task_graph::{NodeMeta, TaskGraph};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcNode {
    Cpu,
    Gpu(QueueId),
    Remote(String),
}

/// Round-robin assign a concrete compute site to every GPU-tagged node;
/// everything else gets `Cpu`.
pub fn map(
    graph: &TaskGraph,
    gpu_nodes: &[String],
    queues: &[QueueId],
) -> Result<HashMap<String, ProcNode>> {
    let _span = tracing::debug_span!("scheduler.map", gpu_nodes = gpu_nodes.len()).entered();
    if queues.is_empty() && !gpu_nodes.is_empty() {
        return Err(UfoError::Topology(TopologyError::ConflictingSendPattern(
            "no GPU queues available to map onto".into(),
        )));
    }
    let mut assignment = HashMap::new();
    for (i, node) in gpu_nodes.iter().enumerate() {
        assignment.insert(node.clone(), ProcNode::Gpu(queues[i % queues.len()]));
    }
    for id in graph.nodes() {
        assignment.entry(id.clone()).or_insert(ProcNode::Cpu);
    }
    Ok(assignment)
}

/// Stamp `(index, total)` on a node, for replicate-mode sources.
pub fn stamp_partition(graph: &mut TaskGraph, node: &str, index: u32, total: u32) -> Result<()> {
    let meta = graph
        .node_mut(node)
        .ok_or_else(|| UfoError::Config(crate::error::ConfigError::UnknownNode(node.to_string())))?;
    meta.partition = (index, total);
    Ok(())
}

/// Stamp the local share `(0, total)` on every source node ahead of
/// shipping the graph to `total - 1` remote workers (which stamp
/// `(1..total, total)` on their own copy — the wire transport for that
/// is out of scope per SPEC_FULL §1). Rejects the graph outright, before
/// any stamp is applied, if a source doesn't override
/// `Task::cooperates_with_partition` — an Open Question decision (see
/// DESIGN.md): a source that ignores its assigned share would silently
/// reprocess the whole stream on every replica.
pub fn replicate(graph: &mut TaskGraph, tasks: &HashMap<String, Box<dyn Task>>, total: u32) -> Result<()> {
    let _span = tracing::debug_span!("scheduler.replicate", total).entered();
    let sources = graph.source_nodes();
    for node in &sources {
        let cooperates = tasks.get(node).map(|t| t.cooperates_with_partition()).unwrap_or(false);
        if !cooperates {
            return Err(UfoError::Topology(TopologyError::PartitionUnsupported(node.clone())));
        }
    }
    for node in &sources {
        stamp_partition(graph, node, 0, total)?;
    }
    Ok(())
}

pub struct ExpandPlan {
    pub copy_node: String,
    pub merge_node: String,
    /// One entry per replica, chain node ids in producer-to-consumer
    /// order (empty if `source` connects directly to `sink`).
    pub replicas: Vec<Vec<String>>,
}

/// Replicate the linear chain strictly between `source` and `sink` into
/// `factor` parallel branches, joined by an inserted broadcast `copy`
/// node after `source` and a `merge` node before `sink`. `factor <= 1`
/// is a no-op.
pub fn expand(graph: &mut TaskGraph, source: &str, sink: &str, factor: usize) -> Result<ExpandPlan> {
    if factor <= 1 {
        return Ok(ExpandPlan {
            copy_node: source.to_string(),
            merge_node: sink.to_string(),
            replicas: vec![],
        });
    }

    let mut chain_ids = Vec::new();
    let mut cursor = source.to_string();
    loop {
        let succs = graph.successors(&cursor)?;
        if succs.len() != 1 {
            return Err(UfoError::Topology(TopologyError::ConflictingSendPattern(format!(
                "expand requires a single linear chain between '{source}' and '{sink}'"
            ))));
        }
        let (next, _port) = succs.into_iter().next().expect("checked len == 1");
        if next == sink {
            break;
        }
        chain_ids.push(next.clone());
        cursor = next;
    }

    let chain_metas: Vec<NodeMeta> = chain_ids
        .iter()
        .map(|id| {
            graph
                .node(id)
                .cloned()
                .ok_or_else(|| UfoError::Config(crate::error::ConfigError::UnknownNode(id.clone())))
        })
        .collect::<Result<_>>()?;

    for id in &chain_ids {
        graph.remove_node(id)?;
    }

    let copy_name = format!("{source}::copy");
    let mut copy_meta = NodeMeta::new(&copy_name, "copy");
    copy_meta.send_pattern = SendPattern::Broadcast;
    graph.add_node(copy_meta);
    graph.connect(source, &copy_name, 0)?;

    let merge_name = format!("{sink}::merge");
    graph.add_node(NodeMeta::new(&merge_name, "merge"));
    graph.connect(&merge_name, sink, 0)?;

    let mut replicas = Vec::with_capacity(factor);
    for i in 0..factor {
        let mut branch = Vec::with_capacity(chain_metas.len());
        let mut prev = copy_name.clone();
        for base in &chain_metas {
            let clone_id = format!("{}::r{i}", base.unique_name);
            let mut meta = base.clone();
            meta.unique_name = clone_id.clone();
            meta.partition = (i as u32, factor as u32);
            graph.add_node(meta);
            graph.connect(&prev, &clone_id, 0)?;
            prev = clone_id.clone();
            branch.push(clone_id);
        }
        graph.connect(&prev, &merge_name, i as u32)?;
        replicas.push(branch);
    }

    Ok(ExpandPlan {
        copy_node: copy_name,
        merge_node: merge_name,
        replicas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Requisition};
    use crate::resources::Resources;
    use crate::task::{InputParam, Structure, TaskMode};

    struct StubSource(bool);
    impl Task for StubSource {
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
            Ok(Requisition::none())
        }
        fn process(&mut self, _: &[&Buffer], _: Option<&mut Buffer>) -> Result<bool> {
            Ok(false)
        }
        fn generate(&mut self, _: &mut Buffer) -> Result<bool> {
            Ok(false)
        }
        fn cooperates_with_partition(&self) -> bool {
            self.0
        }
    }

    fn linear_graph() -> TaskGraph {
        let mut g = TaskGraph::new();
        g.add_node(NodeMeta::new("src", "source"));
        g.add_node(NodeMeta::new("p1", "proc"));
        g.add_node(NodeMeta::new("p2", "proc"));
        g.add_node(NodeMeta::new("sink", "sink"));
        g.connect("src", "p1", 0).unwrap();
        g.connect("p1", "p2", 0).unwrap();
        g.connect("p2", "sink", 0).unwrap();
        g
    }

    #[test]
    fn expand_factor_one_is_identity() {
        let mut g = linear_graph();
        let plan = expand(&mut g, "src", "sink", 1).unwrap();
        assert!(plan.replicas.is_empty());
        assert_eq!(plan.copy_node, "src");
        assert_eq!(g.node_count(), 4);
    }

    #[test]
    fn expand_replicates_chain_per_factor() {
        let mut g = linear_graph();
        let plan = expand(&mut g, "src", "sink", 2).unwrap();
        assert_eq!(plan.replicas.len(), 2);
        for branch in &plan.replicas {
            assert_eq!(branch.len(), 2);
        }
        // src -> copy, copy -> each branch head, branch tail -> merge -> sink
        assert_eq!(g.successors("src").unwrap(), vec![(plan.copy_node.clone(), 0)]);
        let copy_succs = g.successors(&plan.copy_node).unwrap();
        assert_eq!(copy_succs.len(), 2);
        assert_eq!(g.successors(&plan.merge_node).unwrap(), vec![("sink".to_string(), 0)]);
        // Original chain nodes are gone.
        assert!(g.node("p1").is_none());
        assert!(g.node("p2").is_none());
    }

    #[test]
    fn expand_stamps_partition_per_replica() {
        let mut g = linear_graph();
        let plan = expand(&mut g, "src", "sink", 3).unwrap();
        for (i, branch) in plan.replicas.iter().enumerate() {
            for node_id in branch {
                assert_eq!(g.node(node_id).unwrap().partition, (i as u32, 3));
            }
        }
    }

    #[test]
    fn map_assigns_gpu_nodes_round_robin() {
        let g = linear_graph();
        let queues = vec![QueueId(0), QueueId(1)];
        let gpu_nodes = vec!["p1".to_string(), "p2".to_string()];
        let assignment = map(&g, &gpu_nodes, &queues).unwrap();
        assert_eq!(assignment["p1"], ProcNode::Gpu(QueueId(0)));
        assert_eq!(assignment["p2"], ProcNode::Gpu(QueueId(1)));
        assert_eq!(assignment["src"], ProcNode::Cpu);
        assert_eq!(assignment["sink"], ProcNode::Cpu);
    }

    #[test]
    fn map_without_queues_for_gpu_nodes_errors() {
        let g = linear_graph();
        let err = map(&g, &["p1".to_string()], &[]).unwrap_err();
        assert!(matches!(err, UfoError::Topology(_)));
    }

    #[test]
    fn replicate_stamps_local_share_on_cooperating_source() {
        let mut g = linear_graph();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(StubSource(true)));
        replicate(&mut g, &tasks, 4).unwrap();
        assert_eq!(g.node("src").unwrap().partition, (0, 4));
    }

    #[test]
    fn replicate_rejects_noncooperating_source() {
        let mut g = linear_graph();
        let mut tasks: HashMap<String, Box<dyn Task>> = HashMap::new();
        tasks.insert("src".to_string(), Box::new(StubSource(false)));
        let err = replicate(&mut g, &tasks, 4).unwrap_err();
        assert!(matches!(
            err,
            UfoError::Topology(TopologyError::PartitionUnsupported(_))
        ));
        // Rejected before any stamp is applied.
        assert_eq!(g.node("src").unwrap().partition, (0, 1));
    }
}
