//! DAG Executor (spec §4.6).
//!
//! Validates a `TaskPlan`, then dispatches its nodes up to a configured
//! `maxConcurrency`, honoring dependency order and per-node `Priority`,
//! publishing each node's output into a shared context for its
//! dependents, and transitively skipping descendants of a failed node.

pub mod toml_format;
pub mod types;
pub mod validate;

pub use types::{DagOutcomeStatus, DagTaskResult, NodeStatus, Priority, TaskNode, TaskPlan};
pub use validate::validate;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::DagValidationError;

/// Read-only view of sibling outputs published so far, keyed by node id.
/// Shared across all in-flight workers; each node only ever reads entries
/// for ids that appear in its own `dependencies`.
pub type DagContext = Arc<Mutex<HashMap<String, serde_json::Value>>>;

#[derive(Clone)]
pub struct DagExecutorOptions {
    pub max_concurrency: usize,
    pub abort_on_first_error: bool,
    pub cancel: CancellationToken,
}

impl Default for DagExecutorOptions {
    fn default() -> Self {
        Self { max_concurrency: 4, abort_on_first_error: false, cancel: CancellationToken::new() }
    }
}

struct ReadyEntry {
    rank: u8,
    seq: u64,
    node_id: String,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}
impl Eq for ReadyEntry {}
impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest; higher rank first, ties broken by
        // earlier sequence number (FIFO within a priority tier).
        self.rank.cmp(&other.rank).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Picks the context slice a node sees: the full map when it has no
/// selector, or just the entry named by the selector when it does.
fn select_context(context: &HashMap<String, serde_json::Value>, selector: Option<&str>) -> HashMap<String, serde_json::Value> {
    match selector {
        None => context.clone(),
        Some(key) => context.get(key).map(|v| HashMap::from([(key.to_string(), v.clone())])).unwrap_or_default(),
    }
}

/// Run `run_node` over every node in `plan`, respecting dependency order,
/// `maxConcurrency`, and per-node priority. `run_node` receives the node,
/// a read-only snapshot of its dependencies' published outputs, and a
/// cancellation token scoped to this node.
pub async fn execute_dag<F, Fut>(
    plan: &TaskPlan,
    options: DagExecutorOptions,
    run_node: F,
) -> Result<(Vec<DagTaskResult>, DagOutcomeStatus), DagValidationError>
where
    F: Fn(TaskNode, HashMap<String, serde_json::Value>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    validate(plan)?;
    let run_node = Arc::new(run_node);

    let mut remaining_deps: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut results: HashMap<String, DagTaskResult> = HashMap::new();

    for node in &plan.nodes {
        remaining_deps.insert(node.id.clone(), node.dependencies.len());
        results.insert(node.id.clone(), DagTaskResult::pending(node.id.clone()));
        for dep in &node.dependencies {
            dependents.entry(dep.clone()).or_default().push(node.id.clone());
        }
    }

    let mut seq = 0u64;
    let mut ready: BinaryHeap<ReadyEntry> = BinaryHeap::new();
    for node in &plan.nodes {
        if node.dependencies.is_empty() {
            ready.push(ReadyEntry { rank: node.priority.rank(), seq, node_id: node.id.clone() });
            seq += 1;
        }
    }

    let context: DagContext = Arc::new(Mutex::new(HashMap::new()));
    let mut skipped: HashSet<String> = HashSet::new();
    let mut aborted = false;

    let max_concurrency = options.max_concurrency.max(1);
    let mut join_set: JoinSet<(String, anyhow::Result<serde_json::Value>)> = JoinSet::new();

    loop {
        while !aborted && join_set.len() < max_concurrency && !ready.is_empty() {
            let entry = ready.pop().unwrap();
            let node = plan.node(&entry.node_id).expect("ready id always names a plan node").clone();

            let result = results.get_mut(&node.id).unwrap();
            result.status = NodeStatus::Running;
            result.started_at = Some(Utc::now());

            let ctx_snapshot = {
                let guard = context.lock().await;
                select_context(&guard, node.input_context_selector.as_deref())
            };
            let child_cancel = options.cancel.child_token();
            let worker = run_node.clone();
            let node_for_task = node.clone();
            join_set.spawn(async move { (node_for_task.id.clone(), (*worker)(node_for_task, ctx_snapshot, child_cancel).await) });
        }

        let Some(joined) = join_set.join_next().await else { break };

        match joined {
            Ok((node_id, Ok(output))) => {
                let result = results.get_mut(&node_id).unwrap();
                result.status = NodeStatus::Completed;
                result.finished_at = Some(Utc::now());
                result.output = Some(output.clone());
                tracing::debug!(node_id, "dag node completed");
                context.lock().await.insert(node_id.clone(), output);

                if let Some(children) = dependents.get(&node_id).cloned() {
                    for child_id in children {
                        if skipped.contains(&child_id) {
                            continue;
                        }
                        let remaining = remaining_deps.get_mut(&child_id).unwrap();
                        *remaining -= 1;
                        if *remaining == 0 {
                            let child_node = plan.node(&child_id).unwrap();
                            ready.push(ReadyEntry { rank: child_node.priority.rank(), seq, node_id: child_id });
                            seq += 1;
                        }
                    }
                }
            }
            Ok((node_id, Err(source))) => {
                let result = results.get_mut(&node_id).unwrap();
                result.status = NodeStatus::Failed;
                result.finished_at = Some(Utc::now());
                result.error = Some(source.to_string());
                tracing::warn!(node_id, error = %source, "dag node failed");

                skip_descendants(&node_id, &dependents, &mut skipped, &mut results);

                if options.abort_on_first_error {
                    aborted = true;
                    options.cancel.cancel();
                    ready.clear();
                }
            }
            Err(join_err) => {
                tracing::warn!(error = %join_err, "dag node task panicked or was cancelled");
                if options.abort_on_first_error {
                    aborted = true;
                    options.cancel.cancel();
                    ready.clear();
                }
            }
        }

        if aborted && join_set.is_empty() {
            break;
        }
    }

    // Anything left pending (skipped, or starved because a sibling in
    // the same priority tier never got a turn before abort) is skipped.
    for result in results.values_mut() {
        if result.status == NodeStatus::Pending {
            result.status = NodeStatus::Skipped;
        }
    }

    let mut ordered: Vec<DagTaskResult> = plan.nodes.iter().map(|n| results.remove(&n.id).unwrap()).collect();
    let outcome = aggregate_outcome(&ordered);
    ordered.sort_by(|a, b| {
        let ia = plan.nodes.iter().position(|n| n.id == a.node_id).unwrap();
        let ib = plan.nodes.iter().position(|n| n.id == b.node_id).unwrap();
        ia.cmp(&ib)
    });

    Ok((ordered, outcome))
}

fn skip_descendants(
    failed_id: &str,
    dependents: &HashMap<String, Vec<String>>,
    skipped: &mut HashSet<String>,
    results: &mut HashMap<String, DagTaskResult>,
) {
    let mut queue: VecDeque<String> = dependents.get(failed_id).cloned().unwrap_or_default().into();
    while let Some(id) = queue.pop_front() {
        if skipped.contains(&id) {
            continue;
        }
        if let Some(result) = results.get_mut(&id) {
            if matches!(result.status, NodeStatus::Completed | NodeStatus::Failed) {
                continue;
            }
            result.status = NodeStatus::Skipped;
        }
        skipped.insert(id.clone());
        if let Some(children) = dependents.get(&id) {
            queue.extend(children.iter().cloned());
        }
    }
}

fn aggregate_outcome(results: &[DagTaskResult]) -> DagOutcomeStatus {
    let completed = results.iter().filter(|r| r.status == NodeStatus::Completed).count();
    if completed == results.len() {
        DagOutcomeStatus::Completed
    } else if completed == 0 {
        DagOutcomeStatus::Failed
    } else {
        DagOutcomeStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn node(id: &str, deps: &[&str]) -> TaskNode {
        TaskNode {
            id: id.to_string(),
            description: format!("task {id}"),
            assigned_agent_id: None,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            priority: Priority::Normal,
            input_context_selector: None,
        }
    }

    #[tokio::test]
    async fn three_agent_fan_out_completes_after_shared_dependency() {
        let plan = TaskPlan {
            id: Uuid::new_v4(),
            nodes: vec![node("t1", &[]), node("t2", &["t1"]), node("t3", &["t1"])],
        };
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();

        let (results, outcome) = execute_dag(&plan, DagExecutorOptions { max_concurrency: 3, ..Default::default() }, move |node, _ctx, _cancel| {
            let order = order2.clone();
            async move {
                order.lock().await.push(node.id.clone());
                Ok(serde_json::json!({ "id": node.id }))
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome, DagOutcomeStatus::Completed);
        assert!(results.iter().all(|r| r.status == NodeStatus::Completed));
        let observed = order.lock().await.clone();
        assert_eq!(observed[0], "t1");
        assert!(observed.contains(&"t2".to_string()) && observed.contains(&"t3".to_string()));
    }

    #[tokio::test]
    async fn failure_transitively_skips_descendants() {
        let plan = TaskPlan {
            id: Uuid::new_v4(),
            nodes: vec![node("a", &[]), node("b", &["a"]), node("c", &["b"])],
        };

        let (results, outcome) = execute_dag(&plan, DagExecutorOptions::default(), |node, _ctx, _cancel| async move {
            if node.id == "b" {
                anyhow::bail!("boom");
            }
            Ok(serde_json::json!(null))
        })
        .await
        .unwrap();

        assert_eq!(outcome, DagOutcomeStatus::Partial);
        let by_id: HashMap<_, _> = results.iter().map(|r| (r.node_id.clone(), r.status)).collect();
        assert_eq!(by_id["a"], NodeStatus::Completed);
        assert_eq!(by_id["b"], NodeStatus::Failed);
        assert_eq!(by_id["c"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn abort_on_first_error_skips_undispatched_siblings() {
        let plan = TaskPlan {
            id: Uuid::new_v4(),
            nodes: vec![node("a", &[]), node("b", &[]), node("c", &[])],
        };
        let opts = DagExecutorOptions { max_concurrency: 1, abort_on_first_error: true, ..Default::default() };

        let (results, outcome) = execute_dag(&plan, opts, |node, _ctx, _cancel| async move {
            if node.id == "a" {
                anyhow::bail!("boom");
            }
            Ok(serde_json::json!(null))
        })
        .await
        .unwrap();

        assert_eq!(outcome, DagOutcomeStatus::Failed);
        let by_id: HashMap<_, _> = results.iter().map(|r| (r.node_id.clone(), r.status)).collect();
        assert_eq!(by_id["a"], NodeStatus::Failed);
        assert_eq!(by_id["b"], NodeStatus::Skipped);
        assert_eq!(by_id["c"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn higher_priority_node_dispatches_before_lower_priority_tie() {
        let mut high = node("high", &[]);
        high.priority = Priority::High;
        let low = node("low", &[]);
        let plan = TaskPlan { id: Uuid::new_v4(), nodes: vec![low, high] };

        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();
        let started = Arc::new(AtomicUsize::new(0));
        let started2 = started.clone();

        execute_dag(&plan, DagExecutorOptions { max_concurrency: 1, ..Default::default() }, move |node, _ctx, _cancel| {
            let order = order2.clone();
            let started = started2.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                order.lock().await.push(node.id.clone());
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(serde_json::json!(null))
            }
        })
        .await
        .unwrap();

        assert_eq!(order.lock().await[0], "high");
    }

    #[tokio::test]
    async fn rejects_invalid_plan_before_dispatching_any_node() {
        let plan = TaskPlan { id: Uuid::new_v4(), nodes: vec![node("a", &["ghost"])] };
        let err = execute_dag(&plan, DagExecutorOptions::default(), |n, _ctx, _cancel| async move { Ok(serde_json::json!(n.id)) })
            .await
            .unwrap_err();
        assert!(matches!(err, DagValidationError::UnknownDependency { .. }));
    }
}
