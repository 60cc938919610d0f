use crate::context::RunContext;
use async_trait::async_trait;
use common::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// One unit of work in a DAG. Data flows between tasks through the run context.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, context: &RunContext) -> Result<()>;
}

pub struct TaskNode {
    pub id: String,
    pub upstream: Vec<String>,
    task: Arc<dyn Task>,
}

/// A validated task graph. Tasks are kept in topological order.
pub struct Dag {
    id: String,
    nodes: Vec<TaskNode>,
}

pub struct DagBuilder {
    id: String,
    nodes: Vec<TaskNode>,
}

impl DagBuilder {
    pub fn task(mut self, id: &str, upstream: &[&str], task: impl Task + 'static) -> Self {
        self.nodes.push(TaskNode {
            id: id.to_string(),
            upstream: upstream.iter().map(|u| u.to_string()).collect(),
            task: Arc::new(task),
        });
        self
    }

    /// Rejects duplicate ids, unknown upstreams and cycles.
    pub fn build(self) -> Result<Dag> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(Error::Workflow(format!("duplicate task id '{}'", node.id)));
            }
        }
        for node in &self.nodes {
            if let Some(missing) = node.upstream.iter().find(|u| !ids.contains(u.as_str())) {
                return Err(Error::Workflow(format!(
                    "task '{}' depends on unknown task '{}'",
                    node.id, missing
                )));
            }
        }

        let order = topological_order(&self.nodes)?;
        let mut slots: Vec<Option<TaskNode>> = self.nodes.into_iter().map(Some).collect();
        let nodes = order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();

        Ok(Dag { id: self.id, nodes })
    }
}

/// Kahn's algorithm; ties keep declaration order.
fn topological_order(nodes: &[TaskNode]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut indegree: Vec<usize> = nodes.iter().map(|n| n.upstream.len()).collect();
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for upstream in &node.upstream {
            downstream[index[upstream.as_str()]].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &next in &downstream[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = (0..nodes.len())
            .filter(|i| indegree[*i] > 0)
            .map(|i| nodes[i].id.as_str())
            .collect();
        return Err(Error::Workflow(format!("cycle between tasks {:?}", stuck)));
    }
    Ok(order)
}

impl Dag {
    pub fn builder(id: &str) -> DagBuilder {
        DagBuilder {
            id: id.to_string(),
            nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tasks in an order where every task follows its upstreams.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    /// Runs every task whose upstreams succeeded, concurrently where the graph
    /// allows. A failure marks the tasks below it `upstream_failed`; other
    /// branches keep running.
    pub async fn run(&self, context: Arc<RunContext>) -> DagRunReport {
        info!(dag_id = %self.id, run_id = %context.run_id, "Starting DAG run");
        let started = Instant::now();

        let mut states: HashMap<&str, TaskState> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), TaskState::Pending))
            .collect();
        let mut durations: HashMap<&str, Duration> = HashMap::new();
        let mut running = FuturesUnordered::new();

        loop {
            for node in &self.nodes {
                if states[node.id.as_str()] != TaskState::Pending {
                    continue;
                }
                let upstream: Vec<&TaskState> =
                    node.upstream.iter().map(|u| &states[u.as_str()]).collect();

                if upstream.iter().any(|s| s.is_failure()) {
                    warn!(task_id = %node.id, "Upstream failed, skipping task");
                    states.insert(node.id.as_str(), TaskState::UpstreamFailed);
                } else if upstream.iter().all(|s| **s == TaskState::Success) {
                    info!(task_id = %node.id, "Starting task");
                    states.insert(node.id.as_str(), TaskState::Running);

                    let task = node.task.clone();
                    let context = context.clone();
                    let id = node.id.as_str();
                    running.push(async move {
                        let started = Instant::now();
                        let result = task.run(&context).await;
                        (id, result, started.elapsed())
                    });
                }
            }

            let Some((id, result, elapsed)) = running.next().await else {
                break;
            };
            durations.insert(id, elapsed);

            let state = match result {
                Ok(()) => {
                    info!(task_id = %id, elapsed_ms = elapsed.as_millis() as u64, "Task succeeded");
                    TaskState::Success
                }
                Err(e) => {
                    if e.is_precondition() {
                        warn!(task_id = %id, error = %e, "Task failed on its input");
                    } else {
                        error!(task_id = %id, error = %e, "Task failed");
                    }
                    TaskState::Failed(e.to_string())
                }
            };
            states.insert(id, state);
        }

        let tasks: Vec<TaskOutcome> = self
            .nodes
            .iter()
            .map(|n| TaskOutcome {
                task_id: n.id.clone(),
                state: states[n.id.as_str()].clone(),
                duration_ms: durations.get(n.id.as_str()).map(|d| d.as_millis() as u64),
            })
            .collect();

        let report = DagRunReport {
            dag_id: self.id.clone(),
            run_id: context.run_id.clone(),
            tasks,
        };
        info!(
            dag_id = %self.id,
            run_id = %context.run_id,
            succeeded = report.succeeded(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "DAG run finished"
        );
        report
    }
}

impl fmt::Display for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.id)?;
        for node in &self.nodes {
            if node.upstream.is_empty() {
                writeln!(f, "  {}", node.id)?;
            } else {
                writeln!(f, "  {} <- {}", node.id, node.upstream.join(", "))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "error")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed(String),
    UpstreamFailed,
}

impl TaskState {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed(_) | TaskState::UpstreamFailed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    #[serde(flatten)]
    pub state: TaskState,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DagRunReport {
    pub dag_id: String,
    pub run_id: String,
    pub tasks: Vec<TaskOutcome>,
}

impl DagRunReport {
    pub fn succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Success)
    }

    pub fn state(&self, task_id: &str) -> Option<&TaskState> {
        self.tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .map(|t| &t.state)
    }

    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.state, TaskState::Failed(_)))
            .map(|t| t.task_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Record {
        name: &'static str,
        log: Log,
        fail: bool,
    }

    #[async_trait]
    impl Task for Record {
        async fn run(&self, _context: &RunContext) -> Result<()> {
            self.log.lock().unwrap().push(self.name.to_string());
            if self.fail {
                Err(Error::Other(format!("{} broke", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn ok(name: &'static str, log: &Log) -> Record {
        Record {
            name,
            log: log.clone(),
            fail: false,
        }
    }

    fn context() -> Arc<RunContext> {
        Arc::new(RunContext::scheduled(NaiveDate::from_ymd_opt(2025, 1, 24).unwrap()))
    }

    #[test]
    fn orders_tasks_after_their_upstreams() {
        let log = Log::default();
        let dag = Dag::builder("d")
            .task("c", &["a", "b"], ok("c", &log))
            .task("b", &["a"], ok("b", &log))
            .task("a", &[], ok("a", &log))
            .build()
            .unwrap();

        let ids: Vec<&str> = dag.tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_invalid_graphs() {
        let log = Log::default();
        let duplicate = Dag::builder("d")
            .task("a", &[], ok("a", &log))
            .task("a", &[], ok("a", &log))
            .build();
        assert!(duplicate.is_err());

        let unknown = Dag::builder("d").task("a", &["missing"], ok("a", &log)).build();
        assert!(unknown.err().unwrap().to_string().contains("missing"));

        let cycle = Dag::builder("d")
            .task("a", &["b"], ok("a", &log))
            .task("b", &["a"], ok("b", &log))
            .build();
        assert!(cycle.err().unwrap().to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn failure_skips_downstream_but_not_siblings() {
        let log = Log::default();
        let dag = Dag::builder("d")
            .task("start", &[], ok("start", &log))
            .task(
                "broken",
                &["start"],
                Record {
                    name: "broken",
                    log: log.clone(),
                    fail: true,
                },
            )
            .task("after_broken", &["broken"], ok("after_broken", &log))
            .task("sibling", &["start"], ok("sibling", &log))
            .task("join", &["after_broken", "sibling"], ok("join", &log))
            .build()
            .unwrap();

        let report = dag.run(context()).await;

        assert!(!report.succeeded());
        assert_eq!(report.state("sibling"), Some(&TaskState::Success));
        assert_eq!(
            report.state("broken"),
            Some(&TaskState::Failed("broken broke".to_string()))
        );
        assert_eq!(report.state("after_broken"), Some(&TaskState::UpstreamFailed));
        assert_eq!(report.state("join"), Some(&TaskState::UpstreamFailed));
        assert_eq!(report.failed_tasks(), vec!["broken"]);

        let ran = log.lock().unwrap().clone();
        assert!(!ran.contains(&"after_broken".to_string()));
        assert!(!ran.contains(&"join".to_string()));
    }

    #[tokio::test]
    async fn successful_run_reports_every_task() {
        let log = Log::default();
        let dag = Dag::builder("d")
            .task("a", &[], ok("a", &log))
            .task("b", &["a"], ok("b", &log))
            .task("c", &["a"], ok("c", &log))
            .build()
            .unwrap();

        let report = dag.run(context()).await;
        assert!(report.succeeded());
        assert_eq!(report.tasks.len(), 3);
        assert!(report.tasks.iter().all(|t| t.duration_ms.is_some()));
        assert_eq!(log.lock().unwrap()[0], "a");
    }
}
