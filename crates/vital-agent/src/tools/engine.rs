//! Workflow execution over the tool registry.
//!
//! Each tool call walks a fixed state machine: pending → running →
//! {success, failed, timed-out}. Terminal states are final and every tool
//! gets exactly one attempt per request. Parallel workflows isolate
//! failures; sequential workflows resolve `depends_on` edges topologically
//! and report dependents of a failed tool as skipped rather than silently
//! omitting them. The whole pass runs under an outer deadline after which
//! whatever has accumulated is returned.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ToolConfig;
use crate::error::ConfigError;
use crate::intent::{ExecutionMode, IntentMatch, ToolPlanEntry};
use crate::tools::stats::PerformanceTracker;
use crate::tools::ToolRegistry;

/// One planned tool invocation, fully bound for this request.
#[derive(Debug, Clone)]
pub struct ToolCallConfig {
    pub tool: String,
    pub action: String,
    pub params: Value,
    /// Tools that must succeed before this one runs (Sequential modes).
    pub depends_on: Vec<String>,
    pub timeout: Duration,
}

/// Terminal state of one tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failed,
    TimedOut,
    Skipped,
}

/// Result payload with statically-typed provenance: downstream consumers
/// can always tell a real backend result from a synthetic fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "provenance", content = "value", rename_all = "snake_case")]
pub enum ToolPayload {
    Real(Value),
    Placeholder(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub status: ToolStatus,
    pub payload: Option<ToolPayload>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    fn skipped(tool: &str, reason: String) -> Self {
        Self {
            tool: tool.to_string(),
            status: ToolStatus::Skipped,
            payload: None,
            error: Some(reason),
            execution_time_ms: 0,
        }
    }

    fn deadline_exceeded(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            status: ToolStatus::TimedOut,
            payload: None,
            error: Some("workflow deadline exceeded".to_string()),
            execution_time_ms: 0,
        }
    }
}

/// Outcome of one orchestration pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub results: HashMap<String, ToolResult>,
    /// Tool names in the order the engine scheduled them; skipped tools
    /// appear here too so nothing is silently omitted.
    pub invocation_order: Vec<String>,
    pub intent: IntentMatch,
}

impl WorkflowResult {
    /// Tools that actually ran (any terminal state except skipped).
    pub fn tools_used(&self) -> Vec<String> {
        self.invocation_order
            .iter()
            .filter(|name| {
                self.results.get(*name).map_or(false, |r| r.status != ToolStatus::Skipped)
            })
            .cloned()
            .collect()
    }

    /// Results in schedule order, for deterministic downstream rendering.
    pub fn ordered_results(&self) -> Vec<&ToolResult> {
        self.invocation_order.iter().filter_map(|name| self.results.get(name)).collect()
    }
}

/// Topological order over `(name, depends_on)` pairs via Kahn's algorithm.
/// Rejects duplicate names, unknown dependencies, and cycles — all of which
/// are configuration bugs that must fail before anything executes.
pub fn dependency_order(items: &[(String, Vec<String>)]) -> Result<Vec<usize>, ConfigError> {
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for (i, (name, _)) in items.iter().enumerate() {
        if index_of.insert(name.as_str(), i).is_some() {
            return Err(ConfigError(format!("duplicate tool '{}' in workflow", name)));
        }
    }

    let mut in_degree = vec![0usize; items.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (i, (name, deps)) in items.iter().enumerate() {
        for dep in deps {
            let &dep_idx = index_of.get(dep.as_str()).ok_or_else(|| {
                ConfigError(format!("tool '{}' depends on unknown tool '{}'", name, dep))
            })?;
            in_degree[i] += 1;
            dependents[dep_idx].push(i);
        }
    }

    let mut queue: Vec<usize> = (0..items.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(items.len());
    let mut head = 0;
    while head < queue.len() {
        let i = queue[head];
        head += 1;
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push(next);
            }
        }
    }

    if order.len() != items.len() {
        let stuck: Vec<&str> = (0..items.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| items[i].0.as_str())
            .collect();
        return Err(ConfigError(format!(
            "cyclic depends_on configuration involving: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

pub struct ToolExecutionEngine {
    registry: Arc<ToolRegistry>,
    tracker: Arc<PerformanceTracker>,
    concurrency: Arc<Semaphore>,
    workflow_ceiling: Duration,
}

impl ToolExecutionEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        tracker: Arc<PerformanceTracker>,
        config: &ToolConfig,
    ) -> Self {
        Self::with_limits(
            registry,
            tracker,
            Duration::from_secs(config.workflow_ceiling_secs),
            config.max_concurrent_calls,
        )
    }

    pub fn with_limits(
        registry: Arc<ToolRegistry>,
        tracker: Arc<PerformanceTracker>,
        workflow_ceiling: Duration,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            registry,
            tracker,
            concurrency: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
            workflow_ceiling,
        }
    }

    /// Bind an intent's tool plan to request parameters, deriving each
    /// call's timeout from the tool's category.
    pub fn configs_from_plan(
        &self,
        plan: &[ToolPlanEntry],
        params: &Value,
        tool_config: &ToolConfig,
    ) -> Result<Vec<ToolCallConfig>, ConfigError> {
        plan.iter()
            .map(|entry| {
                let tool = self
                    .registry
                    .get(&entry.tool)
                    .ok_or_else(|| ConfigError(format!("plan names unknown tool '{}'", entry.tool)))?;
                Ok(ToolCallConfig {
                    tool: entry.tool.clone(),
                    action: entry.action.clone(),
                    params: params.clone(),
                    depends_on: entry.depends_on.clone(),
                    timeout: tool.category().timeout(tool_config),
                })
            })
            .collect()
    }

    /// Run one workflow. The DAG is validated before anything launches;
    /// past that point the call cannot fail — every tool lands in the
    /// result map with a terminal status.
    pub async fn execute(
        &self,
        configs: Vec<ToolCallConfig>,
        mode: ExecutionMode,
        intent: IntentMatch,
    ) -> Result<WorkflowResult, ConfigError> {
        let edges: Vec<(String, Vec<String>)> =
            configs.iter().map(|c| (c.tool.clone(), c.depends_on.clone())).collect();
        let topo = dependency_order(&edges)?;

        let effective_mode = match mode {
            ExecutionMode::Adaptive => {
                if configs.iter().all(|c| c.depends_on.is_empty()) {
                    ExecutionMode::Parallel
                } else {
                    ExecutionMode::Sequential
                }
            }
            other => other,
        };

        let started = Instant::now();
        let workflow = match effective_mode {
            ExecutionMode::Parallel => self.run_parallel(configs, intent).await,
            ExecutionMode::Sequential => self.run_sequential(configs, topo, intent, false).await,
            ExecutionMode::Conditional => self.run_sequential(configs, topo, intent, true).await,
            ExecutionMode::Adaptive => unreachable!("adaptive resolved above"),
        };

        tracing::info!(
            mode = ?effective_mode,
            tools = workflow.invocation_order.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workflow complete"
        );
        Ok(workflow)
    }

    /// Launch everything at once. One tool's failure or timeout never
    /// cancels a sibling's in-flight call; the workflow settles when the
    /// last tool does, bounded by the outer deadline.
    async fn run_parallel(
        &self,
        configs: Vec<ToolCallConfig>,
        intent: IntentMatch,
    ) -> WorkflowResult {
        let invocation_order: Vec<String> = configs.iter().map(|c| c.tool.clone()).collect();
        let settled: Arc<DashMap<String, ToolResult>> = Arc::new(DashMap::new());
        let deadline = Instant::now() + self.workflow_ceiling;

        let mut tasks = JoinSet::new();
        for config in configs {
            let registry = self.registry.clone();
            let tracker = self.tracker.clone();
            let permits = self.concurrency.clone();
            let settled = settled.clone();
            tasks.spawn(async move {
                let result = run_single_call(registry, tracker, permits, config).await;
                settled.insert(result.tool.clone(), result);
            });
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("workflow deadline reached, abandoning unfinished tools");
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut results: HashMap<String, ToolResult> = settled
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for tool in &invocation_order {
            results
                .entry(tool.clone())
                .or_insert_with(|| ToolResult::deadline_exceeded(tool));
        }

        WorkflowResult { results, invocation_order, intent }
    }

    /// Run tools one at a time in dependency order. A failed prerequisite
    /// skips its dependents; with `stop_on_failure` any failure skips all
    /// remaining tools.
    async fn run_sequential(
        &self,
        configs: Vec<ToolCallConfig>,
        topo: Vec<usize>,
        intent: IntentMatch,
        stop_on_failure: bool,
    ) -> WorkflowResult {
        let deadline = Instant::now() + self.workflow_ceiling;
        let mut results: HashMap<String, ToolResult> = HashMap::new();
        let mut invocation_order = Vec::with_capacity(configs.len());
        let mut halted = false;

        for idx in topo {
            let config = &configs[idx];
            invocation_order.push(config.tool.clone());

            if halted {
                results.insert(
                    config.tool.clone(),
                    ToolResult::skipped(&config.tool, "skipped after earlier failure".into()),
                );
                continue;
            }

            let failed_dep = config.depends_on.iter().find(|dep| {
                results.get(dep.as_str()).map_or(true, |r| r.status != ToolStatus::Success)
            });
            if let Some(dep) = failed_dep {
                results.insert(
                    config.tool.clone(),
                    ToolResult::skipped(
                        &config.tool,
                        format!("skipped due to dependency failure: {}", dep),
                    ),
                );
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                results
                    .insert(config.tool.clone(), ToolResult::deadline_exceeded(&config.tool));
                continue;
            }

            let mut bounded = config.clone();
            bounded.timeout = bounded.timeout.min(remaining);
            let result = run_single_call(
                self.registry.clone(),
                self.tracker.clone(),
                self.concurrency.clone(),
                bounded,
            )
            .await;

            if stop_on_failure && result.status != ToolStatus::Success {
                halted = true;
            }
            results.insert(config.tool.clone(), result);
        }

        WorkflowResult { results, invocation_order, intent }
    }
}

/// Drive one call through its state machine and record its stats. Exactly
/// one attempt; on failure of a tool that offers a placeholder, the
/// synthetic result is substituted with placeholder provenance.
async fn run_single_call(
    registry: Arc<ToolRegistry>,
    tracker: Arc<PerformanceTracker>,
    permits: Arc<Semaphore>,
    config: ToolCallConfig,
) -> ToolResult {
    tracing::debug!(tool = %config.tool, action = %config.action, "tool call pending");

    let Some(tool) = registry.get(&config.tool) else {
        tracker.record(&config.tool, false, 0);
        return ToolResult {
            tool: config.tool.clone(),
            status: ToolStatus::Failed,
            payload: None,
            error: Some(format!("unknown tool: {}", config.tool)),
            execution_time_ms: 0,
        };
    };

    let permit = match permits.acquire_owned().await {
        Ok(p) => p,
        Err(_) => {
            tracker.record(&config.tool, false, 0);
            return ToolResult {
                tool: config.tool.clone(),
                status: ToolStatus::Failed,
                payload: None,
                error: Some("execution engine shut down".to_string()),
                execution_time_ms: 0,
            };
        }
    };

    tracing::debug!(tool = %config.tool, "tool call running");
    let start = Instant::now();
    let outcome = tokio::time::timeout(config.timeout, tool.execute(&config.action, &config.params)).await;
    let execution_time_ms = start.elapsed().as_millis() as u64;
    drop(permit);

    match outcome {
        Ok(Ok(value)) => {
            tracker.record(&config.tool, true, execution_time_ms);
            ToolResult {
                tool: config.tool,
                status: ToolStatus::Success,
                payload: Some(ToolPayload::Real(value)),
                error: None,
                execution_time_ms,
            }
        }
        Ok(Err(e)) => {
            tracker.record(&config.tool, false, execution_time_ms);
            if let Some(fallback) = tool.placeholder(&config.action, &config.params) {
                tracing::warn!(tool = %config.tool, error = %e, "tool failed, substituting placeholder result");
                ToolResult {
                    tool: config.tool,
                    status: ToolStatus::Success,
                    payload: Some(ToolPayload::Placeholder(fallback)),
                    error: Some(e.to_string()),
                    execution_time_ms,
                }
            } else {
                tracing::warn!(tool = %config.tool, error = %e, "tool call failed");
                ToolResult {
                    tool: config.tool,
                    status: ToolStatus::Failed,
                    payload: None,
                    error: Some(e.to_string()),
                    execution_time_ms,
                }
            }
        }
        Err(_) => {
            tracker.record(&config.tool, false, execution_time_ms);
            tracing::warn!(tool = %config.tool, timeout_ms = config.timeout.as_millis() as u64, "tool call timed out");
            ToolResult {
                tool: config.tool,
                status: ToolStatus::TimedOut,
                payload: None,
                error: Some("timed out".to_string()),
                execution_time_ms,
            }
        }
    }
}
