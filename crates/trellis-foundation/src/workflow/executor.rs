//! 工作流执行器
//! Workflow executor
//!
//! 就绪集调度：节点的全部真实前驱解析完毕即可派发，许可池限制
//! 同时运行的单元数量。失败沿出边传播为跳过，运行报告在所有节点
//! 解析（或停机排空）后生成。
//! Ready-set scheduling: a node dispatches once every real predecessor
//! has resolved, with a permit pool bounding how many units run at
//! once. Failures propagate along outgoing edges as skips, and the run
//! report is produced after every node has resolved (or the halt has
//! drained).
//!
//! 执行器可跨运行复用；每次运行的全部状态都在 [`ExecutionContext`]
//! 里，互不干扰。
//! An executor is reusable across runs; all per-run state lives in the
//! [`ExecutionContext`], so concurrent runs do not interfere.

use super::execution_event::ExecutionEvent;
use super::graph::WorkflowGraph;
use super::state::{
    ExecutionContext, ExecutionMetrics, ExecutionRecord, NodeResult, NodeStatus,
    PartialSuccessPolicy, WorkValue, WorkflowStatus, epoch_ms,
};
use super::validator::{ValidationReport, WorkflowValidator};
use crate::retry::{RetryPolicy, with_retry};
use crate::semaphore::{Semaphore, SemaphoreError};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trellis_kernel::unit::UnitRegistry;

/// 执行期错误
/// Errors surfaced by a run
///
/// 节点级失败不在此列：它们记录在 [`ExecutionRecord`] 里，运行本身
/// 仍然返回 Ok。
/// Node-level failures are not listed here: they land in the
/// [`ExecutionRecord`] and the run itself still returns Ok.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// 图未通过静态校验
    /// The graph did not pass static validation
    #[error("workflow validation failed with {} error(s)", .report.errors().count())]
    InvalidGraph {
        /// 完整校验报告
        /// The full validation report
        report: ValidationReport,
    },

    /// 没有在途任务但仍有节点未解析
    /// No task in flight yet nodes remain unresolved
    ///
    /// 通过 [`execute`](WorkflowExecutor::execute) 进入的运行不会走到
    /// 这里，校验已把环拒绝掉了。
    /// Runs entered through [`execute`](WorkflowExecutor::execute)
    /// never reach this; validation has already rejected cycles.
    #[error("workflow run stalled with {} unresolved node(s): [{}]", .pending.len(), .pending.join(", "))]
    Stalled {
        /// 未解析的节点 ID
        /// Unresolved node IDs
        pending: Vec<String>,
    },

    /// 许可池创建失败
    /// The permit pool could not be created
    #[error(transparent)]
    Semaphore(#[from] SemaphoreError),
}

/// 工作流执行器
/// Workflow executor
///
/// 持有单元注册表与跨运行的执行策略。用消费式构建器配置：
/// Holds the unit registry and the policies shared across runs.
/// Configure with the consuming builders:
///
/// ```
/// use std::sync::Arc;
/// use trellis_foundation::retry::RetryPolicy;
/// use trellis_foundation::workflow::executor::WorkflowExecutor;
/// use trellis_foundation::workflow::state::PartialSuccessPolicy;
/// use trellis_kernel::unit::UnitRegistry;
///
/// let registry = Arc::new(UnitRegistry::new());
/// let executor = WorkflowExecutor::new(registry)
///     .with_default_retry(RetryPolicy::default())
///     .with_partial_success(PartialSuccessPolicy::Partial);
/// ```
pub struct WorkflowExecutor {
    /// 工作单元注册表
    /// Unit-of-work registry
    registry: Arc<UnitRegistry>,
    /// 节点未声明重试策略时的默认值
    /// Fallback retry policy for nodes that declare none
    default_retry: Option<RetryPolicy>,
    /// 弹性运行部分成功时的上报口径
    /// How a resilient run with partial success is reported
    partial_success: PartialSuccessPolicy,
    /// 可选的执行事件通道
    /// Optional execution event channel
    event_tx: Option<mpsc::Sender<ExecutionEvent>>,
}

impl WorkflowExecutor {
    /// 创建执行器：无默认重试，部分成功按原始口径上报
    /// Create an executor: no default retry, partial success reported
    /// the original way
    pub fn new(registry: Arc<UnitRegistry>) -> Self {
        Self {
            registry,
            default_retry: None,
            partial_success: PartialSuccessPolicy::default(),
            event_tx: None,
        }
    }

    /// 设置默认重试策略，节点自身的策略优先
    /// Set the default retry policy; a node's own policy wins
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    /// 设置部分成功的上报口径
    /// Set how partial success is reported
    pub fn with_partial_success(mut self, policy: PartialSuccessPolicy) -> Self {
        self.partial_success = policy;
        self
    }

    /// 挂载事件通道；通道满时发送端等待，慢消费者会拖慢引擎
    /// Attach an event channel; sends wait when it is full, so a slow
    /// consumer slows the engine down
    pub fn with_event_sender(mut self, tx: mpsc::Sender<ExecutionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 校验并执行整个工作流
    /// Validate and execute the whole workflow
    ///
    /// 节点失败不会让本方法返回 Err；查看返回记录里的状态与结果。
    /// A node failure does not turn into an Err here; inspect the
    /// status and results on the returned record.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        input: WorkValue,
    ) -> Result<ExecutionRecord, ExecutionError> {
        self.execute_with_cancellation(graph, input, CancellationToken::new())
            .await
    }

    /// 带取消令牌执行；令牌触发后停止派发并排空在途节点
    /// Execute with a cancellation token; once it fires, dispatch stops
    /// and in-flight nodes are drained
    pub async fn execute_with_cancellation(
        &self,
        graph: &WorkflowGraph,
        input: WorkValue,
        cancel: CancellationToken,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let report = WorkflowValidator::validate(graph);
        if !report.is_valid() {
            error!(
                "Workflow {} rejected: {} validation error(s)",
                graph.id(),
                report.errors().count()
            );
            return Err(ExecutionError::InvalidGraph { report });
        }
        self.run_graph(graph, input, cancel).await
    }

    /// 运行主循环，假定图已通过校验
    /// The run loop proper; assumes the graph already validated
    async fn run_graph(
        &self,
        graph: &WorkflowGraph,
        input: WorkValue,
        cancel: CancellationToken,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let config = graph.config().clone();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(config.timeout_ms);

        let ctx = ExecutionContext::new(graph.id(), input);
        ctx.init_pending(graph.node_ids()).await;
        ctx.set_status(WorkflowStatus::Running).await;

        info!(
            "Starting workflow run: {} ({})",
            graph.name(),
            ctx.execution_id
        );
        self.emit_event(ExecutionEvent::WorkflowStarted {
            workflow_id: graph.id().to_string(),
            execution_id: ctx.execution_id.clone(),
            workflow_name: graph.name().to_string(),
            started_at: epoch_ms(),
        })
        .await;

        let semaphore =
            Semaphore::named(format!("workflow:{}", graph.id()), config.max_concurrency)?;

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut join_set: JoinSet<NodeResult> = JoinSet::new();
        let mut resolved: HashSet<String> = HashSet::new();
        let mut dispatched: HashSet<String> = HashSet::new();
        // 已解析但未成功的节点与其终态，驱动跳过传播
        // Resolved-but-unsuccessful nodes and their terminal status,
        // drives skip propagation
        let mut unsuccessful: HashMap<String, NodeStatus> = HashMap::new();
        let mut halted = false;
        let mut timed_out = false;
        let mut cancelled = false;

        loop {
            // 跳过传播到不动点。停机后也要继续，下游节点必须离开
            // Pending 态。
            // Propagate skips to a fixpoint. Keeps running after a halt;
            // downstream nodes must leave Pending.
            loop {
                let mut newly: Vec<(String, String)> = Vec::new();
                for id in graph.node_ids() {
                    if resolved.contains(id) || dispatched.contains(id) {
                        continue;
                    }
                    if let Some(pred) = graph
                        .predecessors(id)
                        .iter()
                        .find(|p| unsuccessful.contains_key(**p))
                    {
                        newly.push((id.clone(), (*pred).to_string()));
                    }
                }
                if newly.is_empty() {
                    break;
                }
                for (id, pred) in newly {
                    let reason = match unsuccessful.get(&pred) {
                        Some(NodeStatus::Skipped) => {
                            format!("predecessor '{pred}' was skipped")
                        }
                        _ => format!("predecessor '{pred}' failed"),
                    };
                    if config.verbose {
                        info!("Skipping node {}: {}", id, reason);
                    }
                    ctx.record_result(NodeResult::skipped(&id)).await;
                    ctx.mark_resolved(&id).await;
                    resolved.insert(id.clone());
                    unsuccessful.insert(id.clone(), NodeStatus::Skipped);
                    self.emit_event(ExecutionEvent::NodeSkipped {
                        node_id: id,
                        reason,
                    })
                    .await;
                }
            }

            // 派发就绪节点；停机后不再产生新任务
            // Dispatch ready nodes; a halt produces no new tasks
            if !halted {
                for node_id in graph.ready_nodes(&resolved) {
                    if !dispatched.insert(node_id.clone()) {
                        continue;
                    }
                    let Some(node) = graph.node(&node_id) else {
                        continue;
                    };

                    ctx.set_node_status(&node_id, NodeStatus::Queued).await;
                    self.emit_event(ExecutionEvent::NodeQueued {
                        node_id: node_id.clone(),
                    })
                    .await;

                    let node = node.clone();
                    let pred_ids: Vec<String> = graph
                        .predecessors(&node_id)
                        .into_iter()
                        .map(String::from)
                        .collect();
                    let ctx_clone = ctx.clone();
                    let registry = Arc::clone(&self.registry);
                    let semaphore = semaphore.clone();
                    let default_retry = self.default_retry.clone();
                    let event_tx = self.event_tx.clone();
                    let current = Arc::clone(&current);
                    let peak = Arc::clone(&peak);
                    let verbose = config.verbose;

                    join_set.spawn(async move {
                        // 未注册的单元直接判失败，不占用许可
                        // An unregistered unit fails outright without
                        // consuming a permit
                        let Some(unit) = registry.get(&node.unit) else {
                            let msg = format!("no unit of work registered for '{}'", node.unit);
                            error!("Node {} cannot run: {}", node.id, msg);
                            if let Some(ref tx) = event_tx {
                                let _ = tx
                                    .send(ExecutionEvent::NodeFailed {
                                        node_id: node.id.clone(),
                                        error: msg.clone(),
                                        attempts: 0,
                                        duration_ms: 0,
                                    })
                                    .await;
                            }
                            return NodeResult::failed(&node.id, &msg, 0);
                        };

                        let _permit = match semaphore.acquire().await {
                            Ok(permit) => permit,
                            Err(SemaphoreError::Drained { .. }) => {
                                // 停机排空把还在排队的节点收敛为跳过
                                // A halt drain settles still-queued
                                // nodes as skips
                                if let Some(ref tx) = event_tx {
                                    let _ = tx
                                        .send(ExecutionEvent::NodeSkipped {
                                            node_id: node.id.clone(),
                                            reason: "workflow halted before a permit was granted"
                                                .to_string(),
                                        })
                                        .await;
                                }
                                return NodeResult::skipped(&node.id);
                            }
                            Err(e) => {
                                let msg = format!("permit unavailable: {e}");
                                error!("Node {} cannot run: {}", node.id, msg);
                                if let Some(ref tx) = event_tx {
                                    let _ = tx
                                        .send(ExecutionEvent::NodeFailed {
                                            node_id: node.id.clone(),
                                            error: msg.clone(),
                                            attempts: 0,
                                            duration_ms: 0,
                                        })
                                        .await;
                                }
                                return NodeResult::failed(&node.id, &msg, 0);
                            }
                        };

                        let running = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(running, Ordering::SeqCst);

                        ctx_clone.mark_running(&node.id).await;
                        if verbose {
                            info!("Node {} started ({})", node.id, node.unit);
                        }
                        if let Some(ref tx) = event_tx {
                            let _ = tx
                                .send(ExecutionEvent::NodeStarted {
                                    node_id: node.id.clone(),
                                    node_name: node.name.clone(),
                                })
                                .await;
                        }
                        let node_started = Instant::now();

                        // 多前驱先汇合分支输出再映射输入
                        // With multiple predecessors the branch outputs
                        // merge before input mapping
                        let pred_refs: Vec<&str> = pred_ids.iter().map(|s| s.as_str()).collect();
                        let pred_outputs = ctx_clone.outputs_of(&pred_refs).await;
                        if pred_ids.len() > 1 {
                            if let Some(ref tx) = event_tx {
                                let _ = tx
                                    .send(ExecutionEvent::BranchMerged {
                                        node_id: node.id.clone(),
                                        merged_from: pred_ids.clone(),
                                    })
                                    .await;
                            }
                        }
                        let input = node.resolve_input(&pred_outputs, ctx_clone.input());

                        // 节点策略优先于执行器默认；两者皆无则只跑一次
                        // The node policy wins over the executor
                        // default; with neither, one attempt only
                        let policy = node.retry.clone().or(default_retry).unwrap_or_else(|| {
                            RetryPolicy {
                                max_attempts: 1,
                                ..RetryPolicy::default()
                            }
                        });

                        let attempt_ctx = ctx_clone.clone();
                        let attempt_node_id = node.id.clone();
                        let retry_ctx = ctx_clone.clone();
                        let retry_node_id = node.id.clone();
                        let retry_tx = event_tx.clone();
                        let options = policy
                            .to_options()
                            .on_attempt(move |attempt| {
                                let ctx = attempt_ctx.clone();
                                let node_id = attempt_node_id.clone();
                                async move {
                                    // 退避结束，回到运行态
                                    // Backoff over, back to running
                                    if attempt > 1 {
                                        ctx.set_node_status(&node_id, NodeStatus::Running).await;
                                    }
                                }
                            })
                            .on_retry(move |notice| {
                                let ctx = retry_ctx.clone();
                                let node_id = retry_node_id.clone();
                                let tx = retry_tx.clone();
                                async move {
                                    warn!(
                                        "Node {} attempt {}/{} failed, retrying in {}ms: {}",
                                        node_id,
                                        notice.attempt,
                                        notice.max_attempts,
                                        notice.delay_ms,
                                        notice.error
                                    );
                                    ctx.set_node_status(&node_id, NodeStatus::Retrying).await;
                                    if let Some(tx) = tx {
                                        let _ = tx
                                            .send(ExecutionEvent::NodeRetrying {
                                                node_id: node_id.clone(),
                                                attempt: notice.attempt,
                                                max_attempts: notice.max_attempts,
                                                last_error: Some(notice.error.clone()),
                                            })
                                            .await;
                                    }
                                }
                            });

                        let attempt_timeout = node.timeout_ms;
                        let run_unit = Arc::clone(&unit);
                        let run_input = input.clone();
                        let outcome = with_retry(
                            move || {
                                let unit = Arc::clone(&run_unit);
                                let input = run_input.clone();
                                async move {
                                    match attempt_timeout {
                                        Some(ms) => {
                                            match tokio::time::timeout(
                                                Duration::from_millis(ms),
                                                unit.run(input),
                                            )
                                            .await
                                            {
                                                Ok(result) => result,
                                                Err(_) => {
                                                    Err(format!("attempt timed out after {ms}ms"))
                                                }
                                            }
                                        }
                                        None => unit.run(input).await,
                                    }
                                }
                            },
                            &options,
                        )
                        .await;

                        let duration_ms = node_started.elapsed().as_millis() as u64;
                        let mut result = match outcome.result {
                            Some(output) => NodeResult::success(&node.id, output, duration_ms),
                            None => {
                                let error = outcome
                                    .error
                                    .clone()
                                    .unwrap_or_else(|| "unit of work failed".to_string());
                                NodeResult::failed(&node.id, &error, duration_ms)
                            }
                        };
                        result.attempts = outcome.attempts;

                        if result.status == NodeStatus::Completed {
                            if verbose {
                                info!(
                                    "Node {} completed in {}ms ({} attempt(s))",
                                    node.id, duration_ms, outcome.attempts
                                );
                            }
                        } else {
                            error!(
                                "Node {} failed after {} attempt(s): {}",
                                node.id,
                                outcome.attempts,
                                result.error.as_deref().unwrap_or("unknown error")
                            );
                        }

                        if let Some(ref tx) = event_tx {
                            let event = match result.status {
                                NodeStatus::Completed => ExecutionEvent::NodeCompleted {
                                    node_id: node.id.clone(),
                                    output: result.output.clone(),
                                    duration_ms,
                                },
                                _ => ExecutionEvent::NodeFailed {
                                    node_id: node.id.clone(),
                                    error: result.error.clone().unwrap_or_default(),
                                    attempts: result.attempts,
                                    duration_ms,
                                },
                            };
                            let _ = tx.send(event).await;
                        }

                        current.fetch_sub(1, Ordering::SeqCst);
                        result
                    });
                }
            }

            if resolved.len() == graph.node_count() {
                break;
            }

            // 没有在途任务：停机则收尾，否则运行已卡死
            // Nothing in flight: finish up when halted, otherwise the
            // run has stalled
            if join_set.is_empty() {
                if halted {
                    break;
                }
                let pending: Vec<String> = graph
                    .node_ids()
                    .iter()
                    .filter(|id| !resolved.contains(*id))
                    .cloned()
                    .collect();
                error!(
                    "Workflow {} stalled with {} unresolved node(s)",
                    graph.name(),
                    pending.len()
                );
                return Err(ExecutionError::Stalled { pending });
            }

            // 等待任一任务结束；截止时间与取消只在未停机时参与竞争
            // Wait for a task to finish; the deadline and cancellation
            // only race while not yet halted
            let joined = if halted {
                join_set.join_next().await
            } else {
                tokio::select! {
                    joined = join_set.join_next() => joined,
                    _ = tokio::time::sleep_until(deadline) => {
                        warn!(
                            "Workflow {} hit its {}ms deadline, draining in-flight nodes",
                            graph.name(),
                            config.timeout_ms
                        );
                        timed_out = true;
                        halted = true;
                        let released = semaphore.drain();
                        if released > 0 && config.verbose {
                            info!("Released {} queued node(s) without a permit", released);
                        }
                        continue;
                    }
                    _ = cancel.cancelled() => {
                        warn!(
                            "Workflow {} cancelled, draining in-flight nodes",
                            graph.name()
                        );
                        cancelled = true;
                        halted = true;
                        let released = semaphore.drain();
                        if released > 0 && config.verbose {
                            info!("Released {} queued node(s) without a permit", released);
                        }
                        continue;
                    }
                }
            };

            let Some(joined) = joined else {
                continue;
            };
            let result = joined.unwrap_or_else(|e| {
                NodeResult::failed("unknown", &format!("node task panicked: {e}"), 0)
            });

            let node_id = result.node_id.clone();
            let status = result.status;
            ctx.record_result(result).await;

            if graph.contains_node(&node_id) {
                ctx.mark_resolved(&node_id).await;
                resolved.insert(node_id.clone());
                match status {
                    NodeStatus::Failed => {
                        unsuccessful.insert(node_id.clone(), NodeStatus::Failed);
                        if config.fail_fast && !halted {
                            warn!("Node {} failed, halting dispatch (fail fast)", node_id);
                            halted = true;
                        }
                    }
                    NodeStatus::Skipped => {
                        unsuccessful.insert(node_id.clone(), NodeStatus::Skipped);
                    }
                    _ => {}
                }
            }
        }

        let total_duration_ms = started.elapsed().as_millis() as u64;
        let results = ctx.results().await;

        let mut failed_ids: Vec<String> = results
            .iter()
            .filter(|(_, r)| r.status == NodeStatus::Failed)
            .map(|(id, _)| id.clone())
            .collect();
        failed_ids.sort();

        let (status, output) = if cancelled {
            (WorkflowStatus::Cancelled, None)
        } else if timed_out {
            (WorkflowStatus::Cancelled, None)
        } else if failed_ids.is_empty() {
            (
                WorkflowStatus::Completed,
                aggregate_end_output(graph, &results),
            )
        } else if config.fail_fast {
            (WorkflowStatus::Failed, None)
        } else {
            // 弹性运行：只要还有末端供给节点成功完成就算（部分）成功
            // Resilient run: it still counts as (partial) success while
            // any end feeder completed
            let output = aggregate_end_output(graph, &results);
            if output.is_none() {
                (WorkflowStatus::Failed, None)
            } else {
                match self.partial_success {
                    PartialSuccessPolicy::Complete => (WorkflowStatus::Completed, output),
                    PartialSuccessPolicy::Partial => (WorkflowStatus::PartiallyCompleted, output),
                }
            }
        };
        ctx.set_status(status).await;

        match status {
            WorkflowStatus::Cancelled if timed_out => {
                error!(
                    "Workflow {} timed out after {}ms ({}ms elapsed)",
                    graph.name(),
                    config.timeout_ms,
                    total_duration_ms
                );
                self.emit_event(ExecutionEvent::WorkflowTimeout {
                    workflow_id: graph.id().to_string(),
                    execution_id: ctx.execution_id.clone(),
                    timeout_ms: config.timeout_ms,
                    total_duration_ms,
                })
                .await;
            }
            WorkflowStatus::Cancelled => {
                warn!(
                    "Workflow {} cancelled after {}ms",
                    graph.name(),
                    total_duration_ms
                );
                self.emit_event(ExecutionEvent::WorkflowCancelled {
                    workflow_id: graph.id().to_string(),
                    execution_id: ctx.execution_id.clone(),
                    total_duration_ms,
                })
                .await;
            }
            WorkflowStatus::Failed => {
                let summary = format!(
                    "{} node(s) failed: [{}]",
                    failed_ids.len(),
                    failed_ids.join(", ")
                );
                error!("Workflow {} failed: {}", graph.name(), summary);
                self.emit_event(ExecutionEvent::WorkflowFailed {
                    workflow_id: graph.id().to_string(),
                    execution_id: ctx.execution_id.clone(),
                    error: summary,
                    total_duration_ms,
                })
                .await;
            }
            _ => {
                info!(
                    "Workflow {} finished as {:?} in {}ms",
                    graph.name(),
                    status,
                    total_duration_ms
                );
                self.emit_event(ExecutionEvent::WorkflowCompleted {
                    workflow_id: graph.id().to_string(),
                    execution_id: ctx.execution_id.clone(),
                    final_output: output.clone(),
                    total_duration_ms,
                })
                .await;
            }
        }

        let metrics = ExecutionMetrics::from_results(
            &results,
            total_duration_ms,
            peak.load(Ordering::SeqCst),
        );

        Ok(ExecutionRecord {
            execution_id: ctx.execution_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            workflow_name: graph.name().to_string(),
            status,
            output,
            results,
            metrics,
            started_at: ctx.started_at,
            ended_at: Utc::now(),
        })
    }

    /// 接收端关闭时静默丢弃；事件流只是旁路，不是运行的前提
    /// Silently drops when the receiver is gone; the event stream is a
    /// tap, not a prerequisite of the run
    async fn emit_event(&self, event: ExecutionEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// 汇聚末端供给节点的输出作为最终输出
/// Aggregate the end feeders' outputs into the final output
///
/// 单个成功的供给节点直通其输出；多个合并为以节点 ID 为键的 Map；
/// 一个都没有则为 None。
/// A single completed feeder passes its output through, several merge
/// into a map keyed by node ID, and none at all yields None.
fn aggregate_end_output(
    graph: &WorkflowGraph,
    results: &HashMap<String, NodeResult>,
) -> Option<WorkValue> {
    let completed: Vec<(&str, &WorkValue)> = graph
        .end_feeders()
        .into_iter()
        .filter_map(|id| {
            results
                .get(id)
                .filter(|r| r.status == NodeStatus::Completed)
                .and_then(|r| r.output.as_ref())
                .map(|output| (id, output))
        })
        .collect();

    match completed.as_slice() {
        [] => None,
        [(_, single)] => Some((*single).clone()),
        many => Some(WorkValue::Map(
            many.iter()
                .map(|(id, output)| ((*id).to_string(), (*output).clone()))
                .collect(),
        )),
    }
}
