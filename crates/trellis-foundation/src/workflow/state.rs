//! 工作流状态
//! Workflow state
//!
//! 运行期共享状态与终版记录：节点结果、执行上下文、运行指标、
//! 历史记录。
//! Shared run state and final records: node results, the execution
//! context, run metrics, and the run record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

pub use trellis_kernel::unit::WorkValue;

/// 当前 Unix 毫秒时间戳
/// Current Unix timestamp in milliseconds
pub(crate) fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 节点执行状态
/// Node execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// 等待前驱
    /// Waiting on predecessors
    Pending,
    /// 已就绪，等待许可
    /// Ready, waiting for a permit
    Queued,
    /// 执行中
    /// Executing
    Running,
    /// 失败后退避等待下一次尝试
    /// Backing off before the next attempt
    Retrying,
    /// 成功完成
    /// Completed successfully
    Completed,
    /// 重试耗尽后失败
    /// Failed after exhausting retries
    Failed,
    /// 因前驱失败被跳过
    /// Skipped because a predecessor failed
    Skipped,
}

impl NodeStatus {
    /// 是否为终态
    /// Whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// 工作流整体状态
/// Overall workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// 未开始
    Pending,
    /// 运行中
    Running,
    /// 全部成功
    Completed,
    /// 部分分支成功（见 [`PartialSuccessPolicy`]）
    /// Some branches succeeded (see [`PartialSuccessPolicy`])
    PartiallyCompleted,
    /// 失败
    Failed,
    /// 超时或被显式取消
    /// Timed out or explicitly cancelled
    Cancelled,
}

/// 部分成功的上报策略
/// Reporting policy when only part of the graph completed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialSuccessPolicy {
    /// 与全部成功一样上报 Completed（原始行为）
    /// Report Completed just like a full success (original behavior)
    #[default]
    Complete,
    /// 上报 PartiallyCompleted
    /// Report PartiallyCompleted
    Partial,
}

/// 节点执行结果
/// Node execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// 节点 ID
    pub node_id: String,
    /// 执行状态
    pub status: NodeStatus,
    /// 输出数据
    pub output: Option<WorkValue>,
    /// 错误信息
    pub error: Option<String>,
    /// 已进行的尝试次数
    /// Attempts made so far
    pub attempts: u32,
    /// 首次开始时间（Unix 毫秒）
    /// First start time (Unix ms)
    pub started_at: Option<u64>,
    /// 结束时间（Unix 毫秒）
    /// Finish time (Unix ms)
    pub completed_at: Option<u64>,
    /// 执行时长（毫秒）
    pub duration_ms: u64,
}

impl NodeResult {
    pub fn pending(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: NodeStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
        }
    }

    pub fn success(node_id: &str, output: WorkValue, duration_ms: u64) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: NodeStatus::Completed,
            output: Some(output),
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: Some(epoch_ms()),
            duration_ms,
        }
    }

    pub fn failed(node_id: &str, error: &str, duration_ms: u64) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: NodeStatus::Failed,
            output: None,
            error: Some(error.to_string()),
            attempts: 0,
            started_at: None,
            completed_at: Some(epoch_ms()),
            duration_ms,
        }
    }

    pub fn skipped(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: NodeStatus::Skipped,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: Some(epoch_ms()),
            duration_ms: 0,
        }
    }
}

/// 执行上下文 - 一次运行的共享状态
/// Execution context - the shared state of one run
///
/// 克隆共享同一份内部状态；引擎是节点结果的唯一写入方。
/// Clones share the same interior state; the engine is the sole writer
/// of node results.
pub struct ExecutionContext {
    /// 工作流 ID
    pub workflow_id: String,
    /// 执行 ID（每次运行唯一）
    /// Execution ID (unique per run)
    pub execution_id: String,
    /// 运行开始时间
    /// Run start time
    pub started_at: DateTime<Utc>,
    /// 运行输入（不可变）
    /// Run input (immutable)
    input: Arc<WorkValue>,
    /// 节点结果
    /// Node results
    results: Arc<RwLock<HashMap<String, NodeResult>>>,
    /// 已解析节点集合
    /// Resolved node set
    resolved: Arc<RwLock<HashSet<String>>>,
    /// 运行中节点集合
    /// Running node set
    running: Arc<RwLock<HashSet<String>>>,
    /// 整体状态
    /// Overall status
    status: Arc<RwLock<WorkflowStatus>>,
}

impl ExecutionContext {
    pub fn new(workflow_id: &str, input: WorkValue) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            execution_id: uuid::Uuid::now_v7().to_string(),
            started_at: Utc::now(),
            input: Arc::new(input),
            results: Arc::new(RwLock::new(HashMap::new())),
            resolved: Arc::new(RwLock::new(HashSet::new())),
            running: Arc::new(RwLock::new(HashSet::new())),
            status: Arc::new(RwLock::new(WorkflowStatus::Pending)),
        }
    }

    /// 运行输入
    /// Run input
    pub fn input(&self) -> &WorkValue {
        &self.input
    }

    /// 把所有节点注册为待执行
    /// Register every node as pending
    pub async fn init_pending(&self, node_ids: &[String]) {
        let mut results = self.results.write().await;
        for id in node_ids {
            results.insert(id.clone(), NodeResult::pending(id));
        }
    }

    /// 更新节点状态
    /// Update a node's status
    pub async fn set_node_status(&self, node_id: &str, status: NodeStatus) {
        if let Some(result) = self.results.write().await.get_mut(node_id) {
            result.status = status;
        }
    }

    /// 获取节点状态
    /// Get a node's status
    pub async fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.results.read().await.get(node_id).map(|r| r.status)
    }

    /// 标记节点开始运行，记下首次开始时间
    /// Mark a node as running, stamping its first start time
    pub async fn mark_running(&self, node_id: &str) {
        {
            let mut results = self.results.write().await;
            if let Some(result) = results.get_mut(node_id) {
                result.status = NodeStatus::Running;
                if result.started_at.is_none() {
                    result.started_at = Some(epoch_ms());
                }
            }
        }
        self.running.write().await.insert(node_id.to_string());
    }

    /// 写入终态结果并移出运行集合
    /// Store a terminal result and drop the node from the running set
    ///
    /// 保留 `mark_running` 记下的开始时间。
    /// Keeps the start time stamped by `mark_running`.
    pub async fn record_result(&self, mut result: NodeResult) {
        let node_id = result.node_id.clone();
        {
            let mut results = self.results.write().await;
            if result.started_at.is_none() {
                result.started_at = results.get(&node_id).and_then(|r| r.started_at);
            }
            results.insert(node_id.clone(), result);
        }
        self.running.write().await.remove(&node_id);
    }

    /// 获取节点结果
    /// Get a node's result
    pub async fn get_result(&self, node_id: &str) -> Option<NodeResult> {
        self.results.read().await.get(node_id).cloned()
    }

    /// 全部结果快照
    /// Snapshot of every result
    pub async fn results(&self) -> HashMap<String, NodeResult> {
        self.results.read().await.clone()
    }

    /// 获取多个节点的输出（仅含已产出的节点）
    /// Outputs of the given nodes (only nodes that produced one)
    pub async fn outputs_of(&self, node_ids: &[&str]) -> HashMap<String, WorkValue> {
        let results = self.results.read().await;
        node_ids
            .iter()
            .filter_map(|id| {
                results
                    .get(*id)
                    .and_then(|r| r.output.clone())
                    .map(|output| (id.to_string(), output))
            })
            .collect()
    }

    /// 标记节点已解析
    /// Mark a node as resolved
    pub async fn mark_resolved(&self, node_id: &str) {
        self.resolved.write().await.insert(node_id.to_string());
    }

    pub async fn is_resolved(&self, node_id: &str) -> bool {
        self.resolved.read().await.contains(node_id)
    }

    /// 已解析集合快照
    /// Snapshot of the resolved set
    pub async fn resolved(&self) -> HashSet<String> {
        self.resolved.read().await.clone()
    }

    pub async fn resolved_count(&self) -> usize {
        self.resolved.read().await.len()
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn status(&self) -> WorkflowStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: WorkflowStatus) {
        *self.status.write().await = status;
    }
}

impl Clone for ExecutionContext {
    fn clone(&self) -> Self {
        Self {
            workflow_id: self.workflow_id.clone(),
            execution_id: self.execution_id.clone(),
            started_at: self.started_at,
            input: self.input.clone(),
            results: self.results.clone(),
            resolved: self.resolved.clone(),
            running: self.running.clone(),
            status: self.status.clone(),
        }
    }
}

/// 运行指标
/// Run metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// 运行墙钟耗时（毫秒）
    /// Wall-clock duration of the run in milliseconds
    pub total_duration_ms: u64,
    /// 实际执行过的节点的耗时
    /// Durations of nodes that actually ran
    pub node_durations: HashMap<String, u64>,
    /// 全部重试次数之和
    /// Total retries across the run
    pub total_retries: u32,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 实际达到的并发峰值
    /// Peak concurrency actually reached
    pub peak_concurrency: usize,
    /// 并行节省：各节点耗时之和减去墙钟
    /// Parallelism savings: sum of node durations minus wall clock
    pub parallelism_savings_ms: u64,
}

impl ExecutionMetrics {
    /// 从终版结果汇总指标
    /// Aggregate metrics from the final results
    pub fn from_results(
        results: &HashMap<String, NodeResult>,
        total_duration_ms: u64,
        peak_concurrency: usize,
    ) -> Self {
        let mut metrics = Self {
            total_duration_ms,
            peak_concurrency,
            ..Self::default()
        };

        let mut sequential_ms: u64 = 0;
        for (node_id, result) in results {
            match result.status {
                NodeStatus::Completed => metrics.completed += 1,
                NodeStatus::Failed => metrics.failed += 1,
                NodeStatus::Skipped => metrics.skipped += 1,
                _ => {}
            }
            metrics.total_retries += result.attempts.saturating_sub(1);
            if matches!(result.status, NodeStatus::Completed | NodeStatus::Failed) {
                metrics
                    .node_durations
                    .insert(node_id.clone(), result.duration_ms);
                sequential_ms += result.duration_ms;
            }
        }
        metrics.parallelism_savings_ms = sequential_ms.saturating_sub(total_duration_ms);
        metrics
    }
}

/// 工作流执行历史记录
/// Workflow execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// 执行 ID
    pub execution_id: String,
    /// 工作流 ID
    pub workflow_id: String,
    /// 工作流名称
    pub workflow_name: String,
    /// 最终状态
    pub status: WorkflowStatus,
    /// 汇聚到出口的最终输出
    /// Final output aggregated at the exit
    pub output: Option<WorkValue>,
    /// 节点执行记录
    pub results: HashMap<String, NodeResult>,
    /// 运行指标
    pub metrics: ExecutionMetrics,
    /// 开始时间
    pub started_at: DateTime<Utc>,
    /// 结束时间
    pub ended_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// 运行是否成功（含部分成功）
    /// Whether the run succeeded (partial success included)
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Completed | WorkflowStatus::PartiallyCompleted
        )
    }

    /// 失败节点 ID 列表
    /// IDs of failed nodes
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.status == NodeStatus::Failed)
            .map(|r| r.node_id.as_str())
            .collect()
    }

    /// 被跳过节点 ID 列表
    /// IDs of skipped nodes
    pub fn skipped_nodes(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.status == NodeStatus::Skipped)
            .map(|r| r.node_id.as_str())
            .collect()
    }
}
