//! 工作流图结构
//! Workflow graph structure
//!
//! 定义有向无环图的节点、边与调度算法：环检测、拓扑分层、就绪集。
//! Defines the DAG's nodes, edges, and scheduling algorithms: cycle
//! detection, topological leveling, and the ready set.
//!
//! 图经 [`WorkflowBuilder`](super::builder::WorkflowBuilder) 构建，
//! 构建完成后不可变。
//! Graphs are assembled through the builder and are immutable once built.

use super::node::WorkflowNode;
use super::validator::ValidationReport;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
pub use trellis_kernel::workflow::{END, START, is_sentinel};

// ────────────────────── 边与配置 / Edges & config ──────────────────────

/// 有向边
/// Directed edge
///
/// `from`/`to` 可以是哨兵端点（`__start__`/`__end__`）。
/// `from`/`to` may be the sentinel endpoints (`__start__`/`__end__`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    /// 源节点 ID
    /// Source node ID
    pub from: String,
    /// 目标节点 ID
    /// Target node ID
    pub to: String,
    /// 边标签（用于显示）
    /// Edge label (for display purposes)
    pub label: Option<String>,
}

impl WorkflowEdge {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            label: None,
        }
    }

    pub fn labeled(from: &str, to: &str, label: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            label: Some(label.to_string()),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

/// 工作流运行配置
/// Workflow run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 并发上限（运行级信号量的许可数）
    /// Concurrency cap (permits of the run-scoped semaphore)
    pub max_concurrency: usize,
    /// 整体运行超时（毫秒）
    /// Overall run timeout in milliseconds
    pub timeout_ms: u64,
    /// 首个失败即停止派发
    /// Stop dispatching on the first failure
    pub fail_fast: bool,
    /// 逐节点 info 日志
    /// Per-node info logging
    pub verbose: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            timeout_ms: 300_000,
            fail_fast: false,
            verbose: true,
        }
    }
}

impl WorkflowConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

// ────────────────────── 错误 / Errors ──────────────────────

/// 图定义错误
/// Graph definition errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// 校验失败，报告携带全部问题
    /// Validation failed; the report carries every issue
    #[error("workflow validation failed with {} error(s)", .report.errors().count())]
    Invalid { report: ValidationReport },
    /// 图中存在环，路径首尾相同
    /// The graph contains a cycle; the path starts and ends on the same id
    #[error("workflow contains a cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

// ────────────────────── 拓扑结果 / Topology ──────────────────────

/// 拓扑排序结果
/// Topological sort result
///
/// `order` 是一个合法线性扩展；`levels` 把互不依赖的节点分到同一层，
/// 层内按插入顺序排列。
/// `order` is a valid linear extension; `levels` groups mutually
/// independent nodes, each level in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologicalOrder {
    pub order: Vec<String>,
    pub levels: Vec<Vec<String>>,
}

// ────────────────────── 图 / Graph ──────────────────────

/// 工作流图
/// Workflow graph
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// 图 ID
    /// Graph ID
    id: String,
    /// 图名称
    /// Graph name
    name: String,
    /// 图描述
    /// Graph description
    description: String,
    /// 节点映射
    /// Node mapping
    nodes: HashMap<String, WorkflowNode>,
    /// 节点插入顺序（序列化与分层的确定性锚点）
    /// Node insertion order (determinism anchor for serialization and levels)
    node_order: Vec<String>,
    /// 全部边，按插入顺序（含哨兵端点）
    /// All edges in insertion order (sentinel endpoints included)
    edges: Vec<WorkflowEdge>,
    /// 邻接表：源 ID -> 目标 ID 列表（含哨兵）
    /// Adjacency: source ID -> target IDs (sentinels included)
    adjacency: HashMap<String, Vec<String>>,
    /// 反向邻接表：目标 ID -> 源 ID 列表（含哨兵）
    /// Reverse adjacency: target ID -> source IDs (sentinels included)
    reverse: HashMap<String, Vec<String>>,
    /// 运行配置
    /// Run configuration
    config: WorkflowConfig,
}

impl WorkflowGraph {
    pub(crate) fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: Vec::new(),
            adjacency: HashMap::new(),
            reverse: HashMap::new(),
            config: WorkflowConfig::default(),
        }
    }

    pub(crate) fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub(crate) fn set_config(&mut self, config: WorkflowConfig) {
        self.config = config;
    }

    /// 插入节点；重复 ID 覆盖定义但保留原插入位置
    /// Insert a node; a duplicate id replaces the definition but keeps the
    /// original insertion slot
    pub(crate) fn insert_node(&mut self, node: WorkflowNode) {
        let id = node.id.clone();
        if self.nodes.insert(id.clone(), node).is_none() {
            self.node_order.push(id);
        }
    }

    pub(crate) fn insert_edge(&mut self, edge: WorkflowEdge) {
        self.adjacency
            .entry(edge.from.clone())
            .or_default()
            .push(edge.to.clone());
        self.reverse
            .entry(edge.to.clone())
            .or_default()
            .push(edge.from.clone());
        self.edges.push(edge);
    }

    // ────────────────────── 访问器 / Accessors ──────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// 获取节点
    /// Get node
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// 节点 ID，按插入顺序
    /// Node IDs in insertion order
    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    /// 节点迭代器，按插入顺序
    /// Node iterator in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 全部边，按插入顺序
    /// All edges in insertion order
    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// 后继节点（过滤哨兵端点）
    /// Successor nodes (sentinel endpoints filtered out)
    pub fn successors(&self, node_id: &str) -> Vec<&str> {
        self.adjacency
            .get(node_id)
            .map(|targets| {
                targets
                    .iter()
                    .map(|s| s.as_str())
                    .filter(|id| !is_sentinel(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 前驱节点（过滤哨兵端点）
    /// Predecessor nodes (sentinel endpoints filtered out)
    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        self.reverse
            .get(node_id)
            .map(|sources| {
                sources
                    .iter()
                    .map(|s| s.as_str())
                    .filter(|id| !is_sentinel(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 入口节点：没有真实前驱的节点，按插入顺序
    /// Entry nodes: nodes with no real predecessor, in insertion order
    ///
    /// 仅来自 `__start__` 的入边不算前驱。
    /// An incoming edge from `__start__` does not count as a predecessor.
    pub fn start_nodes(&self) -> Vec<&str> {
        self.node_order
            .iter()
            .filter(|id| self.predecessors(id).is_empty())
            .map(|s| s.as_str())
            .collect()
    }

    /// 出口节点：没有真实后继的节点，按插入顺序
    /// Exit nodes: nodes with no real successor, in insertion order
    pub fn end_nodes(&self) -> Vec<&str> {
        self.node_order
            .iter()
            .filter(|id| self.successors(id).is_empty())
            .map(|s| s.as_str())
            .collect()
    }

    /// 向 `__end__` 供给结果的节点，按插入顺序
    /// Nodes feeding `__end__`, in insertion order
    ///
    /// 没有显式 `-> __end__` 边时退化为 [`end_nodes`](Self::end_nodes)。
    /// Falls back to [`end_nodes`](Self::end_nodes) when no explicit
    /// `-> __end__` edge exists.
    pub fn end_feeders(&self) -> Vec<&str> {
        let explicit: HashSet<&str> = self
            .reverse
            .get(END)
            .map(|sources| sources.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();
        if explicit.is_empty() {
            return self.end_nodes();
        }
        self.node_order
            .iter()
            .map(|s| s.as_str())
            .filter(|id| explicit.contains(id))
            .collect()
    }

    // ────────────────────── 调度算法 / Scheduling ──────────────────────

    /// 检测环，返回实际环路径（首尾相同）
    /// Detect a cycle and return the actual cyclic path (first == last)
    ///
    /// 三色 DFS，覆盖含哨兵端点的完整邻接表。根的顺序固定：
    /// 先 `__start__`，再按节点插入顺序，结果是确定性的。
    /// Three-color DFS over the full adjacency, sentinel endpoints
    /// included. Roots are visited `__start__` first, then nodes in
    /// insertion order, so the result is deterministic.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut in_progress: HashSet<&str> = HashSet::new();
        let mut done: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        let mut roots: Vec<&str> = Vec::new();
        if self.adjacency.contains_key(START) {
            roots.push(START);
        }
        roots.extend(self.node_order.iter().map(|s| s.as_str()));

        for root in roots {
            if done.contains(root) {
                continue;
            }
            if let Some(cycle) = self.dfs_cycle(root, &mut in_progress, &mut done, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        in_progress: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        in_progress.insert(node);
        path.push(node);

        if let Some(targets) = self.adjacency.get(node) {
            for next in targets {
                if done.contains(next.as_str()) {
                    continue;
                }
                if in_progress.contains(next.as_str()) {
                    // 回边：从 next 在路径中的首次出现截取环
                    // Back edge: slice the cycle from next's first occurrence
                    let first = path.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[first..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                if let Some(cycle) = self.dfs_cycle(next, in_progress, done, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        in_progress.remove(node);
        done.insert(node);
        None
    }

    /// 拓扑排序（Kahn 分层）
    /// Topological sort (leveled Kahn)
    ///
    /// 先跑环检测；无环时真实子图必然可排序。层内按插入顺序，
    /// 多次调用结果一致。
    /// Cycle detection runs first; without a cycle the real subgraph is
    /// always sortable. Levels keep insertion order and repeated calls
    /// return the same result.
    pub fn topological_sort(&self) -> Result<TopologicalOrder, GraphError> {
        if let Some(path) = self.detect_cycle() {
            return Err(GraphError::Cycle { path });
        }

        let mut in_degree: HashMap<&str, usize> = self
            .node_order
            .iter()
            .map(|id| (id.as_str(), self.predecessors(id).len()))
            .collect();

        let mut order: Vec<String> = Vec::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        while order.len() < self.node_order.len() {
            let level: Vec<String> = self
                .node_order
                .iter()
                .filter(|id| in_degree.get(id.as_str()) == Some(&0))
                .cloned()
                .collect();
            if level.is_empty() {
                // detect_cycle 已排除环，防御性兜底
                // detect_cycle already ruled out cycles
                break;
            }
            for id in &level {
                in_degree.remove(id.as_str());
                for next in self.successors(id) {
                    if let Some(degree) = in_degree.get_mut(next) {
                        *degree = degree.saturating_sub(1);
                    }
                }
                order.push(id.clone());
            }
            levels.push(level);
        }

        Ok(TopologicalOrder { order, levels })
    }

    /// 就绪集：未解析且全部真实前驱已解析的节点，按插入顺序
    /// Ready set: unresolved nodes whose every real predecessor is
    /// resolved, in insertion order
    ///
    /// 来自 `__start__` 的边始终视为已满足。
    /// Edges from `__start__` always count as satisfied.
    pub fn ready_nodes(&self, resolved: &HashSet<String>) -> Vec<String> {
        self.node_order
            .iter()
            .filter(|id| !resolved.contains(*id))
            .filter(|id| {
                self.predecessors(id)
                    .iter()
                    .all(|pred| resolved.contains(*pred))
            })
            .cloned()
            .collect()
    }

    // ────────────────────── 导出 / Export ──────────────────────

    /// 导出为 DOT 格式（用于可视化）
    /// Export to DOT format (for visualization)
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        dot.push_str(&format!("digraph \"{}\" {{\n", self.name));
        dot.push_str("  rankdir=TB;\n");
        dot.push_str("  node [shape=box];\n\n");

        if self.adjacency.contains_key(START) {
            dot.push_str(&format!(
                "  \"{START}\" [label=\"start\", shape=ellipse, style=filled, fillcolor=green];\n"
            ));
        }
        if self.reverse.contains_key(END) {
            dot.push_str(&format!(
                "  \"{END}\" [label=\"end\", shape=ellipse, style=filled, fillcolor=red];\n"
            ));
        }
        for node in self.nodes() {
            dot.push_str(&format!(
                "  \"{}\" [label=\"{}\\n({})\", style=filled, fillcolor=white];\n",
                node.id, node.name, node.unit
            ));
        }

        dot.push('\n');

        for edge in &self.edges {
            let label = edge.label.as_deref().unwrap_or("");
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                edge.from, edge.to, label
            ));
        }

        dot.push_str("}\n");
        dot
    }

    /// Export to JSON format (for web visualization)
    pub fn to_json(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .nodes()
            .map(|node| {
                serde_json::json!({
                    "id": node.id,
                    "name": node.name,
                    "unit": node.unit,
                    "timeout_ms": node.timeout_ms,
                    "metadata": node.metadata,
                })
            })
            .collect();

        let edges: Vec<serde_json::Value> = self
            .edges
            .iter()
            .map(|edge| {
                serde_json::json!({
                    "from": edge.from,
                    "to": edge.to,
                    "label": edge.label,
                })
            })
            .collect();

        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "nodes": nodes,
            "edges": edges,
            "start_nodes": self.start_nodes(),
            "end_nodes": self.end_nodes(),
            "config": self.config,
        })
    }
}
