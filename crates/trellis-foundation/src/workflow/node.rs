//! 工作流节点
//! Workflow node
//!
//! 节点是工作单元在图中的落位：通过名称引用注册表里的单元，
//! 并携带可选的输入映射、节点级重试策略与单次尝试超时。
//! A node is the in-graph placement of a unit of work: it references a
//! registered unit by name and carries an optional input mapper, a
//! node-level retry policy, and a per-attempt timeout.

use super::state::WorkValue;
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 输入映射函数：(前驱输出, 原始运行输入) -> 节点输入
/// Input mapper: (predecessor outputs, original run input) -> node input
///
/// 必须是纯函数；引擎在派发前同步调用一次。
/// Must be pure; the engine calls it synchronously once before dispatch.
pub type InputMapper =
    Arc<dyn Fn(&HashMap<String, WorkValue>, &WorkValue) -> WorkValue + Send + Sync>;

/// 默认输入映射
/// Default input mapping
///
/// 无前驱时转发运行输入；单前驱时转发其输出；
/// 多前驱时合并为以前驱 ID 为键的 Map。
/// Forwards the run input when there are no predecessors, the single
/// predecessor's output when there is exactly one, and a map keyed by
/// predecessor id otherwise.
pub fn default_input_mapping(
    predecessors: &HashMap<String, WorkValue>,
    run_input: &WorkValue,
) -> WorkValue {
    match predecessors.len() {
        0 => run_input.clone(),
        1 => predecessors
            .values()
            .next()
            .cloned()
            .unwrap_or(WorkValue::Null),
        _ => WorkValue::Map(predecessors.clone()),
    }
}

/// 工作流节点
/// Workflow node
///
/// 图构建完成后不可变；映射函数不参与序列化。
/// Immutable once the graph is built; the mapper is code and is not
/// serialized.
#[derive(Clone)]
pub struct WorkflowNode {
    /// 节点 ID（图内唯一）
    /// Node ID (unique within a graph)
    pub id: String,
    /// 展示名称
    /// Display name
    pub name: String,
    /// 引用的工作单元名称
    /// Referenced unit-of-work name
    pub unit: String,
    /// 单次尝试超时（毫秒）
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// 节点级重试策略（未设置时使用执行器默认值）
    /// Node-level retry policy (executor default when unset)
    pub retry: Option<RetryPolicy>,
    /// 自定义元数据
    /// Custom metadata
    pub metadata: HashMap<String, String>,
    /// 输入映射函数
    /// Input mapper
    mapper: Option<InputMapper>,
}

impl WorkflowNode {
    /// 创建节点，名称默认为 ID
    /// Create a node; the name defaults to the id
    pub fn new(id: &str, unit: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            unit: unit.to_string(),
            timeout_ms: None,
            retry: None,
            metadata: HashMap::new(),
            mapper: None,
        }
    }

    /// 设置展示名称
    /// Set display name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// 设置单次尝试超时（毫秒）
    /// Set the per-attempt timeout in milliseconds
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// 设置节点级重试策略
    /// Set the node-level retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// 添加一条元数据
    /// Add a metadata entry
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// 设置自定义输入映射
    /// Set a custom input mapper
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&HashMap<String, WorkValue>, &WorkValue) -> WorkValue + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// 是否设置了自定义映射
    /// Whether a custom mapper is set
    pub fn has_mapper(&self) -> bool {
        self.mapper.is_some()
    }

    /// 计算节点输入
    /// Compute the node input
    ///
    /// 前驱输出以前驱节点 ID 为键；未设置映射时走默认映射。
    /// Predecessor outputs are keyed by predecessor node id; the default
    /// mapping applies when no custom mapper is set.
    pub fn resolve_input(
        &self,
        predecessors: &HashMap<String, WorkValue>,
        run_input: &WorkValue,
    ) -> WorkValue {
        match &self.mapper {
            Some(mapper) => mapper(predecessors, run_input),
            None => default_input_mapping(predecessors, run_input),
        }
    }
}

impl fmt::Debug for WorkflowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry", &self.retry)
            .field("metadata", &self.metadata)
            .field("mapper", &self.mapper.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
