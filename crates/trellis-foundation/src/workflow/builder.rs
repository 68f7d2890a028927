//! 工作流构建器
//! Workflow builder
//!
//! 图的唯一公开构建入口：节点与边自由累积，`build()` 才做校验，
//! 一次性返回全部问题而不是首个问题。
//! The only public way to assemble a graph: nodes and edges accumulate
//! freely and nothing is checked until `build()`, which reports every
//! violation at once instead of the first one.

use super::graph::{GraphError, WorkflowConfig, WorkflowEdge, WorkflowGraph};
use super::node::WorkflowNode;
use super::validator::{ValidationCode, ValidationIssue, WorkflowValidator};
use std::collections::HashSet;

/// 工作流构建器
/// Workflow builder
#[derive(Debug, Clone, Default)]
pub struct WorkflowBuilder {
    id: String,
    name: String,
    description: String,
    config: WorkflowConfig,
    nodes: Vec<WorkflowNode>,
    edges: Vec<WorkflowEdge>,
}

impl WorkflowBuilder {
    /// 创建构建器，名称默认为 ID
    /// Create a builder; the name defaults to the id
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            config: WorkflowConfig::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// 设置名称
    /// Set name
    pub fn set_name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    /// 设置描述
    /// Set description
    pub fn set_description(&mut self, description: &str) -> &mut Self {
        self.description = description.to_string();
        self
    }

    /// 设置运行配置
    /// Set run configuration
    pub fn set_config(&mut self, config: WorkflowConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// 就地修改运行配置
    /// Update the run configuration in place
    pub fn config_mut(&mut self) -> &mut WorkflowConfig {
        &mut self.config
    }

    /// 添加节点
    /// Add node
    pub fn add_node(&mut self, node: WorkflowNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// 添加边
    /// Add edge
    pub fn add_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.edges.push(WorkflowEdge::new(from, to));
        self
    }

    /// 添加带标签的边
    /// Add labeled edge
    pub fn add_labeled_edge(&mut self, from: &str, to: &str, label: &str) -> &mut Self {
        self.edges.push(WorkflowEdge::labeled(from, to, label));
        self
    }

    /// `add_edge` 的别名
    /// Alias for `add_edge`
    pub fn connect(&mut self, from: &str, to: &str) -> &mut Self {
        self.add_edge(from, to)
    }

    /// 串联一组节点：相邻两项之间各加一条边
    /// Chain a sequence of nodes: one edge between each adjacent pair
    pub fn chain(&mut self, ids: &[&str]) -> &mut Self {
        for pair in ids.windows(2) {
            self.add_edge(pair[0], pair[1]);
        }
        self
    }

    /// 扇出：从一个节点连向多个节点
    /// Fan out: connect one node to many
    pub fn fan_out(&mut self, from: &str, tos: &[&str]) -> &mut Self {
        for to in tos {
            self.add_edge(from, to);
        }
        self
    }

    /// 扇入：从多个节点汇入一个节点
    /// Fan in: converge many nodes into one
    pub fn fan_in(&mut self, froms: &[&str], to: &str) -> &mut Self {
        for from in froms {
            self.add_edge(from, to);
        }
        self
    }

    /// 校验并构建图；失败时报告携带全部问题
    /// Validate and build the graph; on failure the report carries every
    /// issue
    pub fn build(&self) -> Result<WorkflowGraph, GraphError> {
        let (graph, duplicates) = self.materialize();
        let mut report = WorkflowValidator::validate(&graph);
        report.issues.extend(duplicates);
        if report.is_valid() {
            Ok(graph)
        } else {
            Err(GraphError::Invalid { report })
        }
    }

    /// 跳过校验直接构建，仅用于诊断性内省
    /// Build without validation, for diagnostic introspection only
    pub fn build_unchecked(&self) -> WorkflowGraph {
        self.materialize().0
    }

    /// 物化图并收集重复节点 ID
    /// Materialize the graph and collect duplicate node ids
    ///
    /// 图本身无法表示重复（映射去重），所以必须在这里检测。
    /// The graph itself cannot represent duplicates (the map dedups),
    /// so they have to be caught here.
    fn materialize(&self) -> (WorkflowGraph, Vec<ValidationIssue>) {
        let mut graph = WorkflowGraph::new(&self.id, &self.name);
        graph.set_description(&self.description);
        graph.set_config(self.config.clone());

        let mut seen: HashSet<&str> = HashSet::new();
        let mut duplicates: Vec<ValidationIssue> = Vec::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                duplicates.push(ValidationIssue::error(
                    ValidationCode::DuplicateNode,
                    Some(node.id.clone()),
                    format!("Node id '{}' is defined more than once.", node.id),
                ));
            }
            graph.insert_node(node.clone());
        }
        for edge in &self.edges {
            graph.insert_edge(edge.clone());
        }
        (graph, duplicates)
    }
}
