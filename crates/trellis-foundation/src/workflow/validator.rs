use super::graph::WorkflowGraph;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use trellis_kernel::workflow::{END, START, is_sentinel};

/// Validation issue severity levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Stable machine-readable code for each kind of issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    NoNodes,
    TooManyNodes,
    TooManyEdges,
    InvalidConcurrency,
    InvalidTimeout,
    DuplicateNode,
    ReservedId,
    InvalidEdgeFrom,
    InvalidEdgeTo,
    SelfLoop,
    CycleDetected,
    NoStartNodes,
    NoEndNodes,
    UnreachableNode,
    DeadEndNode,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoNodes => "NO_NODES",
            Self::TooManyNodes => "TOO_MANY_NODES",
            Self::TooManyEdges => "TOO_MANY_EDGES",
            Self::InvalidConcurrency => "INVALID_CONCURRENCY",
            Self::InvalidTimeout => "INVALID_TIMEOUT",
            Self::DuplicateNode => "DUPLICATE_NODE",
            Self::ReservedId => "RESERVED_ID",
            Self::InvalidEdgeFrom => "INVALID_EDGE_FROM",
            Self::InvalidEdgeTo => "INVALID_EDGE_TO",
            Self::SelfLoop => "SELF_LOOP",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::NoStartNodes => "NO_START_NODES",
            Self::NoEndNodes => "NO_END_NODES",
            Self::UnreachableNode => "UNREACHABLE_NODE",
            Self::DeadEndNode => "DEAD_END_NODE",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specific validation issue found in the workflow graph
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: ValidationCode,
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(
        code: ValidationCode,
        node_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            code,
            node_id,
            message: message.into(),
        }
    }

    pub fn warning(
        code: ValidationCode,
        node_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            node_id,
            message: message.into(),
        }
    }
}

/// Hard bounds applied during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowLimits {
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            min_concurrency: 1,
            max_concurrency: 20,
            min_timeout_ms: 1_000,
            max_timeout_ms: 3_600_000,
            max_nodes: 100,
            max_edges: 500,
        }
    }
}

/// Statistics about the validated graph
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub start_nodes: usize,
    pub end_nodes: usize,
}

/// The final report produced by examining a workflow graph
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub stats: GraphStats,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            issues: Vec::new(),
            stats: GraphStats::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn contains(&self, code: ValidationCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Engine to validate a `WorkflowGraph` statically
pub struct WorkflowValidator;

impl WorkflowValidator {
    /// Validate the given graph without executing it
    pub fn validate(graph: &WorkflowGraph) -> ValidationReport {
        Self::validate_with_limits(graph, &WorkflowLimits::default())
    }

    /// Validate against caller-supplied limits
    pub fn validate_with_limits(
        graph: &WorkflowGraph,
        limits: &WorkflowLimits,
    ) -> ValidationReport {
        let mut report = ValidationReport::new();

        report.stats.total_nodes = graph.node_count();
        report.stats.total_edges = graph.edge_count();
        report.stats.start_nodes = graph.start_nodes().len();
        report.stats.end_nodes = graph.end_nodes().len();

        // 1. Structure and size limits
        Self::validate_structure(graph, limits, &mut report);

        // 2. Run configuration bounds
        Self::validate_config(graph, limits, &mut report);

        // 3. Edge endpoints and self-loops
        Self::validate_edges(graph, &mut report);

        // 4. Cycle detection over the full adjacency
        Self::validate_cycles(graph, &mut report);

        // 5. Connectivity (warnings only)
        if graph.node_count() > 0 {
            Self::validate_connectivity(graph, &mut report);
        }

        report
    }

    fn validate_structure(
        graph: &WorkflowGraph,
        limits: &WorkflowLimits,
        report: &mut ValidationReport,
    ) {
        if graph.node_count() == 0 {
            report.issues.push(ValidationIssue::error(
                ValidationCode::NoNodes,
                None,
                "Workflow has no nodes.",
            ));
        }

        if graph.node_count() > limits.max_nodes {
            report.issues.push(ValidationIssue::error(
                ValidationCode::TooManyNodes,
                None,
                format!(
                    "Workflow has {} nodes, the limit is {}.",
                    graph.node_count(),
                    limits.max_nodes
                ),
            ));
        }

        if graph.edge_count() > limits.max_edges {
            report.issues.push(ValidationIssue::error(
                ValidationCode::TooManyEdges,
                None,
                format!(
                    "Workflow has {} edges, the limit is {}.",
                    graph.edge_count(),
                    limits.max_edges
                ),
            ));
        }

        for node_id in graph.node_ids() {
            if is_sentinel(node_id) {
                report.issues.push(ValidationIssue::error(
                    ValidationCode::ReservedId,
                    Some(node_id.clone()),
                    format!("Node id '{}' is reserved for graph endpoints.", node_id),
                ));
            }
        }
    }

    fn validate_config(
        graph: &WorkflowGraph,
        limits: &WorkflowLimits,
        report: &mut ValidationReport,
    ) {
        let config = graph.config();

        if config.max_concurrency < limits.min_concurrency
            || config.max_concurrency > limits.max_concurrency
        {
            report.issues.push(ValidationIssue::error(
                ValidationCode::InvalidConcurrency,
                None,
                format!(
                    "max_concurrency {} is outside {}..={}.",
                    config.max_concurrency, limits.min_concurrency, limits.max_concurrency
                ),
            ));
        }

        if config.timeout_ms < limits.min_timeout_ms || config.timeout_ms > limits.max_timeout_ms {
            report.issues.push(ValidationIssue::error(
                ValidationCode::InvalidTimeout,
                None,
                format!(
                    "timeout_ms {} is outside {}..={}.",
                    config.timeout_ms, limits.min_timeout_ms, limits.max_timeout_ms
                ),
            ));
        }
    }

    fn validate_edges(graph: &WorkflowGraph, report: &mut ValidationReport) {
        for edge in graph.edges() {
            if edge.from == edge.to {
                report.issues.push(ValidationIssue::error(
                    ValidationCode::SelfLoop,
                    Some(edge.from.clone()),
                    format!("Edge '{}' -> '{}' is a self-loop.", edge.from, edge.to),
                ));
            }

            if !is_sentinel(&edge.from) && !graph.contains_node(&edge.from) {
                report.issues.push(ValidationIssue::error(
                    ValidationCode::InvalidEdgeFrom,
                    Some(edge.from.clone()),
                    format!("Edge source '{}' is not a node in the graph.", edge.from),
                ));
            }

            if !is_sentinel(&edge.to) && !graph.contains_node(&edge.to) {
                report.issues.push(ValidationIssue::error(
                    ValidationCode::InvalidEdgeTo,
                    Some(edge.to.clone()),
                    format!("Edge target '{}' is not a node in the graph.", edge.to),
                ));
            }
        }
    }

    fn validate_cycles(graph: &WorkflowGraph, report: &mut ValidationReport) {
        if let Some(path) = graph.detect_cycle() {
            report.issues.push(ValidationIssue::error(
                ValidationCode::CycleDetected,
                None,
                format!("Cycle detected: {}.", path.join(" -> ")),
            ));
        }
    }

    fn validate_connectivity(graph: &WorkflowGraph, report: &mut ValidationReport) {
        let wired_from_start = graph.edges().iter().any(|e| e.from == START);
        let wired_into_end = graph.edges().iter().any(|e| e.to == END);

        if !wired_from_start {
            report.issues.push(ValidationIssue::warning(
                ValidationCode::NoStartNodes,
                None,
                "Workflow has no edge out of the start endpoint; entry nodes are inferred.",
            ));
        }

        if !wired_into_end {
            report.issues.push(ValidationIssue::warning(
                ValidationCode::NoEndNodes,
                None,
                "Workflow has no edge into the end endpoint; exit nodes are inferred.",
            ));
        }

        // Forward sweep from the entry nodes. In an acyclic graph every node
        // is reachable this way, so leftovers point at nodes trapped behind
        // a cycle.
        let reachable = Self::sweep(graph.start_nodes(), |id| graph.successors(id));
        for node_id in graph.node_ids() {
            if !reachable.contains(node_id.as_str()) {
                report.issues.push(ValidationIssue::warning(
                    ValidationCode::UnreachableNode,
                    Some(node_id.clone()),
                    format!("Node '{}' is unreachable from any entry node.", node_id),
                ));
            }
        }

        // Reverse sweep from the exit nodes.
        let reaches_exit = Self::sweep(graph.end_nodes(), |id| graph.predecessors(id));
        for node_id in graph.node_ids() {
            if !reaches_exit.contains(node_id.as_str()) {
                report.issues.push(ValidationIssue::warning(
                    ValidationCode::DeadEndNode,
                    Some(node_id.clone()),
                    format!("Node '{}' cannot reach any exit node.", node_id),
                ));
            }
        }
    }

    fn sweep<'a>(
        roots: Vec<&'a str>,
        neighbors: impl Fn(&str) -> Vec<&'a str>,
    ) -> HashSet<&'a str> {
        let mut seen: HashSet<&'a str> = HashSet::new();
        let mut queue: VecDeque<&'a str> = roots.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for next in neighbors(id) {
                if !seen.contains(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}
