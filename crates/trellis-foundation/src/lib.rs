#![allow(
    dead_code,
    unused_imports,
    non_camel_case_types,
    ambiguous_glob_reexports
)]
// semaphore module - Counting semaphore with FIFO waiters
pub mod semaphore;

// retry module - Backoff, retry, and circuit breaker patterns
pub mod retry;

// workflow module - Graph building, validation, and the execution engine
pub mod workflow;

// Re-export semaphore types
pub use semaphore::{
    Semaphore,
    SemaphoreError,
    SemaphorePermit,
    SemaphoreRegistry,
    SemaphoreStats,
};

// Re-export retry types
pub use retry::{
    // Backoff
    RetryConfig,
    compute_delay,
    // Retry loop
    RetryAttempt,
    RetryOptions,
    RetryOutcome,
    RetryPolicy,
    with_retry,
    with_retry_policy,
    // Circuit breaker
    CircuitBreaker,
    CircuitBreakerConfig,
    CircuitError,
    CircuitState,
};

// Re-export workflow types
pub use workflow::{
    // Definition
    END,
    START,
    WorkflowConfig,
    WorkflowEdge,
    WorkflowGraph,
    WorkflowNode,
    default_input_mapping,
    is_sentinel,
    // Builder
    GraphError,
    TopologicalOrder,
    WorkflowBuilder,
    // Validation
    GraphStats,
    Severity,
    ValidationCode,
    ValidationIssue,
    ValidationReport,
    WorkflowLimits,
    WorkflowValidator,
    // Definition documents
    DocumentError,
    DocumentMetadata,
    EdgeManifest,
    GraphDocument,
    NodeManifest,
    // Events
    ExecutionEvent,
    ExecutionEventEnvelope,
    SCHEMA_VERSION,
    event_channel,
    // Execution
    ExecutionContext,
    ExecutionError,
    ExecutionMetrics,
    ExecutionRecord,
    NodeResult,
    NodeStatus,
    PartialSuccessPolicy,
    WorkflowExecutor,
    WorkflowStatus,
};

// Re-export the kernel value type that flows between units
pub use trellis_kernel::unit::WorkValue;
