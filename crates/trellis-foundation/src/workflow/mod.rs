//! 基于有向无环图的工作流编排
//! DAG-based workflow orchestration
//!
//! 提供从构建到运行的完整链路，支持：
//! - 流式构建器与哨兵端点（`__start__` / `__end__`）
//! - 静态校验：结构错误与可达性警告分级上报
//! - 就绪集并行调度，许可池限制并发
//! - 失败沿出边传播为跳过，支持快停与弹性两种口径
//! - 节点级重试、单次尝试超时与整体截止时间
//! - 执行事件流与可序列化的运行报告
//! - YAML / TOML / JSON 工作流定义文件

pub mod builder;
pub mod execution_event;
pub mod executor;
pub mod graph;
pub mod node;
pub mod schema;
pub mod state;
pub mod validator;

pub use builder::*;
pub use execution_event::*;
pub use executor::*;
pub use graph::*;
pub use node::*;
pub use schema::*;
pub use state::*;
pub use validator::*;
