//! Unit-of-work capability contract (工作单元能力契约)
//!
//! The scheduler never knows what a node actually does. A node carries an
//! opaque reference string; at dispatch time the engine resolves it through a
//! [`UnitRegistry`] to something implementing [`UnitOfWork`] and hands it the
//! mapped input. Inputs and outputs are [`WorkValue`]s the engine only
//! forwards, copies, or merges.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{KernelError, KernelResult};

/// 不透明的工作流值
/// Opaque value passed between nodes
///
/// The engine treats these as payloads: it inspects them only to merge
/// predecessor outputs, never to interpret content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WorkValue {
    /// 空值 / Null value
    Null,
    /// 布尔值 / Boolean
    Bool(bool),
    /// 整数 / Integer
    Int(i64),
    /// 浮点数 / Float
    Float(f64),
    /// 字符串 / String
    String(String),
    /// 字节数组 / Raw bytes
    Bytes(Vec<u8>),
    /// 列表 / List of values
    List(Vec<WorkValue>),
    /// 键值映射 / String-keyed map
    Map(HashMap<String, WorkValue>),
    /// 任意 JSON / Arbitrary JSON payload
    Json(serde_json::Value),
}

impl WorkValue {
    pub fn is_null(&self) -> bool {
        matches!(self, WorkValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WorkValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WorkValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WorkValue::Float(f) => Some(*f),
            WorkValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WorkValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            WorkValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[WorkValue]> {
        match self {
            WorkValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, WorkValue>> {
        match self {
            WorkValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl Default for WorkValue {
    fn default() -> Self {
        WorkValue::Null
    }
}

impl From<bool> for WorkValue {
    fn from(v: bool) -> Self {
        WorkValue::Bool(v)
    }
}

impl From<i64> for WorkValue {
    fn from(v: i64) -> Self {
        WorkValue::Int(v)
    }
}

impl From<f64> for WorkValue {
    fn from(v: f64) -> Self {
        WorkValue::Float(v)
    }
}

impl From<&str> for WorkValue {
    fn from(v: &str) -> Self {
        WorkValue::String(v.to_string())
    }
}

impl From<String> for WorkValue {
    fn from(v: String) -> Self {
        WorkValue::String(v)
    }
}

impl From<Vec<u8>> for WorkValue {
    fn from(v: Vec<u8>) -> Self {
        WorkValue::Bytes(v)
    }
}

impl From<Vec<WorkValue>> for WorkValue {
    fn from(v: Vec<WorkValue>) -> Self {
        WorkValue::List(v)
    }
}

impl From<HashMap<String, WorkValue>> for WorkValue {
    fn from(v: HashMap<String, WorkValue>) -> Self {
        WorkValue::Map(v)
    }
}

impl From<serde_json::Value> for WorkValue {
    fn from(v: serde_json::Value) -> Self {
        WorkValue::Json(v)
    }
}

/// 工作单元执行能力
/// The single capability the engine requires of external work
///
/// Given an input, produce an output or fail with a message. Failures here
/// are business failures: the engine records them per node (and retries per
/// policy) but never treats them as engine errors.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Run the unit against `input`.
    async fn run(&self, input: WorkValue) -> Result<WorkValue, String>;

    /// Human-readable name, used only in logs.
    fn name(&self) -> &str {
        "unit"
    }
}

/// Boxed-future function type backing [`FnUnit`].
pub type UnitFn = Arc<
    dyn Fn(WorkValue) -> Pin<Box<dyn Future<Output = Result<WorkValue, String>> + Send>>
        + Send
        + Sync,
>;

/// Adapter turning a plain async closure into a [`UnitOfWork`].
#[derive(Clone)]
pub struct FnUnit {
    name: String,
    f: UnitFn,
}

impl FnUnit {
    /// Wrap an async closure.
    pub fn new<F, Fut>(name: &str, f: F) -> Self
    where
        F: Fn(WorkValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkValue, String>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            f: Arc::new(move |input| Box::pin(f(input))),
        }
    }

    /// Wrap a synchronous, potentially CPU-heavy closure.
    ///
    /// The closure runs on the blocking thread pool so it cannot stall the
    /// scheduler's cooperative tasks.
    pub fn blocking<F>(name: &str, f: F) -> Self
    where
        F: Fn(WorkValue) -> Result<WorkValue, String> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, move |input| {
            let f = Arc::clone(&f);
            async move {
                match tokio::task::spawn_blocking(move || f(input)).await {
                    Ok(result) => result,
                    Err(e) => Err(format!("blocking unit panicked: {}", e)),
                }
            }
        })
    }
}

#[async_trait]
impl UnitOfWork for FnUnit {
    async fn run(&self, input: WorkValue) -> Result<WorkValue, String> {
        (self.f)(input).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Unit resolution errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UnitError {
    /// No unit registered under the given reference.
    #[error("No unit of work registered for '{0}'")]
    NotFound(String),
}

/// 工作单元注册表
/// Registry mapping a node's opaque `unit` reference to an implementation
///
/// Shared across runs; the engine only reads from it. Registering under an
/// existing key replaces the previous unit (logged, not an error), matching
/// how callers hot-swap implementations between runs.
#[derive(Default)]
pub struct UnitRegistry {
    units: DashMap<String, Arc<dyn UnitOfWork>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self {
            units: DashMap::new(),
        }
    }

    /// Register a unit under `key`.
    pub fn register(&self, key: &str, unit: Arc<dyn UnitOfWork>) {
        if self.units.insert(key.to_string(), unit).is_some() {
            warn!("Replacing unit of work registered under '{}'", key);
        } else {
            debug!("Registered unit of work '{}'", key);
        }
    }

    /// Convenience: register an async closure directly.
    pub fn register_fn<F, Fut>(&self, key: &str, f: F)
    where
        F: Fn(WorkValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkValue, String>> + Send + 'static,
    {
        self.register(key, Arc::new(FnUnit::new(key, f)));
    }

    /// Look up a unit, if registered.
    pub fn get(&self, key: &str) -> Option<Arc<dyn UnitOfWork>> {
        self.units.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a unit, reporting a contextual error when missing.
    pub fn resolve(&self, key: &str) -> KernelResult<Arc<dyn UnitOfWork>> {
        self.get(key).ok_or_else(|| {
            error_stack::Report::new(KernelError::Unit(UnitError::NotFound(key.to_string())))
                .attach_printable(format!(
                    "known units: [{}]",
                    self.keys().join(", ")
                ))
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.units.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn UnitOfWork>> {
        self.units.remove(key).map(|(_, unit)| unit)
    }

    pub fn keys(&self) -> Vec<String> {
        self.units.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
