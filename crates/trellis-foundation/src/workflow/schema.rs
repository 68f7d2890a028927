//! Declarative Workflow Documents
//!
//! Defines the on-disk document format for workflows and the parsing that
//! turns documents into [`WorkflowBuilder`]s. YAML, TOML, and JSON are
//! supported; `${VAR}` references in string values are substituted from the
//! environment at load time.
//!
//! # Example
//!
//! ```yaml
//! metadata:
//!   id: order_pipeline
//!   name: Order Pipeline
//!
//! config:
//!   max_concurrency: 4
//!
//! nodes:
//!   - id: fetch
//!     unit: fetch_orders
//!
//!   - id: enrich
//!     unit: enrich_orders
//!     timeout_ms: 5000
//!     retry:
//!       max_attempts: 5
//!
//! edges:
//!   - from: __start__
//!     to: fetch
//!   - from: fetch
//!     to: enrich
//!   - from: enrich
//!     to: __end__
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::builder::WorkflowBuilder;
use super::graph::{WorkflowConfig, WorkflowGraph};
use super::node::WorkflowNode;
use crate::retry::RetryPolicy;

/// Plain result alias for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors that can occur while loading or saving workflow documents.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Workflow document as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Workflow metadata
    pub metadata: DocumentMetadata,

    /// Workflow configuration
    #[serde(default)]
    pub config: WorkflowConfig,

    /// Node entries
    pub nodes: Vec<NodeManifest>,

    /// Edge entries
    #[serde(default)]
    pub edges: Vec<EdgeManifest>,
}

/// Workflow metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Unique workflow identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Workflow description
    #[serde(default)]
    pub description: String,

    /// Workflow version
    #[serde(default)]
    pub version: Option<String>,

    /// Author
    #[serde(default)]
    pub author: Option<String>,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Node entry in a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeManifest {
    /// Unique node identifier
    pub id: String,

    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,

    /// Registry key of the unit of work this node runs
    pub unit: String,

    /// Per-attempt timeout (milliseconds)
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Node-level retry policy
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// Custom metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Edge entry in a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeManifest {
    /// Source node ID
    pub from: String,

    /// Target node ID
    pub to: String,

    /// Edge label (optional)
    #[serde(default)]
    pub label: Option<String>,
}

impl GraphDocument {
    /// Parse a document from YAML, substituting `${VAR}` references.
    pub fn from_yaml(content: &str) -> DocumentResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        let json_value: serde_json::Value = serde_json::to_value(&value)?;
        let substituted = substitute_env_recursive(&json_value);
        let doc: GraphDocument = serde_json::from_value(substituted)?;
        Ok(doc)
    }

    /// Parse a document from TOML, substituting `${VAR}` references.
    pub fn from_toml(content: &str) -> DocumentResult<Self> {
        let value: toml::Value = toml::from_str(content)?;
        let json_value: serde_json::Value = serde_json::to_value(&value).map_err(|e| {
            DocumentError::Validation(format!("TOML to JSON conversion error: {}", e))
        })?;
        let substituted = substitute_env_recursive(&json_value);
        let doc: GraphDocument = serde_json::from_value(substituted)?;
        Ok(doc)
    }

    /// Parse a document from JSON, substituting `${VAR}` references.
    pub fn from_json(content: &str) -> DocumentResult<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let substituted = substitute_env_recursive(&value);
        let doc: GraphDocument = serde_json::from_value(substituted)?;
        Ok(doc)
    }

    /// Load a document from a file (auto-detect format by extension).
    pub fn from_file(path: impl AsRef<Path>) -> DocumentResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| DocumentError::Validation("No file extension".to_string()))?;

        match extension.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            "json" => Self::from_json(&content),
            _ => Err(DocumentError::Validation(format!(
                "Unsupported file extension: {}",
                extension
            ))),
        }
    }

    /// Serialize the document to YAML.
    pub fn to_yaml(&self) -> DocumentResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Serialize the document to pretty-printed JSON.
    pub fn to_json(&self) -> DocumentResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Turn the document into a [`WorkflowBuilder`].
    ///
    /// The caller decides between `build()` and `build_unchecked()`; the
    /// document layer itself does not validate graph structure.
    pub fn into_builder(self) -> WorkflowBuilder {
        let mut builder = WorkflowBuilder::new(&self.metadata.id);
        builder
            .set_name(&self.metadata.name)
            .set_description(&self.metadata.description)
            .set_config(self.config);

        for manifest in self.nodes {
            let mut node = WorkflowNode::new(&manifest.id, &manifest.unit);
            if let Some(name) = manifest.name {
                node = node.with_name(&name);
            }
            if let Some(timeout_ms) = manifest.timeout_ms {
                node = node.with_timeout(timeout_ms);
            }
            if let Some(retry) = manifest.retry {
                node = node.with_retry(retry);
            }
            for (key, value) in &manifest.metadata {
                node = node.with_metadata(key, value);
            }
            builder.add_node(node);
        }

        for edge in self.edges {
            match edge.label {
                Some(label) => builder.add_labeled_edge(&edge.from, &edge.to, &label),
                None => builder.add_edge(&edge.from, &edge.to),
            };
        }

        builder
    }

    /// Capture a built graph as a document.
    ///
    /// Input mappers are code, not data, so they do not survive the trip;
    /// everything else round-trips.
    pub fn from_graph(graph: &WorkflowGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|node| NodeManifest {
                id: node.id.clone(),
                name: (node.name != node.id).then(|| node.name.clone()),
                unit: node.unit.clone(),
                timeout_ms: node.timeout_ms,
                retry: node.retry.clone(),
                metadata: node.metadata.clone(),
            })
            .collect();

        let edges = graph
            .edges()
            .iter()
            .map(|edge| EdgeManifest {
                from: edge.from.clone(),
                to: edge.to.clone(),
                label: edge.label.clone(),
            })
            .collect();

        Self {
            metadata: DocumentMetadata {
                id: graph.id().to_string(),
                name: graph.name().to_string(),
                description: graph.description().to_string(),
                version: None,
                author: None,
                tags: Vec::new(),
            },
            config: graph.config().clone(),
            nodes,
            edges,
        }
    }
}

/// Regex for matching ${VAR_NAME} patterns
static ENV_VAR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Substitute environment variables in a string
///
/// Replaces ${VAR_NAME} patterns with values from environment variables.
/// If a variable is not set, the pattern is left unchanged.
pub fn substitute_env(input: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

/// Substitute environment variables in all string values of a JSON structure
pub fn substitute_env_recursive(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(substitute_env(s)),
        serde_json::Value::Array(arr) => arr.iter().map(substitute_env_recursive).collect(),
        serde_json::Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| (k.clone(), substitute_env_recursive(v)))
            .collect(),
        _ => value.clone(),
    }
}

/// Substitute environment variables with a custom mapping
///
/// Explicit entries win over the environment. Useful for testing.
///
/// # Example
///
/// ```rust
/// use std::collections::HashMap;
/// use trellis_foundation::workflow::schema::substitute_with;
///
/// let vars = HashMap::from([("API_HOST".to_string(), "example.com".to_string())]);
/// assert_eq!(substitute_with("https://${API_HOST}/api", &vars), "https://example.com/api");
/// ```
pub fn substitute_with(input: &str, vars: &HashMap<String, String>) -> String {
    ENV_VAR_REGEX
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            vars.get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}
