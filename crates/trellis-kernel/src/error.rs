//! Crate-level error types for `trellis-kernel`.
//!
//! Provides a unified [`KernelError`] that composes errors from the kernel's
//! sub-modules (unit resolution, IO, serialization) together with
//! [`error_stack::Report`] for rich, context-carrying error propagation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use trellis_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn load_manifest() -> KernelResult<()> {
//!     // Errors from sub-modules convert automatically via From impls.
//!     // Attach extra context with .change_context() / .attach().
//!     let raw = std::fs::read_to_string("workflow.yaml")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("loading workflow.yaml")?;
//!     Ok(())
//! }
//! ```

use crate::unit::UnitError;
use thiserror::Error;

/// Crate-level error type for `trellis-kernel`.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically. Use
/// [`error_stack::Report<KernelError>`] (via [`KernelResult`]) to attach
/// human-readable context as the error propagates up the call stack.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// An error originating from unit-of-work resolution.
    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<KernelError>>`.
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
