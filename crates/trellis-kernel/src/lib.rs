#![allow(
    dead_code,
    unused_imports,
    non_camel_case_types,
    ambiguous_glob_reexports
)]
// error module
pub mod error;

// unit module - Unit-of-work capability contract (工作单元能力契约)
pub mod unit;
pub use unit::*;

// workflow module - graph-level constants shared by every layer
pub mod workflow;
pub use workflow::*;
