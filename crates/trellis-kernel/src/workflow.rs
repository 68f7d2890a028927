//! Graph-level constants shared by every Trellis layer.
//!
//! A workflow graph has two synthetic endpoints that never correspond to a
//! stored node: [`START`] marks where execution enters the graph and [`END`]
//! marks where results are collected. Edges may reference them, nodes may
//! not use them as ids.

/// Entry sentinel. An edge `START -> n` makes `n` eligible as soon as the
/// run begins.
pub const START: &str = "__start__";

/// Exit sentinel. An edge `n -> END` marks the output of `n` as part of the
/// final aggregated result.
pub const END: &str = "__end__";

/// Node ids that can never be registered as real nodes.
pub const RESERVED_IDS: [&str; 2] = [START, END];

/// Whether `id` is one of the synthetic graph endpoints.
pub fn is_sentinel(id: &str) -> bool {
    id == START || id == END
}
