pub mod buffer;
pub mod format;
pub mod graph;
pub mod operation;
pub mod operations;
pub mod property;
pub mod rect;
pub mod sampler;

pub use graph::{BlitFlags, Graph, NodeId};

/// Helper for wrapping a code block to help with contextualizing errors
/// Better editor support but slightly worse ergonomic than a macro
#[inline(always)]
pub(crate) fn m_try<T>(func: impl FnOnce() -> miette::Result<T>) -> miette::Result<T> {
    func()
}
