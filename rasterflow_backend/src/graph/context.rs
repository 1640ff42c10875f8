//! Per-evaluation scratch state and the operation-facing graph handle.

use crate::buffer::{PixelBuffer, SharedBuffer};
use crate::format::Format;
use crate::graph::{Graph, NodeId};
use crate::rect::Rect;
use std::sync::Arc;
use ustr::{Ustr, UstrMap};
use uuid::Uuid;

/// Identifies one evaluation; every node touched by it gets a [`NodeContext`]
/// keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvalId(Uuid);

impl EvalId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Scratch state of one node within one evaluation.
#[derive(Debug, Default)]
pub(crate) struct NodeContext {
    /// The region requested from this node, unioned over all consumers.
    pub need_rect: Rect,
    /// The region process will actually produce: need ∩ have.
    pub result_rect: Rect,
    /// Buffers bound by pad name: inputs for consumption, `output` for the
    /// produced result.
    pub slots: UstrMap<SharedBuffer>,
}

/// The view an operation gets of its node during prepare, region negotiation
/// and processing.
#[derive(Clone, Copy)]
pub struct OpCtx<'a> {
    graph: &'a Graph,
    node: NodeId,
    eval: Option<EvalId>,
}

impl<'a> OpCtx<'a> {
    pub(crate) fn new(graph: &'a Graph, node: NodeId, eval: Option<EvalId>) -> Self {
        Self { graph, node, eval }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn debug_name(&self) -> String {
        self.graph.node(self.node).debug_name()
    }

    /// This node's defined region as stored by the have phase.
    pub fn have_rect(&self) -> Rect {
        self.graph.node(self.node).stored_have()
    }

    pub fn pad_format(&self, pad: &str) -> Option<Format> {
        self.graph
            .node(self.node)
            .pad(Ustr::from(pad))
            .and_then(|pad| pad.format())
    }

    pub fn set_pad_format(&self, pad: &str, format: Format) {
        match self.graph.node(self.node).pad(Ustr::from(pad)) {
            Some(pad) => pad.set_format(format),
            None => tracing::warn!(
                "`{}` has no pad `{}` to set a format on",
                self.debug_name(),
                pad
            ),
        }
    }

    /// The node feeding `input_pad`, traversing through graph proxies.
    pub fn source_node(&self, input_pad: &str) -> Option<NodeId> {
        self.graph
            .node(self.node)
            .connection_for(Ustr::from(input_pad))
            .map(|conn| conn.source)
    }

    /// The negotiated format of the pad feeding `input_pad`.
    pub fn source_format(&self, input_pad: &str) -> Option<Format> {
        let conn = *self
            .graph
            .node(self.node)
            .connection_for(Ustr::from(input_pad))?;
        self.graph
            .node(conn.source)
            .pad(conn.source_pad)
            .and_then(|pad| pad.format())
    }

    /// The defined region of the node feeding `input_pad`, if it has been
    /// computed.
    pub fn source_defined_region(&self, input_pad: &str) -> Option<Rect> {
        let source = self.source_node(input_pad)?;
        self.graph.node(source).valid_have()
    }

    /// The region requested from this node in the current evaluation.
    pub fn need_rect(&self) -> Rect {
        self.with_context(|ctx| ctx.need_rect).unwrap_or(Rect::ZERO)
    }

    /// The region process must produce: need ∩ have.
    pub fn result_rect(&self) -> Rect {
        self.with_context(|ctx| ctx.result_rect)
            .unwrap_or(Rect::ZERO)
    }

    /// The buffer bound to an input pad by the evaluation.
    pub fn input_buffer(&self, pad: &str) -> Option<SharedBuffer> {
        let pad = Ustr::from(pad);
        self.with_context(|ctx| ctx.slots.get(&pad).cloned())
            .flatten()
    }

    /// Binds a freshly produced buffer to the output slot.
    pub fn set_output(&self, buffer: PixelBuffer) {
        self.bind_output(Arc::new(buffer));
    }

    /// Binds an existing shared buffer to the output slot (pass-through
    /// operations reuse their input this way).
    pub fn bind_output(&self, buffer: SharedBuffer) {
        self.with_context(|ctx| {
            ctx.slots.insert(Ustr::from("output"), buffer);
        });
    }

    fn with_context<R>(&self, f: impl FnOnce(&mut NodeContext) -> R) -> Option<R> {
        let eval = self.eval?;
        let mut contexts = self.graph.node(self.node).contexts.lock();
        contexts.get_mut(&eval).map(f)
    }
}
