//! Per-node storage inside the graph arena.

use crate::graph::cache::NodeCache;
use crate::graph::context::{EvalId, NodeContext};
use crate::graph::pad::{Connection, Pad, PadDirection};
use crate::graph::NodeId;
use crate::operation::Operation;
use crate::rect::Rect;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use ustr::Ustr;
use utils::map::HashMap;

pub(crate) type ObserverFn = Box<dyn FnMut(Rect) + Send>;

/// Marks a proxy pass-through child of a graph node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProxyRole {
    pub graph: NodeId,
    pub direction: PadDirection,
}

#[derive(derive_more::Debug)]
pub(crate) struct NodeData {
    pub name: String,
    pub operation: Option<Box<dyn Operation>>,
    pub pads: SmallVec<[Pad; 3]>,
    /// Incoming connections, one per connected input pad.
    pub sources: Vec<Connection>,
    /// Outgoing connections.
    pub sinks: Vec<Connection>,
    /// The cached natural defined region; `None` means not valid.
    pub have_rect: RwLock<Option<Rect>>,
    /// A disabled node passes its input through unchanged.
    pub enabled: bool,
    /// Disables result caching for this node and its children.
    pub dont_cache: bool,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub proxy_role: Option<ProxyRole>,
    pub cache: Mutex<Option<NodeCache>>,
    /// Live per-evaluation scratch state.
    pub contexts: Mutex<HashMap<EvalId, NodeContext>>,
    #[debug("(...)")]
    pub invalidated_observers: Mutex<Vec<ObserverFn>>,
    #[debug("(...)")]
    pub computed_observers: Mutex<Vec<ObserverFn>>,
}

impl NodeData {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            operation: None,
            pads: SmallVec::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            have_rect: RwLock::new(None),
            enabled: true,
            dont_cache: false,
            children: Vec::new(),
            parent: None,
            proxy_role: None,
            cache: Mutex::new(None),
            contexts: Mutex::new(HashMap::default()),
            invalidated_observers: Mutex::new(Vec::new()),
            computed_observers: Mutex::new(Vec::new()),
        }
    }

    pub fn pad(&self, name: Ustr) -> Option<&Pad> {
        self.pads.iter().find(|pad| pad.name() == name)
    }

    pub fn is_graph(&self) -> bool {
        !self.children.is_empty()
    }

    /// "operation-type named name", used for warnings and error context.
    pub fn debug_name(&self) -> String {
        let operation = match &self.operation {
            Some(op) => op.id().as_str(),
            None if self.is_graph() => "GraphNode",
            None => "(none)",
        };
        if self.name.is_empty() {
            operation.to_owned()
        } else {
            format!("{} named {}", operation, self.name)
        }
    }

    /// The last computed defined region, `Rect::ZERO` when none is valid.
    pub fn stored_have(&self) -> Rect {
        self.have_rect.read().unwrap_or(Rect::ZERO)
    }

    pub fn valid_have(&self) -> Option<Rect> {
        *self.have_rect.read()
    }

    pub fn set_have(&self, rect: Rect) {
        *self.have_rect.write() = Some(rect);
    }

    pub fn invalidate_have(&self) {
        *self.have_rect.write() = None;
    }

    pub fn connection_for(&self, sink_pad: Ustr) -> Option<&Connection> {
        self.sources.iter().find(|conn| conn.sink_pad == sink_pad)
    }
}
