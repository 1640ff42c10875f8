//! Pads (the named endpoints of a node) and the connections between them.

use crate::format::Format;
use crate::graph::NodeId;
use parking_lot::Mutex;
use strum::EnumIs;
use ustr::Ustr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIs)]
pub enum PadDirection {
    Input,
    Output,
}

/// A typed endpoint on a node. The pixel format is unset until the prepare
/// phase negotiates it.
#[derive(Debug)]
pub struct Pad {
    name: Ustr,
    direction: PadDirection,
    format: Mutex<Option<Format>>,
    /// For pads exposed on a graph node: the proxy child that actually
    /// carries the connections.
    proxy: Option<NodeId>,
}

impl Pad {
    pub fn new(name: Ustr, direction: PadDirection) -> Self {
        Self {
            name,
            direction,
            format: Mutex::new(None),
            proxy: None,
        }
    }

    pub(crate) fn proxied(name: Ustr, direction: PadDirection, proxy: NodeId) -> Self {
        Self {
            name,
            direction,
            format: Mutex::new(None),
            proxy: Some(proxy),
        }
    }

    pub fn name(&self) -> Ustr {
        self.name
    }

    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    pub fn format(&self) -> Option<Format> {
        *self.format.lock()
    }

    pub fn set_format(&self, format: Format) {
        *self.format.lock() = Some(format);
    }

    pub(crate) fn proxy(&self) -> Option<NodeId> {
        self.proxy
    }
}

/// A directed edge from an output pad to an input pad. The same value is
/// recorded in the source node's outgoing list and the sink node's incoming
/// list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub source: NodeId,
    pub source_pad: Ustr,
    pub sink: NodeId,
    pub sink_pad: Ustr,
}
