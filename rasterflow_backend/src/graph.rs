//! The graph model: an arena of nodes connected through pads, with
//! graph-as-node composition via proxy children.
//!
//! Structure and parameters change through `&mut Graph`; evaluation only
//! borrows the graph shared, with per-node locks guarding caches, contexts
//! and negotiated formats. This makes "mutating a node during an active
//! evaluation" impossible to compile rather than undefined.

use crate::graph::context::{EvalId, NodeContext, OpCtx};
use crate::graph::node::{NodeData, ProxyRole};
use crate::graph::pad::{Connection, Pad};
use crate::operation::{self, Operation, OperationFlags};
use crate::operations::nop::NopOperation;
use crate::property::{PropertyInfo, Value};
use crate::rect::Rect;
use crate::buffer::SharedBuffer;
use miette::Diagnostic;
use petgraph::acyclic::Acyclic;
use petgraph::data::Build;
use petgraph::graph::DiGraph;
use thiserror::Error;
use tracing::warn;
use ustr::Ustr;
use utils::map::HashMap;

pub mod cache;
pub mod context;
pub mod eval;
pub mod node;
pub mod pad;
pub(crate) mod visitor;

pub use eval::{BlitFlags, CancellationToken, Processor};
pub use pad::PadDirection;

/// Stable handle of a node inside one [`Graph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Structural errors: the graph is left unchanged when one is returned.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum GraphError {
    #[error("`{node}` has no pad named `{pad}`")]
    NoSuchPad { node: String, pad: Ustr },
    #[error("pad `{pad}` of `{node}` is not an {expected:?} pad")]
    WrongDirection {
        node: String,
        pad: Ustr,
        expected: PadDirection,
    },
    #[error("connecting `{from}` to `{sink}` would create a cycle")]
    Cycle { from: String, sink: String },
    #[error("unknown operation type `{0}`")]
    UnknownOperation(Ustr),
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<NodeData>>,
    /// Set while relinking in [`Graph::insert_before`] to silence the
    /// intermediate invalidation storm.
    suppress_invalidation: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- construction ----

    /// Adds an empty container node; it becomes a graph node once children
    /// are added.
    pub fn add_node(&mut self) -> NodeId {
        self.alloc(NodeData::new())
    }

    /// Adds a node running the given operation type.
    pub fn create_node(&mut self, operation_type: &str) -> Result<NodeId, GraphError> {
        let id = Ustr::from(operation_type);
        let factory = operation::get_operation_factory(&id)
            .ok_or(GraphError::UnknownOperation(id))?;
        let node = self.add_node();
        self.set_operation(node, factory.create());
        Ok(node)
    }

    /// Creates a child of `parent` with an operation and initial properties.
    pub fn new_child(
        &mut self,
        parent: NodeId,
        operation_type: &str,
        properties: &[(&str, Value)],
    ) -> Result<NodeId, GraphError> {
        let child = self.create_node(operation_type)?;
        self.add_child(parent, child);
        for (name, value) in properties {
            self.set(child, name, value.clone());
        }
        Ok(child)
    }

    pub fn create_child(
        &mut self,
        parent: NodeId,
        operation_type: &str,
    ) -> Result<NodeId, GraphError> {
        self.new_child(parent, operation_type, &[])
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        if !self.node(parent).children.contains(&child) {
            self.node_mut(parent).children.push(child);
        }
        self.node_mut(child).parent = Some(parent);
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).children.retain(|&c| c != child);
        self.node_mut(child).parent = None;
    }

    /// Disconnects and destroys a node; a graph node takes its children with
    /// it.
    pub fn remove_node(&mut self, node: NodeId) {
        while let Some(conn) = self.node(node).sources.first().copied() {
            self.disconnect_resolved(conn.sink, conn.sink_pad);
        }
        while let Some(conn) = self.node(node).sinks.first().copied() {
            self.disconnect_resolved(conn.sink, conn.sink_pad);
        }
        for child in std::mem::take(&mut self.node_mut(node).children) {
            self.node_mut(child).parent = None;
            self.remove_node(child);
        }
        if let Some(parent) = self.node(node).parent {
            self.node_mut(parent).children.retain(|&c| c != node);
            self.node_mut(parent)
                .pads
                .retain(|pad| pad.proxy() != Some(node));
        }
        self.nodes[node.0] = None;
    }

    /// Replaces the node's operation, creating the pads its variant declares.
    pub fn set_operation(&mut self, node: NodeId, mut operation: Box<dyn Operation>) {
        // drop pads (and their connections) of a previous operation
        let old_pads: Vec<Ustr> = self.node(node).pads.iter().map(|p| p.name()).collect();
        for pad in old_pads {
            self.remove_pad(node, pad.as_str());
        }

        let variant = operation.variant();
        let data = self.node_mut(node);
        for name in variant.input_pad_names() {
            data.pads.push(Pad::new(Ustr::from(name), PadDirection::Input));
        }
        for name in variant.output_pad_names() {
            data.pads
                .push(Pad::new(Ustr::from(name), PadDirection::Output));
        }
        operation.attach(node);
        data.operation = Some(operation);
    }

    /// The node's operation type name, `GraphNode` for containers.
    pub fn get_operation(&self, node: NodeId) -> Option<Ustr> {
        let data = self.node(node);
        match &data.operation {
            Some(op) => Some(op.id()),
            None if data.is_graph() => Some(Ustr::from("GraphNode")),
            None => None,
        }
    }

    pub fn set_node_name(&mut self, node: NodeId, name: &str) {
        self.node_mut(node).name = name.to_owned();
    }

    pub fn node_name(&self, node: NodeId) -> &str {
        &self.node(node).name
    }

    /// Clones a node's operation and settings into a fresh, unconnected node.
    pub fn duplicate_node(&mut self, node: NodeId) -> NodeId {
        let (operation, enabled, dont_cache, name) = {
            let data = self.node(node);
            (
                data.operation.as_deref().map(dyn_clone::clone_box),
                data.enabled,
                data.dont_cache,
                data.name.clone(),
            )
        };
        let copy = self.add_node();
        if let Some(op) = operation {
            self.set_operation(copy, op);
        }
        let data = self.node_mut(copy);
        data.enabled = enabled;
        data.dont_cache = dont_cache;
        data.name = name;
        copy
    }

    // ---- pads ----

    /// Adds a pad; a no-op when a pad with that name already exists.
    pub fn add_pad(&mut self, node: NodeId, name: &str, direction: PadDirection) {
        let name = Ustr::from(name);
        if self.node(node).pad(name).is_some() {
            return;
        }
        self.node_mut(node).pads.push(Pad::new(name, direction));
    }

    /// Removes a pad, disconnecting anything attached to it first.
    pub fn remove_pad(&mut self, node: NodeId, name: &str) {
        let name = Ustr::from(name);
        let Some(direction) = self.node(node).pad(name).map(|pad| pad.direction()) else {
            return;
        };
        match direction {
            PadDirection::Input => {
                if self.node(node).connection_for(name).is_some() {
                    self.disconnect_resolved(node, name);
                }
            }
            PadDirection::Output => {
                let outgoing: Vec<Connection> = self
                    .node(node)
                    .sinks
                    .iter()
                    .filter(|conn| conn.source_pad == name)
                    .copied()
                    .collect();
                for conn in outgoing {
                    self.disconnect_resolved(conn.sink, conn.sink_pad);
                }
            }
        }
        self.node_mut(node).pads.retain(|pad| pad.name() != name);
    }

    // ---- connections ----

    /// Connects `source`'s output pad into `sink`'s input pad. An existing
    /// connection on the sink pad is replaced; an attempt that would create a
    /// cycle fails and leaves the graph unchanged.
    pub fn connect_from(
        &mut self,
        sink: NodeId,
        sink_pad: &str,
        source: NodeId,
        source_pad: &str,
    ) -> Result<(), GraphError> {
        let (sink, sink_pad) = self.resolve_endpoint(sink, sink_pad)?;
        let (source, source_pad) = self.resolve_endpoint(source, source_pad)?;

        self.expect_direction(sink, sink_pad, PadDirection::Input)?;
        self.expect_direction(source, source_pad, PadDirection::Output)?;
        self.ensure_acyclic(source, sink)?;

        if self.node(sink).connection_for(sink_pad).is_some() {
            self.disconnect_resolved(sink, sink_pad);
        }

        let connection = Connection {
            source,
            source_pad,
            sink,
            sink_pad,
        };
        self.node_mut(sink).sources.push(connection);
        self.node_mut(source).sinks.push(connection);
        self.node(sink).invalidate_have();

        // let downstream recompute regions and purge caches
        let dirty = self.node(source).stored_have();
        self.invalidated(source, dirty);
        Ok(())
    }

    pub fn connect_to(
        &mut self,
        source: NodeId,
        source_pad: &str,
        sink: NodeId,
        sink_pad: &str,
    ) -> Result<(), GraphError> {
        self.connect_from(sink, sink_pad, source, source_pad)
    }

    /// Removes the connection feeding `sink_pad`. Returns whether one
    /// existed.
    pub fn disconnect(&mut self, sink: NodeId, sink_pad: &str) -> Result<bool, GraphError> {
        let (sink, sink_pad) = self.resolve_endpoint(sink, sink_pad)?;
        self.expect_direction(sink, sink_pad, PadDirection::Input)?;
        Ok(self.disconnect_resolved(sink, sink_pad))
    }

    fn disconnect_resolved(&mut self, sink: NodeId, sink_pad: Ustr) -> bool {
        let Some(connection) = self.node(sink).connection_for(sink_pad).copied() else {
            return false;
        };
        self.node_mut(sink).sources.retain(|c| *c != connection);
        self.node_mut(connection.source)
            .sinks
            .retain(|c| *c != connection);
        self.node(sink).invalidate_have();
        true
    }

    /// `source.output -> sink.input`.
    pub fn link(&mut self, source: NodeId, sink: NodeId) -> Result<(), GraphError> {
        self.connect_from(sink, "input", source, "output")
    }

    pub fn link_many(&mut self, chain: &[NodeId]) -> Result<(), GraphError> {
        for pair in chain.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Splices `to_insert` between `node` and its current producer without
    /// emitting the intermediate invalidations, then reports the inserted
    /// node's bounding box as dirty in one signal.
    pub fn insert_before(&mut self, node: NodeId, to_insert: NodeId) -> Result<(), GraphError> {
        let producer = self.get_producer(node, "input");
        let rectangle = self.get_bounding_box(to_insert);

        self.suppress_invalidation = true;
        let relink = match &producer {
            Some((other, other_pad)) => {
                self.connect_from(to_insert, "input", *other, other_pad.as_str())
            }
            None => Ok(()),
        }
        .and_then(|_| self.connect_from(node, "input", to_insert, "output"));
        self.suppress_invalidation = false;
        relink?;

        self.invalidated(node, rectangle);
        Ok(())
    }

    // ---- queries ----

    /// The unique source feeding an input pad, traversing through graph
    /// proxies.
    pub fn get_producer(&self, node: NodeId, pad_name: &str) -> Option<(NodeId, Ustr)> {
        let (node, pad_name) = self.resolve_endpoint(node, pad_name).ok()?;
        let pad = self.node(node).pad(pad_name)?;
        if !pad.direction().is_input() {
            return None;
        }
        self.node(node)
            .connection_for(pad_name)
            .map(|conn| (conn.source, conn.source_pad))
    }

    /// Everything consuming an output pad.
    pub fn get_consumers(&self, node: NodeId, output_pad: &str) -> Vec<(NodeId, Ustr)> {
        let Ok((node, pad_name)) = self.resolve_endpoint(node, output_pad) else {
            warn!(
                "no such pad `{}` on `{}`",
                output_pad,
                self.node(node).debug_name()
            );
            return Vec::new();
        };
        self.node(node)
            .sinks
            .iter()
            .filter(|conn| conn.source_pad == pad_name)
            .map(|conn| (conn.sink, conn.sink_pad))
            .collect()
    }

    /// Runs the prepare and have visitors and returns the node's defined
    /// region. Preparation failures abort with an empty rectangle.
    pub fn get_bounding_box(&self, node: NodeId) -> Rect {
        let root = self.resolve_root(node);
        let order = match visitor::reverse_dfs_order(self, root) {
            Ok(order) => order,
            Err(err) => {
                warn!("bounding box traversal failed: {err}");
                return Rect::ZERO;
            }
        };
        // prepare runs twice so formats negotiated late still propagate
        for _ in 0..2 {
            for &n in &order {
                if let Some(op) = &self.node(n).operation {
                    if let Err(err) = op.prepare(OpCtx::new(self, n, None)) {
                        warn!("preparing `{}` failed: {err}", self.node(n).debug_name());
                        return Rect::ZERO;
                    }
                }
            }
        }
        for &n in &order {
            let have = self.defined_region(n);
            self.node(n).set_have(have);
        }
        self.node(root).stored_have()
    }

    /// The node that produced the pixel at `(x, y)`.
    pub fn detect(&self, node: NodeId, x: i32, y: i32) -> Option<NodeId> {
        self.get_bounding_box(node);
        self.detect_prepared(node, x, y)
    }

    pub(crate) fn detect_prepared(&self, node: NodeId, x: i32, y: i32) -> Option<NodeId> {
        let root = self.resolve_root(node);
        match &self.node(root).operation {
            Some(op) => op.detect(OpCtx::new(self, root, None), x, y),
            None => Some(root),
        }
    }

    /// Whether the node's cache currently covers `region`.
    pub fn is_cached(&self, node: NodeId, region: Rect) -> bool {
        let node = self.resolve_root(node);
        self.node(node)
            .cache
            .lock()
            .as_ref()
            .is_some_and(|cache| cache.contains(region))
    }

    pub fn set_enabled(&mut self, node: NodeId, enabled: bool) {
        if self.node(node).enabled == enabled {
            return;
        }
        let old_have = self.node(node).stored_have();
        self.node_mut(node).enabled = enabled;
        self.node(node).invalidate_have();
        let new_have = self.get_bounding_box(node);
        self.invalidated(node, old_have.bounding_box(&new_have));
    }

    /// Disables result caching for this node and its children.
    pub fn set_dont_cache(&mut self, node: NodeId, dont_cache: bool) {
        self.node_mut(node).dont_cache = dont_cache;
    }

    // ---- properties ----

    /// Sets a control parameter, invalidating the affected regions
    /// downstream. Schema violations are logged and ignored. Buffer-valued
    /// properties are data plumbing and do not invalidate.
    pub fn set(&mut self, node: NodeId, property: &str, value: impl Into<Value>) {
        let value = value.into();
        let name = Ustr::from(property);
        let is_buffer = value.is_buffer();
        let target = self.property_target(node);

        let old_have = self.node(target).stored_have();
        {
            let debug_name = self.node(target).debug_name();
            let Some(op) = self.node_mut(target).operation.as_mut() else {
                warn!("`{debug_name}` has no operation; ignoring set of `{name}`");
                return;
            };
            if let Err(err) = (**op).validate_property(name, &value) {
                warn!("`{debug_name}`: {err}");
                return;
            }
            if let Err(err) = op.set_property(name, value) {
                warn!("`{debug_name}`: {err}");
                return;
            }
        }

        if is_buffer {
            return;
        }

        self.node(target).invalidate_have();
        let new_have = self.get_bounding_box(target);
        self.invalidated(target, old_have.bounding_box(&new_have));
    }

    pub fn get(&self, node: NodeId, property: &str) -> Option<Value> {
        let target = self.property_target(node);
        let name = Ustr::from(property);
        let data = self.node(target);
        let value = data
            .operation
            .as_ref()
            .and_then(|op| op.get_property(name));
        if value.is_none() {
            warn!("`{}` has no property named `{name}`", data.debug_name());
        }
        value
    }

    pub fn find_property(&self, node: NodeId, property: &str) -> Option<PropertyInfo> {
        let target = self.property_target(node);
        self.node(target)
            .operation
            .as_ref()?
            .properties()
            .iter()
            .find(|info| info.name == property)
            .copied()
    }

    /// Graph nodes forward property access to their output proxy.
    fn property_target(&self, node: NodeId) -> NodeId {
        let data = self.node(node);
        if data.operation.is_some() || !data.is_graph() {
            return node;
        }
        data.pad(Ustr::from("output"))
            .and_then(|pad| pad.proxy())
            .unwrap_or(node)
    }

    // ---- signals ----

    pub fn on_invalidated(&self, node: NodeId, observer: impl FnMut(Rect) + Send + 'static) {
        self.node(node)
            .invalidated_observers
            .lock()
            .push(Box::new(observer));
    }

    pub fn on_computed(&self, node: NodeId, observer: impl FnMut(Rect) + Send + 'static) {
        self.node(node)
            .computed_observers
            .lock()
            .push(Box::new(observer));
    }

    /// Synchronously reports `rect` of `node` as dirty: the cache drops
    /// overlapping entries, observers run, and sinks re-emit with
    /// `compute_affected_region` applied.
    pub fn invalidated(&self, node: NodeId, rect: Rect) {
        if self.suppress_invalidation {
            return;
        }
        let data = self.node(node);
        if let Some(cache) = data.cache.lock().as_mut() {
            cache.invalidate(rect);
        }
        for observer in data.invalidated_observers.lock().iter_mut() {
            observer(rect);
        }
        for conn in &data.sinks {
            let sink_data = self.node(conn.sink);
            let dirty = if rect.is_empty() {
                rect
            } else {
                match &sink_data.operation {
                    Some(op) => op.compute_affected_region(
                        OpCtx::new(self, conn.sink, None),
                        conn.sink_pad,
                        rect,
                    ),
                    None => rect,
                }
            };
            self.invalidated(conn.sink, dirty);
        }
        // a graph's output proxy speaks for the graph node itself
        if let Some(ProxyRole { graph, direction }) = data.proxy_role {
            if direction.is_output() {
                self.invalidated(graph, rect);
            }
        }
    }

    // ---- graph composition ----

    /// The pass-through child carrying external connections into the graph
    /// pad `name`, created on first use.
    pub fn get_input_proxy(&mut self, graph: NodeId, name: &str) -> NodeId {
        self.get_pad_proxy(graph, name, PadDirection::Input)
    }

    /// The pass-through child whose output is the graph's exposed output.
    pub fn get_output_proxy(&mut self, graph: NodeId, name: &str) -> NodeId {
        self.get_pad_proxy(graph, name, PadDirection::Output)
    }

    fn get_pad_proxy(&mut self, graph: NodeId, name: &str, direction: PadDirection) -> NodeId {
        let pad_name = Ustr::from(name);
        if let Some(pad) = self.node(graph).pad(pad_name) {
            return pad.proxy().unwrap_or(graph);
        }

        let nop = self.add_node();
        self.set_operation(nop, Box::new(NopOperation::default()));
        self.node_mut(nop).name = match direction {
            PadDirection::Input => "proxynop-input".to_owned(),
            PadDirection::Output => "proxynop-output".to_owned(),
        };
        self.node_mut(nop).proxy_role = Some(ProxyRole {
            graph,
            direction,
        });
        self.add_child(graph, nop);
        self.node_mut(graph)
            .pads
            .push(Pad::proxied(pad_name, direction, nop));
        nop
    }

    /// Maps a graph pad to the proxy node behind it.
    pub(crate) fn proxy_for_pad(&self, graph: NodeId, pad_name: Ustr) -> Option<NodeId> {
        self.node(graph).pad(pad_name).and_then(|pad| pad.proxy())
    }

    /// Follows graph output pads down to the node that actually evaluates.
    pub(crate) fn resolve_root(&self, node: NodeId) -> NodeId {
        let mut root = node;
        loop {
            let Some(proxy) = self
                .node(root)
                .pad(Ustr::from("output"))
                .and_then(|pad| pad.proxy())
            else {
                return root;
            };
            if proxy == root {
                return root;
            }
            root = proxy;
        }
    }

    fn resolve_endpoint(&self, node: NodeId, pad: &str) -> Result<(NodeId, Ustr), GraphError> {
        let name = Ustr::from(pad);
        let data = self.node(node);
        let pad_ref = data.pad(name).ok_or_else(|| GraphError::NoSuchPad {
            node: data.debug_name(),
            pad: name,
        })?;
        match pad_ref.proxy() {
            Some(proxy) => {
                let inner = match pad_ref.direction() {
                    PadDirection::Input => "input",
                    PadDirection::Output => "output",
                };
                Ok((proxy, Ustr::from(inner)))
            }
            None => Ok((node, name)),
        }
    }

    fn expect_direction(
        &self,
        node: NodeId,
        pad: Ustr,
        expected: PadDirection,
    ) -> Result<(), GraphError> {
        let data = self.node(node);
        let pad_ref = data.pad(pad).ok_or_else(|| GraphError::NoSuchPad {
            node: data.debug_name(),
            pad,
        })?;
        if pad_ref.direction() != expected {
            return Err(GraphError::WrongDirection {
                node: data.debug_name(),
                pad,
                expected,
            });
        }
        Ok(())
    }

    /// Rebuilds the connection DAG and verifies `source -> sink` keeps it
    /// acyclic.
    fn ensure_acyclic(&self, source: NodeId, sink: NodeId) -> Result<(), GraphError> {
        let mut dag = Acyclic::<DiGraph<NodeId, ()>>::new();
        let mut mapping = HashMap::default();
        for (id, _) in self.iter_nodes() {
            mapping.insert(id, dag.add_node(id));
        }
        for (id, data) in self.iter_nodes() {
            for conn in &data.sinks {
                debug_assert_eq!(conn.source, id);
                dag.try_add_edge(mapping[&conn.source], mapping[&conn.sink], ())
                    .expect("existing connections form a DAG");
            }
        }
        match dag.try_add_edge(mapping[&source], mapping[&sink], ()) {
            Ok(_) => Ok(()),
            Err(_) => Err(GraphError::Cycle {
                from: self.node(source).debug_name(),
                sink: self.node(sink).debug_name(),
            }),
        }
    }

    // ---- internals shared with the evaluation pipeline ----

    pub(crate) fn node(&self, id: NodeId) -> &NodeData {
        self.nodes[id.0].as_ref().expect("stale node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.nodes[id.0].as_mut().expect("stale node id")
    }

    pub(crate) fn iter_nodes(&self) -> impl Iterator<Item = (NodeId, &NodeData)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, data)| data.as_ref().map(|data| (NodeId(i), data)))
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Some(data));
        NodeId(self.nodes.len() - 1)
    }

    /// A node's natural region: the operation's, or the input's when the
    /// node is disabled.
    pub(crate) fn defined_region(&self, node: NodeId) -> Rect {
        let data = self.node(node);
        if !data.enabled {
            return data
                .connection_for(Ustr::from("input"))
                .and_then(|conn| self.node(conn.source).valid_have())
                .unwrap_or(Rect::ZERO);
        }
        match &data.operation {
            Some(op) => op.get_defined_region(OpCtx::new(self, node, None)),
            None => Rect::ZERO,
        }
    }

    /// Whether caching is off for this node: inherited `dont_cache` or a
    /// `NO_CACHE` capability flag.
    pub(crate) fn caching_disabled(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            let data = self.node(id);
            if data.dont_cache {
                return true;
            }
            current = data.parent;
        }
        if let Some(op) = &self.node(node).operation {
            if let Some(factory) = operation::get_operation_factory(&op.id()) {
                return factory.flags().contains(OperationFlags::NO_CACHE);
            }
        }
        false
    }

    pub(crate) fn add_context(&self, node: NodeId, eval: EvalId) {
        self.node(node)
            .contexts
            .lock()
            .entry(eval)
            .or_insert_with(NodeContext::default);
    }

    pub(crate) fn remove_context(&self, node: NodeId, eval: EvalId) {
        self.node(node).contexts.lock().remove(&eval);
    }

    pub(crate) fn context_need(&self, node: NodeId, eval: EvalId) -> Rect {
        self.node(node)
            .contexts
            .lock()
            .get(&eval)
            .map(|ctx| ctx.need_rect)
            .unwrap_or(Rect::ZERO)
    }

    pub(crate) fn seed_need(&self, node: NodeId, eval: EvalId, roi: Rect) {
        if let Some(ctx) = self.node(node).contexts.lock().get_mut(&eval) {
            ctx.need_rect = roi;
        }
    }

    pub(crate) fn union_need(&self, node: NodeId, eval: EvalId, rect: Rect) {
        if let Some(ctx) = self.node(node).contexts.lock().get_mut(&eval) {
            ctx.need_rect = ctx.need_rect.bounding_box(&rect);
        }
    }

    pub(crate) fn set_result_rect(&self, node: NodeId, eval: EvalId, rect: Rect) {
        if let Some(ctx) = self.node(node).contexts.lock().get_mut(&eval) {
            ctx.result_rect = rect;
        }
    }

    pub(crate) fn context_slot(
        &self,
        node: NodeId,
        eval: EvalId,
        pad: &str,
    ) -> Option<SharedBuffer> {
        self.node(node)
            .contexts
            .lock()
            .get(&eval)
            .and_then(|ctx| ctx.slots.get(&Ustr::from(pad)).cloned())
    }

    pub(crate) fn bind_slot(&self, node: NodeId, eval: EvalId, pad: Ustr, buffer: SharedBuffer) {
        if let Some(ctx) = self.node(node).contexts.lock().get_mut(&eval) {
            ctx.slots.insert(pad, buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::format::{self, RGBA_FLOAT};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn solid_source(graph: &mut Graph, extent: Rect, color: [f32; 4]) -> NodeId {
        let source = graph.create_node("rasterflow:buffer-source").unwrap();
        let buffer = Arc::new(PixelBuffer::solid(RGBA_FLOAT, extent, color));
        graph.set(source, "buffer", Value::Buffer(buffer));
        source
    }

    fn blit_rgba(graph: &Graph, node: NodeId, roi: Rect) -> Vec<[f32; 4]> {
        let mut dst = vec![0u8; roi.area() * 16];
        graph
            .blit(node, 1.0, roi, RGBA_FLOAT, &mut dst, 0, BlitFlags::empty())
            .unwrap();
        dst.chunks_exact(16)
            .map(|px| RGBA_FLOAT.decode_pixel(px))
            .collect()
    }

    #[test]
    fn trivial_filter_chain() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 8, 8);
        let source = solid_source(&mut graph, extent, [1.0; 4]);
        let invert = graph.create_node("rasterflow:invert").unwrap();
        let sink = graph.create_node("rasterflow:write-buffer").unwrap();
        graph.link_many(&[source, invert, sink]).unwrap();

        assert_eq!(graph.get_bounding_box(sink), extent);
        assert_eq!(graph.get_bounding_box(invert), extent);

        for px in blit_rgba(&graph, invert, extent) {
            assert_eq!(px, [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn composer_without_aux_passes_the_input() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 4, 4);
        let source = solid_source(&mut graph, extent, [1.0, 0.0, 0.0, 1.0]);
        let over = graph.create_node("rasterflow:over").unwrap();
        graph.connect_from(over, "input", source, "output").unwrap();

        for px in blit_rgba(&graph, over, extent) {
            assert_eq!(px, [1.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn composer_layers_aux_over_input() {
        let mut graph = Graph::new();
        let below = solid_source(&mut graph, Rect::new(0, 0, 4, 4), [1.0, 0.0, 0.0, 1.0]);
        let above = solid_source(&mut graph, Rect::new(2, 2, 4, 4), [0.0, 1.0, 0.0, 1.0]);
        let over = graph.create_node("rasterflow:over").unwrap();
        graph.connect_from(over, "input", below, "output").unwrap();
        graph.connect_from(over, "aux", above, "output").unwrap();

        assert_eq!(graph.get_bounding_box(over), Rect::new(0, 0, 6, 6));
        let pixels = blit_rgba(&graph, over, Rect::new(0, 0, 6, 6));
        assert_eq!(pixels[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(pixels[3 * 6 + 3], [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn connect_then_disconnect_restores_the_graph() {
        let mut graph = Graph::new();
        let a = graph.create_node("rasterflow:nop").unwrap();
        let b = graph.create_node("rasterflow:nop").unwrap();

        graph.link(a, b).unwrap();
        assert_eq!(graph.get_producer(b, "input"), Some((a, Ustr::from("output"))));
        assert_eq!(graph.get_consumers(a, "output"), vec![(b, Ustr::from("input"))]);

        assert!(graph.disconnect(b, "input").unwrap());
        assert_eq!(graph.get_producer(b, "input"), None);
        assert!(graph.get_consumers(a, "output").is_empty());
        assert!(!graph.disconnect(b, "input").unwrap());
    }

    #[test]
    fn replacing_a_connection_disconnects_the_old_source() {
        let mut graph = Graph::new();
        let a = graph.create_node("rasterflow:nop").unwrap();
        let b = graph.create_node("rasterflow:nop").unwrap();
        let sink = graph.create_node("rasterflow:nop").unwrap();

        graph.link(a, sink).unwrap();
        graph.link(b, sink).unwrap();
        assert_eq!(graph.get_producer(sink, "input"), Some((b, Ustr::from("output"))));
        assert!(graph.get_consumers(a, "output").is_empty());
    }

    #[test]
    fn cyclic_connects_fail_and_leave_the_graph_unchanged() {
        let mut graph = Graph::new();
        let a = graph.create_node("rasterflow:nop").unwrap();
        let b = graph.create_node("rasterflow:nop").unwrap();
        let c = graph.create_node("rasterflow:nop").unwrap();
        graph.link_many(&[a, b, c]).unwrap();

        let err = graph.connect_from(a, "input", c, "output").unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert_eq!(graph.get_producer(a, "input"), None);
        assert!(graph.get_consumers(c, "output").is_empty());

        // self loops count as cycles too
        let err = graph.connect_from(a, "input", a, "output").unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn structural_errors_report_pads_and_directions() {
        let mut graph = Graph::new();
        let a = graph.create_node("rasterflow:nop").unwrap();
        let b = graph.create_node("rasterflow:nop").unwrap();

        assert!(matches!(
            graph.connect_from(b, "nope", a, "output"),
            Err(GraphError::NoSuchPad { .. })
        ));
        assert!(matches!(
            graph.connect_from(b, "output", a, "output"),
            Err(GraphError::WrongDirection { .. })
        ));
        assert!(matches!(
            graph.create_node("rasterflow:does-not-exist"),
            Err(GraphError::UnknownOperation(_))
        ));
    }

    #[test]
    fn invalidation_propagates_through_the_chain_once() {
        let mut graph = Graph::new();
        let source = solid_source(&mut graph, Rect::new(0, 0, 10, 10), [1.0; 4]);
        let warm = graph.create_node("rasterflow:color-temperature").unwrap();
        let shift = graph.create_node("rasterflow:translate").unwrap();
        graph.set(shift, "x", 2.0);
        let tail = graph.create_node("rasterflow:invert").unwrap();
        graph.link_many(&[source, warm, shift, tail]).unwrap();
        graph.get_bounding_box(tail);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        graph.on_invalidated(tail, move |rect| sink_seen.lock().push(rect));

        graph.set(warm, "intended-temperature", 5000.0);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        // the change is translated through the shift on the way down
        assert_eq!(seen[0], Rect::new(2, 0, 10, 10));
    }

    #[test]
    fn property_changes_purge_overlapping_cache_entries() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 8, 8);
        let source = solid_source(&mut graph, extent, [1.0; 4]);
        let warm = graph.create_node("rasterflow:color-temperature").unwrap();
        graph.link(source, warm).unwrap();

        let mut dst = vec![0u8; extent.area() * 16];
        graph
            .blit(warm, 1.0, extent, RGBA_FLOAT, &mut dst, 0, BlitFlags::CACHE)
            .unwrap();
        assert!(graph.is_cached(warm, extent));

        graph.set(warm, "intended-temperature", 5000.0);
        assert!(!graph.is_cached(warm, extent));
    }

    #[test]
    fn dirty_blits_read_the_cache_without_recomputing() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 4, 4);
        let source = solid_source(&mut graph, extent, [0.5, 0.5, 0.5, 1.0]);
        let nop = graph.create_node("rasterflow:nop").unwrap();
        graph.link(source, nop).unwrap();

        // nothing computed yet: a dirty blit sees empty pixels
        let mut dst = vec![0xFFu8; extent.area() * 16];
        graph
            .blit(nop, 1.0, extent, RGBA_FLOAT, &mut dst, 0, BlitFlags::CACHE | BlitFlags::DIRTY)
            .unwrap();
        assert!(dst.iter().all(|&byte| byte == 0));

        graph
            .blit(nop, 1.0, extent, RGBA_FLOAT, &mut dst, 0, BlitFlags::CACHE)
            .unwrap();
        assert_eq!(RGBA_FLOAT.decode_pixel(&dst[..16]), [0.5, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn blits_are_idempotent_without_mutation() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 8, 8);
        let source = solid_source(&mut graph, extent, [0.2, 0.4, 0.6, 1.0]);
        let invert = graph.create_node("rasterflow:invert").unwrap();
        graph.link(source, invert).unwrap();

        let mut first = vec![0u8; extent.area() * 16];
        let mut second = vec![0u8; extent.area() * 16];
        graph
            .blit(invert, 1.0, extent, RGBA_FLOAT, &mut first, 0, BlitFlags::empty())
            .unwrap();
        graph
            .blit(invert, 1.0, extent, RGBA_FLOAT, &mut second, 0, BlitFlags::empty())
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn scaled_blit_resizes_with_nearest_neighbour() {
        let mut graph = Graph::new();
        let source = graph.create_node("rasterflow:buffer-source").unwrap();
        let buffer = PixelBuffer::new(format::Y_U8, Rect::new(0, 0, 2, 1));
        buffer.put_pixel(0, 0, [0.0, 0.0, 0.0, 1.0]);
        buffer.put_pixel(1, 0, [1.0, 1.0, 1.0, 1.0]);
        graph.set(source, "buffer", Value::Buffer(Arc::new(buffer)));

        let mut dst = vec![0u8; 4];
        graph
            .blit(source, 2.0, Rect::new(0, 0, 4, 1), format::Y_U8, &mut dst, 0, BlitFlags::empty())
            .unwrap();
        assert_eq!(dst, [0, 0, 255, 255]);
    }

    #[test]
    fn disabled_nodes_pass_their_input_through() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 4, 4);
        let source = solid_source(&mut graph, extent, [0.3, 0.6, 0.9, 1.0]);
        let invert = graph.create_node("rasterflow:invert").unwrap();
        graph.link(source, invert).unwrap();
        graph.set_enabled(invert, false);

        for px in blit_rgba(&graph, invert, extent) {
            assert_eq!(px, [0.3, 0.6, 0.9, 1.0]);
        }
    }

    #[test]
    fn graph_nodes_expose_their_children_through_proxies() {
        let mut graph = Graph::new();
        let container = graph.add_node();
        let inner = graph.create_child(container, "rasterflow:invert").unwrap();
        let input_proxy = graph.get_input_proxy(container, "input");
        let output_proxy = graph.get_output_proxy(container, "output");
        graph.link(input_proxy, inner).unwrap();
        graph.link(inner, output_proxy).unwrap();

        let extent = Rect::new(0, 0, 4, 4);
        let source = solid_source(&mut graph, extent, [1.0; 4]);
        graph.connect_from(container, "input", source, "output").unwrap();

        // the proxy is transparent for producer queries
        assert_eq!(
            graph.get_producer(container, "input"),
            Some((source, Ustr::from("output")))
        );
        assert_eq!(graph.get_bounding_box(container), extent);

        for px in blit_rgba(&graph, container, extent) {
            assert_eq!(px, [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn graph_nodes_reemit_their_proxy_invalidations() {
        let mut graph = Graph::new();
        let container = graph.add_node();
        let warm = graph
            .create_child(container, "rasterflow:color-temperature")
            .unwrap();
        let input_proxy = graph.get_input_proxy(container, "input");
        let output_proxy = graph.get_output_proxy(container, "output");
        graph.link(input_proxy, warm).unwrap();
        graph.link(warm, output_proxy).unwrap();

        let source = solid_source(&mut graph, Rect::new(0, 0, 4, 4), [1.0; 4]);
        graph.connect_from(container, "input", source, "output").unwrap();
        graph.get_bounding_box(container);

        let count = Arc::new(Mutex::new(0));
        let seen = count.clone();
        graph.on_invalidated(container, move |_| *seen.lock() += 1);

        graph.set(warm, "original-temperature", 9000.0);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn insert_before_splices_and_signals_once() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 4, 4);
        let source = solid_source(&mut graph, extent, [1.0; 4]);
        let invert = graph.create_node("rasterflow:invert").unwrap();
        graph.link(source, invert).unwrap();
        graph.get_bounding_box(invert);

        let count = Arc::new(Mutex::new(0));
        let seen = count.clone();
        graph.on_invalidated(invert, move |_| *seen.lock() += 1);

        let shift = graph.create_node("rasterflow:translate").unwrap();
        graph.insert_before(invert, shift).unwrap();

        assert_eq!(*count.lock(), 1);
        assert_eq!(graph.get_producer(invert, "input"), Some((shift, Ustr::from("output"))));
        assert_eq!(graph.get_producer(shift, "input"), Some((source, Ustr::from("output"))));

        for px in blit_rgba(&graph, invert, extent) {
            assert_eq!(px, [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn detect_finds_the_producing_node() {
        let mut graph = Graph::new();
        let below = solid_source(&mut graph, Rect::new(0, 0, 4, 4), [1.0, 0.0, 0.0, 1.0]);
        let above = solid_source(&mut graph, Rect::new(2, 2, 4, 4), [0.0, 1.0, 0.0, 1.0]);
        let over = graph.create_node("rasterflow:over").unwrap();
        graph.connect_from(over, "input", below, "output").unwrap();
        graph.connect_from(over, "aux", above, "output").unwrap();

        assert_eq!(graph.detect(over, 0, 0), Some(below));
        assert_eq!(graph.detect(over, 3, 3), Some(above));
        assert_eq!(graph.detect(over, 10, 10), None);
    }

    #[test]
    fn property_access_validates_against_the_schema() {
        let mut graph = Graph::new();
        let shift = graph.create_node("rasterflow:translate").unwrap();

        graph.set(shift, "x", 3.0);
        assert_eq!(graph.get(shift, "x").and_then(|v| v.as_float()), Some(3.0));

        // typos and type mismatches are warnings, not mutations
        graph.set(shift, "z", 1.0);
        graph.set(shift, "x", "sideways");
        assert_eq!(graph.get(shift, "x").and_then(|v| v.as_float()), Some(3.0));

        let info = graph.find_property(shift, "y").unwrap();
        assert_eq!(info.ty, crate::property::ValueType::Float);
        assert!(graph.find_property(shift, "z").is_none());
    }

    #[test]
    fn pads_are_idempotent_and_disconnect_on_removal() {
        let mut graph = Graph::new();
        let a = graph.create_node("rasterflow:nop").unwrap();
        let b = graph.create_node("rasterflow:nop").unwrap();
        graph.link(a, b).unwrap();

        // adding an existing pad is a no-op
        graph.add_pad(b, "input", PadDirection::Input);
        assert_eq!(graph.node(b).pads.len(), 2);

        graph.remove_pad(b, "input");
        assert!(graph.get_consumers(a, "output").is_empty());
        assert!(matches!(
            graph.connect_from(b, "input", a, "output"),
            Err(GraphError::NoSuchPad { .. })
        ));
    }

    #[test]
    fn removing_a_graph_node_removes_its_children() {
        let mut graph = Graph::new();
        let container = graph.add_node();
        let inner = graph.create_child(container, "rasterflow:invert").unwrap();
        let outside = graph.create_node("rasterflow:nop").unwrap();
        graph.link(outside, inner).unwrap();

        graph.remove_node(container);
        assert!(graph.get_consumers(outside, "output").is_empty());
        assert!(graph.iter_nodes().all(|(id, _)| id != inner && id != container));
    }

    #[test]
    fn duplicated_nodes_share_settings_but_not_edges() {
        let mut graph = Graph::new();
        let shift = graph.create_node("rasterflow:translate").unwrap();
        graph.set(shift, "x", 4.0);
        let source = graph.create_node("rasterflow:nop").unwrap();
        graph.link(source, shift).unwrap();

        let copy = graph.duplicate_node(shift);
        assert_eq!(graph.get(copy, "x").and_then(|v| v.as_float()), Some(4.0));
        assert_eq!(graph.get_producer(copy, "input"), None);
        assert_eq!(graph.get_operation(copy), Some(Ustr::from("rasterflow:translate")));
    }

    #[test]
    fn computed_fires_when_the_cache_fills() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 4, 4);
        let source = solid_source(&mut graph, extent, [1.0; 4]);
        let nop = graph.create_node("rasterflow:nop").unwrap();
        graph.link(source, nop).unwrap();

        let regions = Arc::new(Mutex::new(Vec::new()));
        let seen = regions.clone();
        graph.on_computed(nop, move |rect| seen.lock().push(rect));

        let mut dst = vec![0u8; extent.area() * 16];
        graph
            .blit(nop, 1.0, extent, RGBA_FLOAT, &mut dst, 0, BlitFlags::CACHE)
            .unwrap();
        assert_eq!(regions.lock().as_slice(), &[extent]);
    }
}
