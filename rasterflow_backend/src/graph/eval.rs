//! The evaluation pipeline: prepare → have → need → compute.
//!
//! A [`Processor`] drives one evaluation over a fixed traversal order,
//! performing one step per [`Processor::work`] call so an outer scheduler can
//! interleave evaluations. [`Graph::blit`] and [`Graph::process`] are
//! convenience loops over a processor.

use crate::buffer::{PixelBuffer, SharedBuffer};
use crate::format;
use crate::graph::cache::NodeCache;
use crate::graph::context::{EvalId, OpCtx};
use crate::graph::visitor;
use crate::graph::{Graph, NodeId};
use crate::m_try;
use crate::operation::OperationVariant;
use crate::rect::Rect;
use bitflags::bitflags;
use miette::{bail, Context};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ustr::Ustr;
use utils::map::HashMap;

bitflags! {
    /// Render mode of [`Graph::blit`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlitFlags: u32 {
        /// Render through the node's cache.
        const CACHE = 1 << 0;
        /// Read whatever the cache currently holds without recomputing.
        const DIRTY = 1 << 1;
    }
}

/// Cooperative cancellation for an evaluation, checked between node visits.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// The prepare visitor runs twice so late format negotiation saturates.
    Prepare { pass: usize, index: usize },
    Have { index: usize },
    /// Walks the traversal order backwards: consumers before producers.
    Need { index: usize },
    Compute { index: usize },
    Done,
}

/// An incremental evaluation of one node's output region.
#[derive(derive_more::Debug)]
pub struct Processor<'a> {
    #[debug("(...)")]
    graph: &'a Graph,
    root: NodeId,
    eval: EvalId,
    roi: Rect,
    order: Vec<NodeId>,
    /// Remaining consumer counts; a context is released when its last
    /// consumer finished computing.
    #[debug("(...)")]
    remaining: HashMap<NodeId, usize>,
    state: State,
    cancel: CancellationToken,
    /// Whether the root node's cache is created on demand and filled.
    use_cache: bool,
    #[debug("(...)")]
    output: Option<SharedBuffer>,
    cancelled: bool,
}

impl<'a> Processor<'a> {
    pub(crate) fn new(
        graph: &'a Graph,
        root: NodeId,
        roi: Option<Rect>,
        use_cache: bool,
    ) -> miette::Result<Self> {
        let order = visitor::reverse_dfs_order(graph, root)
            .with_context(|| format!("cannot evaluate `{}`", graph.node(root).debug_name()))?;
        let remaining = visitor::consumer_counts(graph, &order);
        let roi = roi.unwrap_or_else(|| graph.get_bounding_box(root));
        Ok(Self {
            graph,
            root,
            eval: EvalId::new(),
            roi,
            order,
            remaining,
            state: State::Prepare { pass: 0, index: 0 },
            cancel: CancellationToken::new(),
            use_cache,
            output: None,
            cancelled: false,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the evaluation ended due to cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The buffer produced at the root's output pad, once done.
    pub fn take_output(&mut self) -> Option<SharedBuffer> {
        self.output.take()
    }

    /// Performs one traversal step. Returns `Ok(true)` while there is more
    /// work; on error the evaluation is torn down and the error propagates.
    pub fn work(&mut self, progress: Option<&mut f64>) -> miette::Result<bool> {
        if self.state == State::Done {
            return Ok(false);
        }
        if self.cancel.is_cancelled() {
            self.teardown();
            self.cancelled = true;
            self.state = State::Done;
            return Ok(false);
        }

        if let Err(err) = m_try(|| self.step()) {
            self.teardown();
            self.state = State::Done;
            return Err(err);
        }

        if let Some(progress) = progress {
            *progress = self.progress();
        }
        Ok(self.state != State::Done)
    }

    /// Fraction of compute steps finished.
    pub fn progress(&self) -> f64 {
        match self.state {
            State::Compute { index } => index as f64 / self.order.len() as f64,
            State::Done => 1.0,
            _ => 0.0,
        }
    }

    fn step(&mut self) -> miette::Result<()> {
        let total = self.order.len();
        match self.state {
            State::Prepare { pass, index } => {
                let node = self.order[index];
                if pass == 0 {
                    self.graph.add_context(node, self.eval);
                }
                prepare_node(self.graph, node, self.eval)?;
                self.state = match (pass, index + 1 == total) {
                    (_, false) => State::Prepare {
                        pass,
                        index: index + 1,
                    },
                    (0, true) => State::Prepare { pass: 1, index: 0 },
                    (_, true) => State::Have { index: 0 },
                };
            }
            State::Have { index } => {
                let node = self.order[index];
                let have = self.graph.defined_region(node);
                self.graph.node(node).set_have(have);
                self.state = if index + 1 == total {
                    State::Need { index: 0 }
                } else {
                    State::Have { index: index + 1 }
                };
            }
            State::Need { index } => {
                // consumers first: walk the bottom-up order backwards
                let node = self.order[total - 1 - index];
                if index == 0 {
                    self.graph.seed_need(node, self.eval, self.roi);
                }
                propagate_need(self.graph, node, self.eval);
                self.state = if index + 1 == total {
                    State::Compute { index: 0 }
                } else {
                    State::Need { index: index + 1 }
                };
            }
            State::Compute { index } => {
                let node = self.order[index];
                let ensure_cache = self.use_cache && node == self.root;
                compute_node(self.graph, node, self.eval, ensure_cache)?;

                // release producer contexts whose consumers are all done
                for dep in visitor::depends_on(self.graph, node) {
                    if let Some(count) = self.remaining.get_mut(&dep) {
                        *count -= 1;
                        if *count == 0 {
                            self.graph.remove_context(dep, self.eval);
                        }
                    }
                }

                if index + 1 == total {
                    self.output = self.graph.context_slot(self.root, self.eval, "output");
                    self.teardown();
                    self.state = State::Done;
                } else {
                    self.state = State::Compute { index: index + 1 };
                }
            }
            State::Done => {}
        }
        Ok(())
    }

    fn teardown(&mut self) {
        for &node in &self.order {
            self.graph.remove_context(node, self.eval);
        }
    }
}

impl Graph {
    /// Renders `roi` of the node's output into `dst` in the requested
    /// format. `roi` is in scaled coordinates; `rowstride` 0 means packed
    /// rows. On failure `dst` holds empty (zero) pixels and the error is
    /// returned.
    #[allow(clippy::too_many_arguments)]
    pub fn blit(
        &self,
        node: NodeId,
        scale: f64,
        roi: Rect,
        format: crate::format::Format,
        dst: &mut [u8],
        rowstride: usize,
        flags: BlitFlags,
    ) -> miette::Result<()> {
        dst.fill(0);
        let root = self.resolve_root(node);
        let source_region = unscaled_region(roi, scale);

        if flags.is_empty() {
            let mut processor = Processor::new(self, root, Some(source_region), false)?;
            while processor.work(None)? {}
            if let Some(buffer) = processor.take_output() {
                buffer.get(scale, roi, format, dst, rowstride);
            }
        } else {
            if !flags.contains(BlitFlags::DIRTY) {
                let mut processor = Processor::new(self, root, Some(source_region), true)?;
                while processor.work(None)? {}
            }
            let data = self.node(root);
            let guard = data.cache.lock();
            if let Some(cache) = guard.as_ref() {
                cache.read(source_region).get(scale, roi, format, dst, rowstride);
            }
        }
        Ok(())
    }

    /// Fully evaluates a node; for a sink this renders the input's defined
    /// region and lets the sink consume it.
    pub fn process(&self, node: NodeId) -> miette::Result<()> {
        let root = self.resolve_root(node);
        let mut processor = Processor::new(self, root, None, true)?;
        while processor.work(None)? {}
        Ok(())
    }

    /// An incremental evaluation of `roi` (the whole bounding box when
    /// `None`), working through the node's cache.
    pub fn new_processor(
        &self,
        node: NodeId,
        roi: Option<Rect>,
    ) -> miette::Result<Processor<'_>> {
        let root = self.resolve_root(node);
        Processor::new(self, root, roi, true)
    }
}

/// The source-space region a scaled roi reads from.
fn unscaled_region(roi: Rect, scale: f64) -> Rect {
    if scale == 1.0 || roi.is_empty() {
        return roi;
    }
    let x0 = (roi.x as f64 / scale).floor() as i32;
    let y0 = (roi.y as f64 / scale).floor() as i32;
    let x1 = (roi.right() as f64 / scale).ceil() as i32;
    let y1 = (roi.bottom() as f64 / scale).ceil() as i32;
    Rect::new(x0, y0, x1 - x0, y1 - y0)
}

fn prepare_node(graph: &Graph, node: NodeId, eval: EvalId) -> miette::Result<()> {
    let data = graph.node(node);
    if let Some(op) = &data.operation {
        op.prepare(OpCtx::new(graph, node, Some(eval)))
            .with_context(|| format!("preparing `{}` failed", data.debug_name()))?;
    }
    Ok(())
}

fn propagate_need(graph: &Graph, node: NodeId, eval: EvalId) {
    let data = graph.node(node);
    let need = graph.context_need(node, eval);

    for conn in &data.sources {
        let request = if need.is_empty() {
            need
        } else if !data.enabled {
            // a disabled node only forwards its input
            if conn.sink_pad.as_str() == "input" {
                need
            } else {
                continue;
            }
        } else if let Some(op) = &data.operation {
            op.compute_input_request(OpCtx::new(graph, node, Some(eval)), conn.sink_pad, need)
        } else {
            need
        };

        let mut producer = conn.source;
        if graph.node(producer).is_graph() {
            if let Some(proxy) = graph.proxy_for_pad(producer, conn.source_pad) {
                producer = proxy;
            }
        }
        graph.union_need(producer, eval, request);
    }
}

fn compute_node(graph: &Graph, node: NodeId, eval: EvalId, ensure_cache: bool) -> miette::Result<()> {
    let data = graph.node(node);
    let need = graph.context_need(node, eval);
    let result = need.intersect(&data.stored_have());
    graph.set_result_rect(node, eval, result);

    // bind producer outputs to this node's input slots
    for conn in &data.sources {
        let mut producer = conn.source;
        if graph.node(producer).is_graph() {
            if let Some(proxy) = graph.proxy_for_pad(producer, conn.source_pad) {
                producer = proxy;
            }
        }
        if let Some(buffer) = graph.context_slot(producer, eval, "output") {
            graph.bind_slot(node, eval, conn.sink_pad, buffer);
        }
    }

    let ctx = OpCtx::new(graph, node, Some(eval));

    if !data.enabled {
        let passthrough = ctx
            .input_buffer("input")
            .unwrap_or_else(|| Arc::new(PixelBuffer::empty(format::RGBA_FLOAT)));
        ctx.bind_output(passthrough);
        return Ok(());
    }

    let Some(op) = &data.operation else {
        bail!("node `{}` has no operation to process", data.debug_name());
    };
    let variant = op.variant();

    if result.is_empty() {
        if variant != OperationVariant::Sink {
            ctx.set_output(PixelBuffer::empty(format::Y_U8));
        }
        return Ok(());
    }

    if variant.is_composer() && ctx.input_buffer("input").is_none() && ctx.input_buffer("aux").is_none()
    {
        bail!(
            "composer `{}` received neither input nor aux",
            data.debug_name()
        );
    }

    // a cache hit replaces processing entirely
    if let Some(cache) = data.cache.lock().as_ref() {
        if let Some(cached) = cache.get(result) {
            ctx.set_output(cached);
            return Ok(());
        }
    }

    if ensure_cache && variant != OperationVariant::Sink && !graph.caching_disabled(node) {
        let mut cache = data.cache.lock();
        if cache.is_none() {
            let cache_format = data
                .pad(Ustr::from("output"))
                .and_then(|pad| pad.format())
                .unwrap_or(format::RGBA_FLOAT);
            *cache = Some(NodeCache::new(cache_format));
        }
    }

    op.process(ctx)
        .with_context(|| format!("processing `{}` failed", data.debug_name()))?;

    if variant != OperationVariant::Sink {
        let Some(produced) = graph.context_slot(node, eval, "output") else {
            bail!(
                "operation `{}` did not bind an output buffer",
                data.debug_name()
            );
        };

        if !graph.caching_disabled(node) {
            let mut guard = data.cache.lock();
            if let Some(cache) = guard.as_mut() {
                cache.store(&produced, result);
                drop(guard);
                for observer in data.computed_observers.lock().iter_mut() {
                    observer(result);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RGBA_FLOAT;
    use crate::property::Value;

    fn solid_source(graph: &mut Graph, extent: Rect) -> NodeId {
        let source = graph.create_node("rasterflow:buffer-source").unwrap();
        let buffer = Arc::new(PixelBuffer::solid(RGBA_FLOAT, extent, [1.0; 4]));
        graph.set(source, "buffer", Value::Buffer(buffer));
        source
    }

    #[test]
    fn translate_requests_the_shifted_source_region() {
        let mut graph = Graph::new();
        let source = solid_source(&mut graph, Rect::new(0, 0, 10, 10));
        let translate = graph.create_node("rasterflow:translate").unwrap();
        graph.set(translate, "x", 3.0);
        graph.set(translate, "y", 0.0);
        graph.link(source, translate).unwrap();
        graph.get_bounding_box(translate);

        let eval = EvalId::new();
        graph.add_context(source, eval);
        graph.add_context(translate, eval);
        graph.seed_need(translate, eval, Rect::new(5, 0, 3, 10));
        propagate_need(&graph, translate, eval);

        assert_eq!(graph.context_need(source, eval), Rect::new(2, 0, 3, 10));

        graph.remove_context(source, eval);
        graph.remove_context(translate, eval);
    }

    #[test]
    fn need_regions_union_across_consumers() {
        let mut graph = Graph::new();
        let source = solid_source(&mut graph, Rect::new(0, 0, 4, 4));
        let translate = graph.create_node("rasterflow:translate").unwrap();
        graph.set(translate, "x", 3.0);
        let over = graph.create_node("rasterflow:over").unwrap();

        graph.link(source, translate).unwrap();
        graph.connect_from(over, "input", translate, "output").unwrap();
        graph.connect_from(over, "aux", source, "output").unwrap();
        graph.get_bounding_box(over);

        let eval = EvalId::new();
        for node in [source, translate, over] {
            graph.add_context(node, eval);
        }
        let roi = Rect::new(0, 0, 4, 4);
        graph.seed_need(over, eval, roi);
        propagate_need(&graph, over, eval);
        propagate_need(&graph, translate, eval);

        // the source serves the direct aux request and the shifted request
        assert_eq!(graph.context_need(source, eval), Rect::new(-3, 0, 7, 4));

        for node in [source, translate, over] {
            graph.remove_context(node, eval);
        }
    }

    #[test]
    fn processor_runs_to_completion_with_progress() {
        let mut graph = Graph::new();
        let source = solid_source(&mut graph, Rect::new(0, 0, 4, 4));
        let invert = graph.create_node("rasterflow:invert").unwrap();
        graph.link(source, invert).unwrap();

        let mut processor = graph.new_processor(invert, Some(Rect::new(0, 0, 4, 4))).unwrap();
        let mut progress = 0.0;
        let mut steps = 0;
        while processor.work(Some(&mut progress)).unwrap() {
            steps += 1;
        }
        assert!(steps > 0);
        assert_eq!(progress, 1.0);
        assert!(!processor.is_cancelled());
        assert!(processor.take_output().is_some());

        // all contexts have been torn down
        for (_, data) in graph.iter_nodes() {
            assert!(data.contexts.lock().is_empty());
        }
    }

    #[test]
    fn cancellation_tears_down_contexts() {
        let mut graph = Graph::new();
        let source = solid_source(&mut graph, Rect::new(0, 0, 4, 4));
        let invert = graph.create_node("rasterflow:invert").unwrap();
        graph.link(source, invert).unwrap();

        let mut processor = graph.new_processor(invert, Some(Rect::new(0, 0, 4, 4))).unwrap();
        processor.work(None).unwrap();
        processor.cancellation_token().cancel();

        assert!(!processor.work(None).unwrap());
        assert!(processor.is_cancelled());
        assert!(processor.take_output().is_none());
        for (_, data) in graph.iter_nodes() {
            assert!(data.contexts.lock().is_empty());
        }
    }

    #[test]
    fn requests_outside_the_defined_region_yield_empty_pixels() {
        let mut graph = Graph::new();
        let source = solid_source(&mut graph, Rect::new(0, 0, 4, 4));
        let invert = graph.create_node("rasterflow:invert").unwrap();
        graph.link(source, invert).unwrap();

        let roi = Rect::new(10, 10, 2, 2);
        let mut dst = vec![0xAAu8; roi.area() * 16];
        graph
            .blit(invert, 1.0, roi, RGBA_FLOAT, &mut dst, 0, BlitFlags::empty())
            .unwrap();
        assert!(dst.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn unscaled_region_covers_the_source_pixels() {
        assert_eq!(
            unscaled_region(Rect::new(0, 0, 4, 1), 2.0),
            Rect::new(0, 0, 2, 1)
        );
        assert_eq!(
            unscaled_region(Rect::new(1, 0, 4, 2), 2.0),
            Rect::new(0, 0, 3, 1)
        );
        assert_eq!(
            unscaled_region(Rect::new(0, 0, 2, 2), 0.5),
            Rect::new(0, 0, 4, 4)
        );
    }
}
