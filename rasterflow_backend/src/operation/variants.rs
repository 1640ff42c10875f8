//! Default per-variant behaviors shared by concrete operations.

use crate::format;
use crate::graph::context::OpCtx;
use crate::graph::NodeId;
use crate::operation::OperationVariant;
use crate::rect::Rect;

/// Publishes pad formats for operations that do not negotiate anything
/// special: the source side's format flows through, falling back to straight
/// RGBA float.
pub fn default_prepare(variant: OperationVariant, ctx: OpCtx<'_>) -> miette::Result<()> {
    match variant {
        OperationVariant::Source => {
            if ctx.pad_format("output").is_none() {
                ctx.set_pad_format("output", format::RGBA_FLOAT);
            }
        }
        OperationVariant::Filter | OperationVariant::Composer => {
            let fmt = ctx.source_format("input").unwrap_or(format::RGBA_FLOAT);
            ctx.set_pad_format("input", fmt);
            if variant.is_composer() {
                ctx.set_pad_format("aux", ctx.source_format("aux").unwrap_or(fmt));
            }
            ctx.set_pad_format("output", fmt);
        }
        OperationVariant::Sink => {
            let fmt = ctx.source_format("input").unwrap_or(format::RGBA_FLOAT);
            ctx.set_pad_format("input", fmt);
        }
    }
    Ok(())
}

pub fn default_defined_region(variant: OperationVariant, ctx: OpCtx<'_>) -> Rect {
    match variant {
        OperationVariant::Source => {
            tracing::warn!(
                "operation `{}` has no defined-region method",
                ctx.debug_name()
            );
            Rect::ZERO
        }
        OperationVariant::Filter | OperationVariant::Sink => {
            ctx.source_defined_region("input").unwrap_or(Rect::ZERO)
        }
        OperationVariant::Composer => {
            let input = ctx.source_defined_region("input").unwrap_or(Rect::ZERO);
            let aux = ctx.source_defined_region("aux").unwrap_or(Rect::ZERO);
            input.bounding_box(&aux)
        }
    }
}

pub fn default_detect(
    variant: OperationVariant,
    ctx: OpCtx<'_>,
    x: i32,
    y: i32,
) -> Option<NodeId> {
    match variant {
        OperationVariant::Composer => {
            // the aux layer sits on top of the input layer
            let aux_hit = ctx
                .source_node("aux")
                .and_then(|node| ctx.graph().detect_prepared(node, x, y));
            let input_hit = ctx
                .source_node("input")
                .and_then(|node| ctx.graph().detect_prepared(node, x, y));
            aux_hit.or(input_hit)
        }
        _ => ctx.have_rect().contains(x, y).then_some(ctx.node()),
    }
}
