use crate::buffer::PixelBuffer;
use crate::format;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use ustr::Ustr;

/// Per-channel absolute difference between input and aux, with union alpha.
/// With aux disconnected the input comes through unchanged.
#[derive(Debug, Clone, Default)]
pub struct Difference;

impl Operation for Difference {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:difference")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Composer
    }

    fn prepare(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        ctx.set_pad_format("input", format::RGBA_FLOAT);
        ctx.set_pad_format("aux", format::RGBA_FLOAT);
        ctx.set_pad_format("output", format::RGBA_FLOAT);
        Ok(())
    }

    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        let result = ctx.result_rect();
        let background = ctx
            .input_buffer("input")
            .map(|buffer| buffer.pixels_rgba(result));
        let foreground = ctx
            .input_buffer("aux")
            .map(|buffer| buffer.pixels_rgba(result));

        let transparent = [0.0f32; 4];
        let mut pixels = Vec::with_capacity(result.area());
        for i in 0..result.area() {
            let bg = background.as_ref().map_or(transparent, |px| px[i]);
            let fg = foreground.as_ref().map_or(transparent, |px| px[i]);
            pixels.push([
                (bg[0] - fg[0]).abs(),
                (bg[1] - fg[1]).abs(),
                (bg[2] - fg[2]).abs(),
                bg[3] + fg[3] - bg[3] * fg[3],
            ]);
        }

        let out = PixelBuffer::new(format::RGBA_FLOAT, result);
        out.write_rgba(result, &pixels);
        ctx.set_output(out);
        Ok(())
    }
}

#[derive(Debug)]
pub struct DifferenceFactory;

impl OperationFactory for DifferenceFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:difference")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Composer
    }

    fn categories(&self) -> &'static [&'static str] {
        &["compositors"]
    }

    fn description(&self) -> &'static str {
        "Absolute per-channel difference between input and aux."
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(Difference)
    }
}
