use crate::buffer::PixelBuffer;
use crate::format;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use miette::bail;
use ustr::Ustr;

/// Inverts the color channels in linear RGB, leaving alpha untouched.
#[derive(Debug, Clone, Default)]
pub struct Invert;

impl Operation for Invert {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:invert")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn prepare(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        ctx.set_pad_format("input", format::RGBA_FLOAT);
        ctx.set_pad_format("output", format::RGBA_FLOAT);
        Ok(())
    }

    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        let result = ctx.result_rect();
        let Some(input) = ctx.input_buffer("input") else {
            bail!("input pad of `{}` is not connected", ctx.debug_name());
        };

        let mut pixels = input.pixels_rgba(result);
        for px in &mut pixels {
            px[0] = 1.0 - px[0];
            px[1] = 1.0 - px[1];
            px[2] = 1.0 - px[2];
        }

        let out = PixelBuffer::new(format::RGBA_FLOAT, result);
        out.write_rgba(result, &pixels);
        ctx.set_output(out);
        Ok(())
    }
}

#[derive(Debug)]
pub struct InvertFactory;

impl OperationFactory for InvertFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:invert")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn categories(&self) -> &'static [&'static str] {
        &["color"]
    }

    fn description(&self) -> &'static str {
        "Inverts the color channels, leaving alpha untouched."
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(Invert)
    }
}
