use crate::buffer::PixelBuffer;
use crate::format;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use ustr::Ustr;

/// Porter-Duff "over": composites the aux layer on top of the input layer.
/// A disconnected aux is treated as fully transparent, so the input passes
/// through unchanged.
#[derive(Debug, Clone, Default)]
pub struct Over;

impl Operation for Over {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:over")
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
            pixels.push(compose_over(fg, bg));
        }

        let out = PixelBuffer::new(format::RGBA_FLOAT, result);
        out.write_rgba(result, &pixels);
        ctx.set_output(out);
        Ok(())
    }
}

fn compose_over(fg: [f32; 4], bg: [f32; 4]) -> [f32; 4] {
    let fa = fg[3];
    let ba = bg[3];
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= 0.0 {
        return [0.0; 4];
    }
    let blend = |f: f32, b: f32| (f * fa + b * ba * (1.0 - fa)) / out_a;
    [
        blend(fg[0], bg[0]),
        blend(fg[1], bg[1]),
        blend(fg[2], bg[2]),
        out_a,
    ]
}

#[derive(Debug)]
pub struct OverFactory;

impl OperationFactory for OverFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:over")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Composer
    }

    fn categories(&self) -> &'static [&'static str] {
        &["compositors"]
    }

    fn description(&self) -> &'static str {
        "Composites the aux buffer over the input buffer."
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(Over)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_foreground_wins() {
        let out = compose_over([0.0, 1.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(out, [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn transparent_foreground_passes_the_background() {
        let bg = [0.3, 0.6, 0.9, 0.5];
        assert_eq!(compose_over([0.0; 4], bg), bg);
    }

    #[test]
    fn half_transparent_blend() {
        let out = compose_over([1.0, 1.0, 1.0, 0.5], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(out[3], 1.0);
        for channel in &out[..3] {
            assert!((channel - 0.5).abs() < 1e-6);
        }
    }
}
