use crate::buffer::PixelBuffer;
use crate::format;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use crate::property::{PropertyError, PropertyInfo, Value, ValueType};
use crate::rect::Rect;
use crate::sampler::{CubicKind, CubicSampler};
use miette::bail;
use ustr::Ustr;

const PROPERTIES: &[PropertyInfo] = &[
    PropertyInfo {
        name: "x",
        ty: ValueType::Float,
        description: "Horizontal translation.",
    },
    PropertyInfo {
        name: "y",
        ty: ValueType::Float,
        description: "Vertical translation.",
    },
];

/// Repositions the buffer, with subpixel precision.
///
/// Whole-pixel offsets shift the buffer directly; fractional offsets resample
/// through the cubic kernel, so region negotiation inflates requests by the
/// kernel support.
#[derive(Debug, Clone, Default)]
pub struct Translate {
    x: f64,
    y: f64,
}

impl Translate {
    fn is_integral(&self) -> bool {
        self.x.fract() == 0.0 && self.y.fract() == 0.0
    }

    /// The output pixels covered by `region` shifted forward.
    fn shift_forward(&self, region: Rect) -> Rect {
        if region.is_empty() {
            return region;
        }
        if self.is_integral() {
            return region.translate(self.x as i32, self.y as i32);
        }
        cover(
            region.x as f64 + self.x,
            region.y as f64 + self.y,
            region.right() as f64 + self.x,
            region.bottom() as f64 + self.y,
        )
    }

    /// The input pixels needed to produce `roi`.
    fn shift_backward(&self, roi: Rect) -> Rect {
        if roi.is_empty() {
            return roi;
        }
        if self.is_integral() {
            return roi.translate(-self.x as i32, -self.y as i32);
        }
        cover(
            roi.x as f64 - self.x,
            roi.y as f64 - self.y,
            roi.right() as f64 - self.x,
            roi.bottom() as f64 - self.y,
        )
        .inflate(CubicSampler::SUPPORT)
    }
}

/// The smallest integer rectangle covering a fractional one.
fn cover(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect {
    let x = x0.floor() as i32;
    let y = y0.floor() as i32;
    Rect::new(x, y, x1.ceil() as i32 - x, y1.ceil() as i32 - y)
}

impl Operation for Translate {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:translate")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        PROPERTIES
    }

    fn set_property(&mut self, name: Ustr, value: Value) -> Result<(), PropertyError> {
        match name.as_str() {
            "x" => self.x = value.expect_float(name)?,
            "y" => self.y = value.expect_float(name)?,
            _ => return Err(PropertyError::Unknown { name }),
        }
        Ok(())
    }

    fn get_property(&self, name: Ustr) -> Option<Value> {
        match name.as_str() {
            "x" => Some(Value::Float(self.x)),
            "y" => Some(Value::Float(self.y)),
            _ => None,
        }
    }

    fn prepare(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        ctx.set_pad_format("input", format::RGBA_FLOAT);
        ctx.set_pad_format("output", format::RGBA_FLOAT);
        Ok(())
    }

    fn get_defined_region(&self, ctx: OpCtx<'_>) -> Rect {
        let input = ctx.source_defined_region("input").unwrap_or(Rect::ZERO);
        self.shift_forward(input)
    }

    fn compute_affected_region(&self, _ctx: OpCtx<'_>, _input_pad: Ustr, region: Rect) -> Rect {
        let shifted = self.shift_forward(region);
        if self.is_integral() {
            shifted
        } else {
            // resampling smears the change by the kernel support
            shifted.inflate(CubicSampler::SUPPORT)
        }
    }

    fn compute_input_request(&self, _ctx: OpCtx<'_>, _input_pad: Ustr, roi: Rect) -> Rect {
        self.shift_backward(roi)
    }

    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        let result = ctx.result_rect();
        let Some(input) = ctx.input_buffer("input") else {
            bail!("input pad of `{}` is not connected", ctx.debug_name());
        };

        let out = PixelBuffer::new(format::RGBA_FLOAT, result);
        let mut pixels = Vec::with_capacity(result.area());

        if self.is_integral() {
            let (dx, dy) = (self.x as i32, self.y as i32);
            for y in result.y..result.bottom() {
                for x in result.x..result.right() {
                    pixels.push(input.pixel(x - dx, y - dy));
                }
            }
        } else {
            let sampler = CubicSampler::new(CubicKind::CatmullRom, &input);
            for y in result.y..result.bottom() {
                for x in result.x..result.right() {
                    pixels.push(sampler.get(x as f64 - self.x, y as f64 - self.y));
                }
            }
        }

        out.write_rgba(result, &pixels);
        ctx.set_output(out);
        Ok(())
    }
}

#[derive(Debug)]
pub struct TranslateFactory;

impl OperationFactory for TranslateFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:translate")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn categories(&self) -> &'static [&'static str] {
        &["transform"]
    }

    fn description(&self) -> &'static str {
        "Repositions the buffer (with subpixel precision)."
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        PROPERTIES
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(Translate::default())
    }
}
