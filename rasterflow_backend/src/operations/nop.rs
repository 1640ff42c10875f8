use crate::buffer::PixelBuffer;
use crate::format;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use ustr::Ustr;

/// Pass-through filter; also the operation behind graph proxy nodes.
#[derive(Debug, Clone, Default)]
pub struct NopOperation;

impl Operation for NopOperation {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:nop")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        match ctx.input_buffer("input") {
            Some(buffer) => ctx.bind_output(buffer),
            None => ctx.set_output(PixelBuffer::empty(format::RGBA_FLOAT)),
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct NopFactory;

impl OperationFactory for NopFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:nop")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn categories(&self) -> &'static [&'static str] {
        &["core"]
    }

    fn description(&self) -> &'static str {
        "Passes its input through unchanged."
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(NopOperation)
    }
}
