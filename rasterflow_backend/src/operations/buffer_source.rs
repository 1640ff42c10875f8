use crate::buffer::SharedBuffer;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use crate::property::{PropertyError, PropertyInfo, Value, ValueType};
use crate::rect::Rect;
use miette::bail;
use ustr::Ustr;

const PROPERTIES: &[PropertyInfo] = &[PropertyInfo {
    name: "buffer",
    ty: ValueType::Buffer,
    description: "The image buffer to expose.",
}];

/// Source exposing a caller-provided buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferSource {
    buffer: Option<SharedBuffer>,
}

impl Operation for BufferSource {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:buffer-source")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Source
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        PROPERTIES
    }

    fn set_property(&mut self, name: Ustr, value: Value) -> Result<(), PropertyError> {
        match name.as_str() {
            "buffer" => {
                self.buffer = Some(value.expect_buffer(name)?);
                Ok(())
            }
            _ => Err(PropertyError::Unknown { name }),
        }
    }

    fn get_property(&self, name: Ustr) -> Option<Value> {
        match name.as_str() {
            "buffer" => self.buffer.clone().map(Value::Buffer),
            _ => None,
        }
    }

    fn prepare(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        match &self.buffer {
            Some(buffer) => ctx.set_pad_format("output", buffer.format()),
            None => ctx.set_pad_format("output", crate::format::RGBA_FLOAT),
        }
        Ok(())
    }

    fn get_defined_region(&self, _ctx: OpCtx<'_>) -> Rect {
        self.buffer
            .as_ref()
            .map(|buffer| buffer.extent())
            .unwrap_or(Rect::ZERO)
    }

    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        let Some(buffer) = &self.buffer else {
            bail!("no buffer bound to `{}`", ctx.debug_name());
        };
        ctx.bind_output(buffer.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub struct BufferSourceFactory;

impl OperationFactory for BufferSourceFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:buffer-source")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Source
    }

    fn categories(&self) -> &'static [&'static str] {
        &["input"]
    }

    fn description(&self) -> &'static str {
        "Exposes an existing buffer as a source."
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        PROPERTIES
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(BufferSource::default())
    }
}
