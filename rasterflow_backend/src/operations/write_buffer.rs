use crate::buffer::SharedBuffer;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use crate::property::{PropertyError, PropertyInfo, Value, ValueType};
use miette::bail;
use ustr::Ustr;

const PROPERTIES: &[PropertyInfo] = &[PropertyInfo {
    name: "buffer",
    ty: ValueType::Buffer,
    description: "The buffer to write the consumed pixels into.",
}];

/// Sink writing its input region into a caller-provided buffer.
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    buffer: Option<SharedBuffer>,
}

impl Operation for WriteBuffer {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:write-buffer")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Sink
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

    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        let Some(target) = &self.buffer else {
            bail!("no target buffer bound to `{}`", ctx.debug_name());
        };
        let Some(input) = ctx.input_buffer("input") else {
            bail!("input pad of `{}` is not connected", ctx.debug_name());
        };

        let region = ctx.result_rect().intersect(&target.extent());
        let pixels = input.pixels_rgba(region);
        target.write_rgba(region, &pixels);
        Ok(())
    }
}

#[derive(Debug)]
pub struct WriteBufferFactory;

impl OperationFactory for WriteBufferFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:write-buffer")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Sink
    }

    fn categories(&self) -> &'static [&'static str] {
        &["output"]
    }

    fn description(&self) -> &'static str {
        "Writes the consumed pixels into an existing buffer."
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        PROPERTIES
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(WriteBuffer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::format::RGBA_FLOAT;
    use crate::graph::Graph;
    use crate::rect::Rect;
    use std::sync::Arc;

    #[test]
    fn process_renders_the_chain_into_the_target() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 4, 4);

        let source = graph.create_node("rasterflow:buffer-source").unwrap();
        let white = Arc::new(PixelBuffer::solid(RGBA_FLOAT, extent, [1.0; 4]));
        graph.set(source, "buffer", Value::Buffer(white));

        let invert = graph.create_node("rasterflow:invert").unwrap();
        let sink = graph.create_node("rasterflow:write-buffer").unwrap();
        let target = Arc::new(PixelBuffer::new(RGBA_FLOAT, extent));
        graph.set(sink, "buffer", Value::Buffer(target.clone()));

        graph.link_many(&[source, invert, sink]).unwrap();
        graph.process(sink).unwrap();

        assert_eq!(target.pixel(0, 0), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(target.pixel(3, 3), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn sink_bounding_box_is_the_inputs_region() {
        let mut graph = Graph::new();
        let extent = Rect::new(0, 0, 8, 8);

        let source = graph.create_node("rasterflow:buffer-source").unwrap();
        let buffer = Arc::new(PixelBuffer::solid(RGBA_FLOAT, extent, [1.0; 4]));
        graph.set(source, "buffer", Value::Buffer(buffer));

        let sink = graph.create_node("rasterflow:write-buffer").unwrap();
        graph.link(source, sink).unwrap();

        assert_eq!(graph.get_bounding_box(sink), extent);
    }
}
