//! Built-in operations.

pub mod buffer_source;
pub mod color_temperature;
pub mod difference;
pub mod invert;
pub mod nop;
pub mod over;
pub mod translate;
pub mod write_buffer;
