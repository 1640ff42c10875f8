//! Pixel buffer service.
//!
//! A [`PixelBuffer`] is a rectangular region of pixels in one format. Buffers
//! are reference counted ([`SharedBuffer`]) and internally synchronized, so a
//! producer and its consumers can share one allocation; reads outside the
//! buffer extent yield transparent black.

use crate::format::Format;
use crate::rect::Rect;
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedBuffer = Arc<PixelBuffer>;

#[derive(derive_more::Debug)]
pub struct PixelBuffer {
    extent: Rect,
    format: Format,
    #[debug("(...)")]
    data: RwLock<Vec<u8>>,
}

impl PixelBuffer {
    /// A zeroed buffer covering `extent`.
    pub fn new(format: Format, extent: Rect) -> Self {
        let extent = if extent.is_empty() { Rect::ZERO } else { extent };
        Self {
            extent,
            format,
            data: RwLock::new(vec![0; extent.area() * format.bytes_per_pixel()]),
        }
    }

    /// A zero-sized buffer, used as the result of empty computations.
    pub fn empty(format: Format) -> Self {
        Self::new(format, Rect::ZERO)
    }

    /// A buffer filled with one straight-RGBA color.
    pub fn solid(format: Format, extent: Rect, color: [f32; 4]) -> Self {
        let buffer = Self::new(format, extent);
        {
            let bpp = format.bytes_per_pixel();
            let mut data = buffer.data.write();
            for px in data.chunks_exact_mut(bpp) {
                format.encode_pixel(color, px);
            }
        }
        buffer
    }

    pub fn extent(&self) -> Rect {
        self.extent
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Reads `roi` into `dst`, converting to `format` and scaling by `scale`
    /// (nearest neighbour; `roi` is in scaled coordinates). A `rowstride` of 0
    /// means tightly packed rows. Pixels outside the extent read as
    /// transparent black.
    pub fn get(&self, scale: f64, roi: Rect, format: Format, dst: &mut [u8], rowstride: usize) {
        if roi.is_empty() {
            return;
        }
        let bpp = format.bytes_per_pixel();
        let rowstride = if rowstride == 0 {
            roi.width as usize * bpp
        } else {
            rowstride
        };
        let data = self.data.read();

        for j in 0..roi.height {
            for i in 0..roi.width {
                let (sx, sy) = if scale == 1.0 {
                    (roi.x + i, roi.y + j)
                } else {
                    (
                        ((roi.x + i) as f64 / scale).floor() as i32,
                        ((roi.y + j) as f64 / scale).floor() as i32,
                    )
                };
                let px = self.read_pixel(&data, sx, sy);
                let offset = j as usize * rowstride + i as usize * bpp;
                format.encode_pixel(px, &mut dst[offset..offset + bpp]);
            }
        }
    }

    /// Writes `src` (in `format`, rows of `rowstride` bytes, 0 = packed) into
    /// `roi`; the part of `roi` outside the extent is ignored.
    pub fn set(&self, roi: Rect, format: Format, src: &[u8], rowstride: usize) {
        if roi.is_empty() {
            return;
        }
        let bpp = format.bytes_per_pixel();
        let rowstride = if rowstride == 0 {
            roi.width as usize * bpp
        } else {
            rowstride
        };
        let mut data = self.data.write();

        for j in 0..roi.height {
            for i in 0..roi.width {
                let (x, y) = (roi.x + i, roi.y + j);
                if !self.extent.contains(x, y) {
                    continue;
                }
                let offset = j as usize * rowstride + i as usize * bpp;
                let px = format.decode_pixel(&src[offset..offset + bpp]);
                self.write_pixel(&mut data, x, y, px);
            }
        }
    }

    /// One pixel in straight RGBA float; transparent black outside the extent.
    pub fn pixel(&self, x: i32, y: i32) -> [f32; 4] {
        self.read_pixel(&self.data.read(), x, y)
    }

    pub fn put_pixel(&self, x: i32, y: i32, px: [f32; 4]) {
        if self.extent.contains(x, y) {
            self.write_pixel(&mut self.data.write(), x, y, px);
        }
    }

    /// Decodes `roi` to straight RGBA float, row-major; transparent black
    /// outside the extent.
    pub fn pixels_rgba(&self, roi: Rect) -> Vec<[f32; 4]> {
        let data = self.data.read();
        let mut out = Vec::with_capacity(roi.area());
        for j in 0..roi.height {
            for i in 0..roi.width {
                out.push(self.read_pixel(&data, roi.x + i, roi.y + j));
            }
        }
        out
    }

    /// Encodes row-major straight RGBA float pixels into `roi`, clipped to the
    /// extent.
    pub fn write_rgba(&self, roi: Rect, pixels: &[[f32; 4]]) {
        assert!(pixels.len() >= roi.area(), "pixel slice too short for roi");
        let mut data = self.data.write();
        for j in 0..roi.height {
            for i in 0..roi.width {
                let (x, y) = (roi.x + i, roi.y + j);
                if self.extent.contains(x, y) {
                    self.write_pixel(&mut data, x, y, pixels[(j * roi.width + i) as usize]);
                }
            }
        }
    }

    /// A snapshot of `region` as its own buffer in the same format. The new
    /// extent is `region`; source pixels outside this buffer read as
    /// transparent black.
    pub fn sub_buffer(&self, region: Rect) -> SharedBuffer {
        let sub = PixelBuffer::new(self.format, region);
        {
            let src = self.data.read();
            let mut dst = sub.data.write();
            for j in 0..region.height {
                for i in 0..region.width {
                    let (x, y) = (region.x + i, region.y + j);
                    let px = self.read_pixel(&src, x, y);
                    sub.write_pixel(&mut dst, x, y, px);
                }
            }
        }
        Arc::new(sub)
    }

    fn byte_offset(&self, x: i32, y: i32) -> usize {
        let row = (y - self.extent.y) as usize;
        let col = (x - self.extent.x) as usize;
        (row * self.extent.width as usize + col) * self.format.bytes_per_pixel()
    }

    fn read_pixel(&self, data: &[u8], x: i32, y: i32) -> [f32; 4] {
        if !self.extent.contains(x, y) {
            return [0.0; 4];
        }
        let offset = self.byte_offset(x, y);
        self.format
            .decode_pixel(&data[offset..offset + self.format.bytes_per_pixel()])
    }

    fn write_pixel(&self, data: &mut [u8], x: i32, y: i32, px: [f32; 4]) {
        let offset = self.byte_offset(x, y);
        self.format
            .encode_pixel(px, &mut data[offset..offset + self.format.bytes_per_pixel()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{RGBA_FLOAT, Y_U8};

    #[test]
    fn solid_fill_and_pixel_access() {
        let buf = PixelBuffer::solid(RGBA_FLOAT, Rect::new(0, 0, 4, 4), [1.0, 0.5, 0.0, 1.0]);
        assert_eq!(buf.pixel(3, 3), [1.0, 0.5, 0.0, 1.0]);
        // outside the extent is transparent black
        assert_eq!(buf.pixel(4, 0), [0.0; 4]);
        assert_eq!(buf.pixel(-1, 0), [0.0; 4]);
    }

    #[test]
    fn get_converts_formats() {
        let buf = PixelBuffer::solid(RGBA_FLOAT, Rect::new(0, 0, 2, 1), [1.0, 1.0, 1.0, 1.0]);
        let mut out = [0u8; 2];
        buf.get(1.0, Rect::new(0, 0, 2, 1), Y_U8, &mut out, 0);
        assert_eq!(out, [255, 255]);
    }

    #[test]
    fn get_respects_rowstride() {
        let buf = PixelBuffer::solid(Y_U8, Rect::new(0, 0, 2, 2), [1.0, 1.0, 1.0, 1.0]);
        let mut out = [0u8; 8];
        buf.get(1.0, Rect::new(0, 0, 2, 2), Y_U8, &mut out, 4);
        assert_eq!(out, [255, 255, 0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn scaled_get_uses_nearest_source_pixel() {
        let buf = PixelBuffer::new(Y_U8, Rect::new(0, 0, 2, 1));
        buf.put_pixel(0, 0, [0.0, 0.0, 0.0, 1.0]);
        buf.put_pixel(1, 0, [1.0, 1.0, 1.0, 1.0]);

        // 2x upscale: each source pixel covers two destination pixels
        let mut out = [0u8; 4];
        buf.get(2.0, Rect::new(0, 0, 4, 1), Y_U8, &mut out, 0);
        assert_eq!(out, [0, 0, 255, 255]);
    }

    #[test]
    fn sub_buffer_is_a_snapshot() {
        let buf = PixelBuffer::solid(RGBA_FLOAT, Rect::new(0, 0, 4, 4), [0.25, 0.5, 0.75, 1.0]);
        let sub = buf.sub_buffer(Rect::new(2, 2, 4, 4));
        assert_eq!(sub.extent(), Rect::new(2, 2, 4, 4));
        assert_eq!(sub.pixel(3, 3), [0.25, 0.5, 0.75, 1.0]);
        // the part outside the parent reads as transparent black
        assert_eq!(sub.pixel(5, 5), [0.0; 4]);

        buf.put_pixel(3, 3, [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(sub.pixel(3, 3), [0.25, 0.5, 0.75, 1.0]);
    }
}
