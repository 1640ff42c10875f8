//! Pixel format service.
//!
//! Formats are opaque [`Format`] handles interned in a process-wide table and
//! looked up by name, e.g. `"RGBA float"` or `"RaGaBaA float"` (the
//! premultiplied variant). Conversion between two formats goes through a
//! [`Fish`] obtained from [`fish`]; all conversions connect through straight
//! RGBA float.

use miette::bail;
use std::sync::LazyLock;
use utils::map::HashMap;

/// Straight (non-premultiplied) RGBA, 32-bit float channels.
pub const RGBA_FLOAT: Format = Format(0);
/// Premultiplied RGBA, 32-bit float channels.
pub const RAGABAA_FLOAT: Format = Format(1);
/// Straight RGBA, 8-bit channels.
pub const RGBA_U8: Format = Format(2);
/// Single 8-bit luminance channel.
pub const Y_U8: Format = Format(3);
/// Single 32-bit float luminance channel.
pub const Y_FLOAT: Format = Format(4);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format(usize);

impl Format {
    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.info().bytes_per_pixel
    }

    /// Whether color channels carry alpha-premultiplied values.
    pub fn is_premultiplied(self) -> bool {
        self.info().premultiplied
    }

    /// Decodes one pixel to straight RGBA float.
    pub fn decode_pixel(self, src: &[u8]) -> [f32; 4] {
        (self.info().decode)(src)
    }

    /// Encodes one straight RGBA float pixel.
    pub fn encode_pixel(self, px: [f32; 4], dst: &mut [u8]) {
        (self.info().encode)(px, dst)
    }

    fn info(self) -> &'static FormatInfo {
        &FORMATS[self.0]
    }
}

impl std::fmt::Debug for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Format({})", self.name())
    }
}

/// Looks a format up by its canonical name.
pub fn format_by_name(name: &str) -> miette::Result<Format> {
    static BY_NAME: LazyLock<HashMap<&'static str, Format>> = LazyLock::new(|| {
        FORMATS
            .iter()
            .enumerate()
            .map(|(i, info)| (info.name, Format(i)))
            .collect()
    });

    match BY_NAME.get(name) {
        Some(format) => Ok(*format),
        None => bail!("unknown pixel format `{}`", name),
    }
}

/// A conversion path between two formats.
#[derive(Debug, Clone, Copy)]
pub struct Fish {
    from: Format,
    to: Format,
}

/// Obtains the conversion path from `from` to `to`.
pub fn fish(from: Format, to: Format) -> Fish {
    Fish { from, to }
}

impl Fish {
    /// Converts `n` pixels from `src` into `dst`.
    ///
    /// # Panics
    /// If either slice is shorter than `n` pixels of its format.
    pub fn process(&self, src: &[u8], dst: &mut [u8], n: usize) {
        let src_bpp = self.from.bytes_per_pixel();
        let dst_bpp = self.to.bytes_per_pixel();
        assert!(src.len() >= n * src_bpp, "source slice too short");
        assert!(dst.len() >= n * dst_bpp, "destination slice too short");

        if self.from == self.to {
            dst[..n * dst_bpp].copy_from_slice(&src[..n * src_bpp]);
            return;
        }

        for i in 0..n {
            let px = self.from.decode_pixel(&src[i * src_bpp..(i + 1) * src_bpp]);
            self.to
                .encode_pixel(px, &mut dst[i * dst_bpp..(i + 1) * dst_bpp]);
        }
    }
}

struct FormatInfo {
    name: &'static str,
    bytes_per_pixel: usize,
    premultiplied: bool,
    decode: fn(&[u8]) -> [f32; 4],
    encode: fn([f32; 4], &mut [u8]),
}

static FORMATS: &[FormatInfo] = &[
    FormatInfo {
        name: "RGBA float",
        bytes_per_pixel: 16,
        premultiplied: false,
        decode: decode_rgba_float,
        encode: encode_rgba_float,
    },
    FormatInfo {
        name: "RaGaBaA float",
        bytes_per_pixel: 16,
        premultiplied: true,
        decode: decode_ragabaa_float,
        encode: encode_ragabaa_float,
    },
    FormatInfo {
        name: "RGBA u8",
        bytes_per_pixel: 4,
        premultiplied: false,
        decode: decode_rgba_u8,
        encode: encode_rgba_u8,
    },
    FormatInfo {
        name: "Y u8",
        bytes_per_pixel: 1,
        premultiplied: false,
        decode: decode_y_u8,
        encode: encode_y_u8,
    },
    FormatInfo {
        name: "Y float",
        bytes_per_pixel: 4,
        premultiplied: false,
        decode: decode_y_float,
        encode: encode_y_float,
    },
];

fn read_f32(src: &[u8], channel: usize) -> f32 {
    let offset = channel * 4;
    f32::from_ne_bytes([
        src[offset],
        src[offset + 1],
        src[offset + 2],
        src[offset + 3],
    ])
}

fn write_f32(dst: &mut [u8], channel: usize, value: f32) {
    dst[channel * 4..channel * 4 + 4].copy_from_slice(&value.to_ne_bytes());
}

fn luminance(px: [f32; 4]) -> f32 {
    0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2]
}

fn decode_rgba_float(src: &[u8]) -> [f32; 4] {
    [
        read_f32(src, 0),
        read_f32(src, 1),
        read_f32(src, 2),
        read_f32(src, 3),
    ]
}

fn encode_rgba_float(px: [f32; 4], dst: &mut [u8]) {
    for (i, value) in px.into_iter().enumerate() {
        write_f32(dst, i, value);
    }
}

fn decode_ragabaa_float(src: &[u8]) -> [f32; 4] {
    let a = read_f32(src, 3);
    if a == 0.0 {
        return [0.0, 0.0, 0.0, 0.0];
    }
    [
        read_f32(src, 0) / a,
        read_f32(src, 1) / a,
        read_f32(src, 2) / a,
        a,
    ]
}

fn encode_ragabaa_float(px: [f32; 4], dst: &mut [u8]) {
    let a = px[3];
    write_f32(dst, 0, px[0] * a);
    write_f32(dst, 1, px[1] * a);
    write_f32(dst, 2, px[2] * a);
    write_f32(dst, 3, a);
}

fn decode_rgba_u8(src: &[u8]) -> [f32; 4] {
    [
        src[0] as f32 / 255.0,
        src[1] as f32 / 255.0,
        src[2] as f32 / 255.0,
        src[3] as f32 / 255.0,
    ]
}

fn encode_rgba_u8(px: [f32; 4], dst: &mut [u8]) {
    for (i, value) in px.into_iter().enumerate() {
        dst[i] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

fn decode_y_u8(src: &[u8]) -> [f32; 4] {
    let y = src[0] as f32 / 255.0;
    [y, y, y, 1.0]
}

fn encode_y_u8(px: [f32; 4], dst: &mut [u8]) {
    dst[0] = (luminance(px).clamp(0.0, 1.0) * 255.0).round() as u8;
}

fn decode_y_float(src: &[u8]) -> [f32; 4] {
    let y = read_f32(src, 0);
    [y, y, y, 1.0]
}

fn encode_y_float(px: [f32; 4], dst: &mut [u8]) {
    write_f32(dst, 0, luminance(px));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(format_by_name("RGBA float").unwrap(), RGBA_FLOAT);
        assert_eq!(format_by_name("RaGaBaA float").unwrap(), RAGABAA_FLOAT);
        assert_eq!(format_by_name("Y u8").unwrap(), Y_U8);
        assert!(format_by_name("YCbCr nonsense").is_err());
    }

    #[test]
    fn premultiplied_round_trip() {
        let px = [0.5, 0.25, 1.0, 0.5];
        let mut encoded = [0u8; 16];
        RAGABAA_FLOAT.encode_pixel(px, &mut encoded);
        // stored channels are premultiplied
        assert_eq!(read_f32(&encoded, 0), 0.25);
        let decoded = RAGABAA_FLOAT.decode_pixel(&encoded);
        for (got, want) in decoded.iter().zip(px) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn fully_transparent_premultiplied_decodes_to_zero() {
        let mut encoded = [0u8; 16];
        RAGABAA_FLOAT.encode_pixel([0.7, 0.8, 0.9, 0.0], &mut encoded);
        assert_eq!(RAGABAA_FLOAT.decode_pixel(&encoded), [0.0; 4]);
    }

    #[test]
    fn fish_converts_between_formats() {
        let white = [1.0f32, 1.0, 1.0, 1.0];
        let mut src = [0u8; 16];
        RGBA_FLOAT.encode_pixel(white, &mut src);

        let mut dst = [0u8; 1];
        fish(RGBA_FLOAT, Y_U8).process(&src, &mut dst, 1);
        assert_eq!(dst[0], 255);

        let mut back = [0u8; 16];
        fish(Y_U8, RGBA_FLOAT).process(&dst, &mut back, 1);
        assert_eq!(RGBA_FLOAT.decode_pixel(&back), [1.0, 1.0, 1.0, 1.0]);
    }
}
