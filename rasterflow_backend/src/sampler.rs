//! Cubic interpolation kernel shared by the geometric operations.
//!
//! The kernel is the two-parameter (b, c) cubic family: b=1, c=0 is the cubic
//! B-spline, b=0, c=0.5 is Catmull-Rom, and the formula mode derives
//! c = (1 - b) / 2 from a user-supplied b (Mitchell-Netravali for b = 1/3).
//!
//! Sampling works on a premultiplied snapshot of the input so fully
//! transparent neighbours cannot bleed their color into the result, and
//! applies a clamp-to-edge fetch inside the image with a transparent-black
//! abyss outside it.

use crate::buffer::PixelBuffer;
use crate::rect::Rect;
use strum::EnumIs;

#[derive(Debug, Clone, Copy, PartialEq, EnumIs)]
pub enum CubicKind {
    BSpline,
    CatmullRom,
    Formula { b: f64 },
}

impl CubicKind {
    /// The (b, c) kernel parameters of this mode.
    pub fn coefficients(self) -> (f64, f64) {
        match self {
            CubicKind::BSpline => (1.0, 0.0),
            CubicKind::CatmullRom => (0.0, 0.5),
            CubicKind::Formula { b } => (b, (1.0 - b) / 2.0),
        }
    }
}

/// The kernel weight at distance `x`, scaled by 1/6.
pub fn cubic_kernel(x: f64, b: f64, c: f64) -> f64 {
    let t = x.abs();
    let t2 = t * t;
    let t3 = t2 * t;

    let weight = if t < 1.0 {
        (12.0 - 9.0 * b - 6.0 * c) * t3 + (-18.0 + 12.0 * b + 6.0 * c) * t2 + (6.0 - 2.0 * b)
    } else if t < 2.0 {
        (-b - 6.0 * c) * t3
            + (6.0 * b + 30.0 * c) * t2
            + (-12.0 * b - 48.0 * c) * t
            + (8.0 * b + 24.0 * c)
    } else {
        0.0
    };

    weight / 6.0
}

#[derive(Debug)]
pub struct CubicSampler {
    b: f64,
    c: f64,
    extent: Rect,
    /// Premultiplied RGBA, row-major over `extent`.
    texels: Vec<[f32; 4]>,
}

impl CubicSampler {
    /// Kernel support radius: taps reach up to 2 pixels from the sample point.
    pub const SUPPORT: i32 = 2;

    pub fn new(kind: CubicKind, input: &PixelBuffer) -> Self {
        let (b, c) = kind.coefficients();
        let extent = input.extent();
        let texels = input
            .pixels_rgba(extent)
            .into_iter()
            .map(|px| [px[0] * px[3], px[1] * px[3], px[2] * px[3], px[3]])
            .collect();
        Self {
            b,
            c,
            extent,
            texels,
        }
    }

    /// Samples at fractional `(x, y)` in buffer coordinates: the weighted
    /// color sum divided by the weighted alpha sum, with alpha clamped to
    /// [0, 1]. Points strictly outside the image are abyss: transparent
    /// black.
    pub fn get(&self, x: f64, y: f64) -> [f32; 4] {
        let ext = self.extent;
        if x < ext.x as f64 || y < ext.y as f64 || x >= ext.right() as f64 || y >= ext.bottom() as f64
        {
            return [0.0; 4];
        }

        let u = x.floor() as i32;
        let v = y.floor() as i32;

        let mut sum = [0.0f64; 4];
        for j in -1..=2 {
            // weights come from the nominal tap position; only the fetch
            // clamps to the edge
            let wy = cubic_kernel(y - (v + j) as f64, self.b, self.c);
            let pv = (v + j).clamp(ext.y, ext.bottom() - 1);
            for i in -1..=2 {
                let w = wy * cubic_kernel(x - (u + i) as f64, self.b, self.c);
                let pu = (u + i).clamp(ext.x, ext.right() - 1);
                let texel = self.texel(pu, pv);
                let a = texel[3] as f64;
                sum[0] += w * texel[0] as f64 * a;
                sum[1] += w * texel[1] as f64 * a;
                sum[2] += w * texel[2] as f64 * a;
                sum[3] += w * a;
            }
        }

        if sum[3] <= 0.0 {
            return [0.0; 4];
        }

        let norm = 1.0 / sum[3];
        [
            (sum[0] * norm).max(0.0) as f32,
            (sum[1] * norm).max(0.0) as f32,
            (sum[2] * norm).max(0.0) as f32,
            sum[3].clamp(0.0, 1.0) as f32,
        ]
    }

    fn texel(&self, x: i32, y: i32) -> [f32; 4] {
        let row = (y - self.extent.y) as usize;
        let col = (x - self.extent.x) as usize;
        self.texels[row * self.extent.width as usize + col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RGBA_FLOAT;
    use rstest::rstest;

    const EPS: f64 = 1e-12;

    #[rstest]
    #[case(CubicKind::CatmullRom, 0.0, 1.0)]
    #[case(CubicKind::CatmullRom, 0.5, 0.5625)]
    #[case(CubicKind::CatmullRom, 1.0, 0.0)]
    #[case(CubicKind::CatmullRom, 1.5, -0.0625)]
    #[case(CubicKind::CatmullRom, 2.0, 0.0)]
    #[case(CubicKind::CatmullRom, 2.5, 0.0)]
    #[case(CubicKind::BSpline, 0.0, 4.0 / 6.0)]
    #[case(CubicKind::BSpline, 1.0, 1.0 / 6.0)]
    #[case(CubicKind::BSpline, 2.0, 0.0)]
    fn kernel_values(#[case] kind: CubicKind, #[case] t: f64, #[case] expected: f64) {
        let (b, c) = kind.coefficients();
        assert!((cubic_kernel(t, b, c) - expected).abs() < EPS);
        assert!((cubic_kernel(-t, b, c) - expected).abs() < EPS);
    }

    #[test]
    fn formula_with_b_zero_is_catmull_rom() {
        assert_eq!(
            CubicKind::Formula { b: 0.0 }.coefficients(),
            CubicKind::CatmullRom.coefficients()
        );
        // 2c + b = 1 holds for any b
        let (b, c) = CubicKind::Formula { b: 0.4 }.coefficients();
        assert!((2.0 * c + b - 1.0).abs() < EPS);
    }

    fn checkerboard(extent: Rect) -> PixelBuffer {
        let buf = PixelBuffer::new(RGBA_FLOAT, extent);
        for y in extent.y..extent.bottom() {
            for x in extent.x..extent.right() {
                let v = if (x + y) % 2 == 0 { 1.0 } else { 0.25 };
                buf.put_pixel(x, y, [v, 1.0 - v, v * 0.5, 1.0]);
            }
        }
        buf
    }

    #[test]
    fn integer_points_reproduce_the_input() {
        let buf = checkerboard(Rect::new(0, 0, 5, 5));
        let sampler = CubicSampler::new(CubicKind::CatmullRom, &buf);
        for y in 1..4 {
            for x in 1..4 {
                let got = sampler.get(x as f64, y as f64);
                let want = buf.pixel(x, y);
                for (g, w) in got.iter().zip(want) {
                    assert!((g - w).abs() < 1e-5, "mismatch at ({x}, {y}): {got:?} vs {want:?}");
                }
            }
        }
    }

    #[test]
    fn outside_the_image_is_abyss() {
        let buf = checkerboard(Rect::new(0, 0, 4, 4));
        let sampler = CubicSampler::new(CubicKind::CatmullRom, &buf);
        assert_eq!(sampler.get(-0.001, 1.0), [0.0; 4]);
        assert_eq!(sampler.get(4.0, 1.0), [0.0; 4]);
        assert_eq!(sampler.get(1.0, -5.0), [0.0; 4]);
        assert_eq!(sampler.get(1.0, 4.5), [0.0; 4]);
        // the last in-bounds coordinate still samples
        assert_ne!(sampler.get(3.999, 3.999), [0.0; 4]);
    }

    #[test]
    fn half_pixel_catmull_rom_blend() {
        let buf = PixelBuffer::new(RGBA_FLOAT, Rect::new(0, 0, 4, 1));
        buf.put_pixel(0, 0, [1.0, 0.0, 0.0, 1.0]);
        buf.put_pixel(1, 0, [0.0, 1.0, 0.0, 1.0]);
        buf.put_pixel(2, 0, [0.0, 0.0, 1.0, 1.0]);
        buf.put_pixel(3, 0, [1.0, 1.0, 1.0, 1.0]);

        let sampler = CubicSampler::new(CubicKind::CatmullRom, &buf);
        let got = sampler.get(1.5, 0.0);

        // 1D weights at 1.5 are k(1.5), k(0.5), k(-0.5), k(-1.5) =
        // -0.0625, 0.5625, 0.5625, -0.0625: the green and blue neighbours
        // blend to 0.5 each and the negative red lobes clamp to zero
        let want = [0.0, 0.5, 0.5, 1.0];
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-4, "got {got:?}, want {want:?}");
        }
    }

    #[test]
    fn offset_extent_samples_in_buffer_coordinates() {
        let buf = checkerboard(Rect::new(10, 20, 4, 4));
        let sampler = CubicSampler::new(CubicKind::CatmullRom, &buf);
        assert_eq!(sampler.get(0.0, 0.0), [0.0; 4]);
        let got = sampler.get(11.0, 21.0);
        let want = buf.pixel(11, 21);
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-5);
        }
    }

    #[test]
    fn fractional_alpha_normalizes_by_the_alpha_sum_once() {
        let buf = PixelBuffer::new(RGBA_FLOAT, Rect::new(0, 0, 4, 1));
        buf.put_pixel(1, 0, [1.0, 0.0, 0.0, 0.5]);

        let sampler = CubicSampler::new(CubicKind::CatmullRom, &buf);
        // at an integer point only the center tap contributes, so the
        // output is sum_rgb / sum_a = (1.0 * 0.5) * 0.5 / 0.5
        let got = sampler.get(1.0, 0.0);
        let want = [0.5, 0.0, 0.0, 0.5];
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-6, "got {got:?}, want {want:?}");
        }
    }

    #[test]
    fn border_weights_keep_the_nominal_tap_distances() {
        let buf = PixelBuffer::new(RGBA_FLOAT, Rect::new(0, 0, 4, 1));
        buf.put_pixel(0, 0, [0.0, 0.0, 0.0, 1.0]);
        buf.put_pixel(1, 0, [1.0, 0.0, 0.0, 1.0]);
        buf.put_pixel(2, 0, [1.0, 0.0, 0.0, 1.0]);
        buf.put_pixel(3, 0, [1.0, 0.0, 0.0, 1.0]);

        let sampler = CubicSampler::new(CubicKind::CatmullRom, &buf);
        // sampling half a pixel from the left edge: the out-of-image tap
        // keeps its k(1.5) weight even though its fetch clamps to column 0,
        // so the four weights still sum to one
        let got = sampler.get(0.5, 0.0);
        let want = [0.5, 0.0, 0.0, 1.0];
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-5, "got {got:?}, want {want:?}");
        }
    }

    #[test]
    fn transparent_neighbours_do_not_bleed_color() {
        let buf = PixelBuffer::new(RGBA_FLOAT, Rect::new(0, 0, 4, 1));
        // a saturated but fully transparent pixel next to an opaque one
        buf.put_pixel(0, 0, [0.0, 1.0, 0.0, 1.0]);
        buf.put_pixel(1, 0, [1.0, 0.0, 0.0, 0.0]);
        buf.put_pixel(2, 0, [0.0, 1.0, 0.0, 1.0]);
        buf.put_pixel(3, 0, [0.0, 1.0, 0.0, 1.0]);

        let sampler = CubicSampler::new(CubicKind::BSpline, &buf);
        let got = sampler.get(1.5, 0.0);
        // no red may leak in from the transparent neighbour
        assert!(got[0] < 1e-6, "transparent red bled into {got:?}");
        assert!(got[1] > 0.9);
    }
}
