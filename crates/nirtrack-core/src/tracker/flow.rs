//! Pyramidal Lucas-Kanade optical flow for sparse points.
//!
//! Forward-additive formulation: gradients are taken at the warped position
//! in the current image and the 2×2 system is re-solved each iteration.
//! Displacements are estimated coarse-to-fine and doubled between levels.

use crate::frame::Frame;

/// A single-channel `f32` image used for flow computations.
#[derive(Debug, Clone)]
pub struct GrayImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self { width, height, data }
    }

    /// Channel 0 of `frame` as floats.
    pub fn from_frame(frame: &Frame) -> Self {
        let (h, w, _) = frame.data.dim();
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(frame.data[[y, x, 0]] as f32);
            }
        }
        Self::new(w, h, data)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn at(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    /// Bilinear sample at a sub-pixel position. Coordinates outside the
    /// image read the nearest border pixel.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);

        let tl = self.at(x0, y0);
        let tr = self.at(x0 + 1, y0);
        let bl = self.at(x0, y0 + 1);
        let br = self.at(x0 + 1, y0 + 1);

        let top = tl * (1.0 - fx) + tr * fx;
        let bot = bl * (1.0 - fx) + br * fx;
        top * (1.0 - fy) + bot * fy
    }

    /// Half-resolution copy using 2×2 box averaging.
    pub fn downsample(&self) -> Self {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let (sx, sy) = ((2 * x) as isize, (2 * y) as isize);
                let sum = self.at(sx, sy) + self.at(sx + 1, sy) + self.at(sx, sy + 1) + self.at(sx + 1, sy + 1);
                data.push(sum / 4.0);
            }
        }
        Self::new(w, h, data)
    }
}

/// Image pyramid; level 0 is full resolution.
#[derive(Debug, Clone)]
pub struct Pyramid {
    pub levels: Vec<GrayImage>,
}

impl Pyramid {
    /// Build up to `max_levels` levels, stopping before a level would be
    /// narrower than `min_size` in either dimension.
    pub fn build(base: GrayImage, max_levels: usize, min_size: usize) -> Self {
        let mut levels = vec![base];
        while levels.len() < max_levels.max(1) {
            let Some(last) = levels.last() else { break };
            if last.width() / 2 < min_size || last.height() / 2 < min_size {
                break;
            }
            let next = last.downsample();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn base(&self) -> &GrayImage {
        &self.levels[0]
    }
}

/// Iterative Lucas-Kanade point tracker.
#[derive(Debug, Clone, Copy)]
pub struct LucasKanade {
    /// Patch half-size; the patch is `(2 * window + 1)²`.
    pub window: usize,
    pub max_iterations: usize,
    /// Convergence threshold in pixels.
    pub epsilon: f32,
}

enum LkStep {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

impl LucasKanade {
    /// Track `(x, y)` from `prev` to `curr`. Returns `None` if the patch has
    /// no usable gradient at some level.
    pub fn track(&self, prev: &Pyramid, curr: &Pyramid, x: f32, y: f32) -> Option<(f32, f32)> {
        let num_levels = prev.num_levels().min(curr.num_levels());
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;

        for level in (0..num_levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            match self.solve(&prev.levels[level], &curr.levels[level], x * scale, y * scale, dx, dy) {
                LkStep::Converged(ndx, ndy) | LkStep::MaxIter(ndx, ndy) => {
                    dx = ndx;
                    dy = ndy;
                }
                LkStep::Singular => return None,
            }
            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let (nx, ny) = (x + dx, y + dy);
        (nx.is_finite() && ny.is_finite()).then_some((nx, ny))
    }

    fn solve(&self, prev: &GrayImage, curr: &GrayImage, fx: f32, fy: f32, mut dx: f32, mut dy: f32) -> LkStep {
        let half = self.window as isize;

        for _ in 0..self.max_iterations {
            let mut h00 = 0.0f32;
            let mut h01 = 0.0f32;
            let mut h11 = 0.0f32;
            let mut b0 = 0.0f32;
            let mut b1 = 0.0f32;

            for py in -half..=half {
                for px in -half..=half {
                    let (ox, oy) = (px as f32, py as f32);
                    let t = prev.sample(fx + ox, fy + oy);
                    let wx = fx + dx + ox;
                    let wy = fy + dy + oy;
                    let e = t - curr.sample(wx, wy);

                    let gx = 0.5 * (curr.sample(wx + 1.0, wy) - curr.sample(wx - 1.0, wy));
                    let gy = 0.5 * (curr.sample(wx, wy + 1.0) - curr.sample(wx, wy - 1.0));

                    h00 += gx * gx;
                    h01 += gx * gy;
                    h11 += gy * gy;
                    b0 += gx * e;
                    b1 += gy * e;
                }
            }

            let det = h00 * h11 - h01 * h01;
            if det.abs() < 1e-6 {
                return LkStep::Singular;
            }
            let inv_det = 1.0 / det;
            let step_x = inv_det * (h11 * b0 - h01 * b1);
            let step_y = inv_det * (h00 * b1 - h01 * b0);
            dx += step_x;
            dy += step_y;

            if step_x * step_x + step_y * step_y < self.epsilon * self.epsilon {
                return LkStep::Converged(dx, dy);
            }
        }

        LkStep::MaxIter(dx, dy)
    }
}

/// Normalized cross-correlation of the `(2 * half + 1)²` patches around
/// `a` in `img_a` and `b` in `img_b`. Flat patches correlate as 0.
pub fn patch_ncc(img_a: &GrayImage, a: (f32, f32), img_b: &GrayImage, b: (f32, f32), half: usize) -> f32 {
    let half = half as isize;
    let n = ((2 * half + 1) * (2 * half + 1)) as f32;
    let mut pa = Vec::with_capacity(n as usize);
    let mut pb = Vec::with_capacity(n as usize);
    for py in -half..=half {
        for px in -half..=half {
            let (ox, oy) = (px as f32, py as f32);
            pa.push(img_a.sample(a.0 + ox, a.1 + oy));
            pb.push(img_b.sample(b.0 + ox, b.1 + oy));
        }
    }
    let mean_a = pa.iter().sum::<f32>() / n;
    let mean_b = pb.iter().sum::<f32>() / n;
    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for (va, vb) in pa.iter().zip(&pb) {
        let (da, db) = (va - mean_a, vb - mean_b);
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 {
        cov / denom
    } else {
        0.0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smooth two-axis pattern sampled with the origin shifted by `(sx, sy)`.
    pub(crate) fn pattern(width: usize, height: usize, sx: f32, sy: f32) -> GrayImage {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let (u, v) = (x as f32 - sx, y as f32 - sy);
                data.push(128.0 + 60.0 * (u * 0.12).sin() * (v * 0.10).cos() + 30.0 * (u * 0.07 + v * 0.09).sin());
            }
        }
        GrayImage::new(width, height, data)
    }

    #[test]
    fn test_sample_interpolates() {
        let img = GrayImage::new(2, 2, vec![0.0, 10.0, 20.0, 30.0]);
        assert_eq!(img.sample(0.0, 0.0), 0.0);
        assert_eq!(img.sample(0.5, 0.0), 5.0);
        assert_eq!(img.sample(0.5, 0.5), 15.0);
        // Clamped border
        assert_eq!(img.sample(-3.0, 5.0), 20.0);
    }

    #[test]
    fn test_downsample_averages() {
        let img = GrayImage::new(4, 2, vec![0.0, 4.0, 8.0, 8.0, 4.0, 0.0, 8.0, 8.0]);
        let half = img.downsample();
        assert_eq!((half.width(), half.height()), (2, 1));
        assert_eq!(half.sample(0.0, 0.0), 2.0);
        assert_eq!(half.sample(1.0, 0.0), 8.0);
    }

    #[test]
    fn test_pyramid_respects_min_size() {
        let pyr = Pyramid::build(GrayImage::new(64, 40, vec![0.0; 64 * 40]), 5, 12);
        // 64x40 → 32x20 → 16x10 stops (10 / 2 < 12 is checked before building the next)
        assert_eq!(pyr.num_levels(), 2);
        assert_eq!(pyr.levels[1].width(), 32);
    }

    #[test]
    fn test_lk_recovers_shift() {
        let prev = Pyramid::build(pattern(120, 100, 0.0, 0.0), 3, 16);
        let curr = Pyramid::build(pattern(120, 100, 2.0, 1.5), 3, 16);
        let lk = LucasKanade { window: 5, max_iterations: 20, epsilon: 0.01 };
        let (nx, ny) = lk.track(&prev, &curr, 60.0, 50.0).unwrap();
        assert!((nx - 62.0).abs() < 0.2, "x = {nx}");
        assert!((ny - 51.5).abs() < 0.2, "y = {ny}");
    }

    #[test]
    fn test_lk_flat_image_is_singular() {
        let flat = Pyramid::build(GrayImage::new(50, 50, vec![90.0; 2500]), 2, 8);
        let lk = LucasKanade { window: 3, max_iterations: 10, epsilon: 0.01 };
        assert!(lk.track(&flat, &flat, 25.0, 25.0).is_none());
    }

    #[test]
    fn test_ncc_identical_patch_is_one() {
        let img = pattern(40, 40, 0.0, 0.0);
        let ncc = patch_ncc(&img, (20.0, 20.0), &img, (20.0, 20.0), 4);
        assert!((ncc - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_ncc_flat_patch_is_zero() {
        let flat = GrayImage::new(10, 10, vec![5.0; 100]);
        assert_eq!(patch_ncc(&flat, (5.0, 5.0), &flat, (5.0, 5.0), 2), 0.0);
    }
}
