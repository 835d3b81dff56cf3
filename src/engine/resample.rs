//! Downsampling kernels used to build overview levels.

use std::cmp::Ordering;

use crate::types::ResampleAlg;
use crate::view::PixelOps;

/// One band of samples with its dimensions
pub(crate) struct Plane<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
}

impl Plane<'_> {
    #[inline]
    fn value(&self, ops: &PixelOps, x: usize, y: usize, c: usize) -> f64 {
        ops.component(&self.data[(y * self.width + x) * ops.size..], c)
    }
}

/// Downsample `src` by `factor` into a `dst_width` x `dst_height` plane
pub(crate) fn downsample(
    src: &Plane<'_>,
    ops: &PixelOps,
    factor: usize,
    dst_width: usize,
    dst_height: usize,
    alg: ResampleAlg,
) -> Vec<u8> {
    let mut out = vec![0u8; dst_width * dst_height * ops.size];
    let mut values = vec![0.0; ops.components];
    for dy in 0..dst_height {
        for dx in 0..dst_width {
            let x0 = (dx * factor).min(src.width - 1);
            let y0 = (dy * factor).min(src.height - 1);
            let x1 = (x0 + factor).min(src.width);
            let y1 = (y0 + factor).min(src.height);
            let cell = Cell { x0, y0, x1, y1 };
            match alg {
                ResampleAlg::Nearest => nearest(src, ops, &cell, &mut values),
                ResampleAlg::Average | ResampleAlg::None => average(src, ops, &cell, &mut values),
                ResampleAlg::Mode => mode(src, ops, &cell, &mut values),
                ResampleAlg::Gauss => gauss(src, ops, &cell, factor, &mut values),
                ResampleAlg::Cubic => cubic(src, ops, &cell, factor, &mut values),
                ResampleAlg::AverageMagPhase => {
                    if ops.components == 2 {
                        average_magphase(src, ops, &cell, &mut values)
                    } else {
                        average(src, ops, &cell, &mut values)
                    }
                }
            }
            let at = (dy * dst_width + dx) * ops.size;
            for (c, v) in values.iter().enumerate() {
                ops.set_component(&mut out[at..], c, *v);
            }
        }
    }
    out
}

/// Source cell `[x0, x1) x [y0, y1)` covered by one destination pixel
struct Cell {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

impl Cell {
    fn center(&self) -> (f64, f64) {
        (
            (self.x0 + self.x1) as f64 / 2.0,
            (self.y0 + self.y1) as f64 / 2.0,
        )
    }
}

fn nearest(src: &Plane<'_>, ops: &PixelOps, cell: &Cell, out: &mut [f64]) {
    let x = (cell.x0 + cell.x1) / 2;
    let y = (cell.y0 + cell.y1) / 2;
    for (c, v) in out.iter_mut().enumerate() {
        *v = src.value(ops, x.min(src.width - 1), y.min(src.height - 1), c);
    }
}

fn average(src: &Plane<'_>, ops: &PixelOps, cell: &Cell, out: &mut [f64]) {
    let n = ((cell.x1 - cell.x0) * (cell.y1 - cell.y0)) as f64;
    for (c, v) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for y in cell.y0..cell.y1 {
            for x in cell.x0..cell.x1 {
                sum += src.value(ops, x, y, c);
            }
        }
        *v = sum / n;
    }
}

fn mode(src: &Plane<'_>, ops: &PixelOps, cell: &Cell, out: &mut [f64]) {
    let mut seen = Vec::with_capacity((cell.x1 - cell.x0) * (cell.y1 - cell.y0));
    for (c, v) in out.iter_mut().enumerate() {
        seen.clear();
        for y in cell.y0..cell.y1 {
            for x in cell.x0..cell.x1 {
                seen.push(src.value(ops, x, y, c));
            }
        }
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let (mut best, mut best_run) = (seen[0], 0);
        let mut i = 0;
        while i < seen.len() {
            let mut j = i + 1;
            while j < seen.len() && seen[j].to_bits() == seen[i].to_bits() {
                j += 1;
            }
            if j - i > best_run {
                best = seen[i];
                best_run = j - i;
            }
            i = j;
        }
        *v = best;
    }
}

/// Weighted mean over `[x0, x1) x [y0, y1)`; falls back to the plain cell
/// average when the weights cancel out
fn weighted(
    src: &Plane<'_>,
    ops: &PixelOps,
    cell: &Cell,
    reach: usize,
    weight: impl Fn(f64, f64) -> f64,
    out: &mut [f64],
) {
    let x0 = cell.x0.saturating_sub(reach);
    let y0 = cell.y0.saturating_sub(reach);
    let x1 = (cell.x1 + reach).min(src.width);
    let y1 = (cell.y1 + reach).min(src.height);
    let (cx, cy) = cell.center();
    let mut total = 0.0;
    for y in y0..y1 {
        for x in x0..x1 {
            total += weight(x as f64 + 0.5 - cx, y as f64 + 0.5 - cy);
        }
    }
    if total.abs() < 1e-12 {
        average(src, ops, cell, out);
        return;
    }
    for (c, v) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for y in y0..y1 {
            for x in x0..x1 {
                sum += weight(x as f64 + 0.5 - cx, y as f64 + 0.5 - cy) * src.value(ops, x, y, c);
            }
        }
        *v = sum / total;
    }
}

fn gauss(src: &Plane<'_>, ops: &PixelOps, cell: &Cell, factor: usize, out: &mut [f64]) {
    let sigma = (factor as f64 / 2.0).max(0.5);
    let k = 2.0 * sigma * sigma;
    weighted(
        src,
        ops,
        cell,
        factor / 2,
        |dx, dy| (-(dx * dx + dy * dy) / k).exp(),
        out,
    );
}

/// Catmull-Rom kernel
fn cubic_kernel(t: f64) -> f64 {
    let a = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (a + 2.0) * t * t * t - (a + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        a * t * t * t - 5.0 * a * t * t + 8.0 * a * t - 4.0 * a
    } else {
        0.0
    }
}

fn cubic(src: &Plane<'_>, ops: &PixelOps, cell: &Cell, factor: usize, out: &mut [f64]) {
    let scale = factor as f64;
    weighted(
        src,
        ops,
        cell,
        factor / 2,
        |dx, dy| cubic_kernel(dx / scale) * cubic_kernel(dy / scale),
        out,
    );
}

fn average_magphase(src: &Plane<'_>, ops: &PixelOps, cell: &Cell, out: &mut [f64]) {
    let n = ((cell.x1 - cell.x0) * (cell.y1 - cell.y0)) as f64;
    let (mut mag, mut phase) = (0.0, 0.0);
    for y in cell.y0..cell.y1 {
        for x in cell.x0..cell.x1 {
            let re = src.value(ops, x, y, 0);
            let im = src.value(ops, x, y, 1);
            mag += re.hypot(im);
            phase += im.atan2(re);
        }
    }
    let (mag, phase) = (mag / n, phase / n);
    out[0] = mag * phase.cos();
    out[1] = mag * phase.sin();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelType;

    fn plane(data: &[u8], width: usize, height: usize) -> Plane<'_> {
        Plane {
            data,
            width,
            height,
        }
    }

    #[test]
    fn average_of_two_by_two() {
        let ops = PixelOps::for_type(PixelType::Byte);
        let data = [0u8, 10, 20, 30, 40, 50, 60, 70];
        let out = downsample(&plane(&data, 4, 2), ops, 2, 2, 1, ResampleAlg::Average);
        assert_eq!(out, vec![25, 45]);
    }

    #[test]
    fn mode_picks_most_frequent() {
        let ops = PixelOps::for_type(PixelType::Byte);
        let data = [5u8, 9, 9, 9];
        let out = downsample(&plane(&data, 2, 2), ops, 2, 1, 1, ResampleAlg::Mode);
        assert_eq!(out, vec![9]);
    }

    #[test]
    fn uniform_input_is_preserved_by_every_kernel() {
        let ops = PixelOps::for_type(PixelType::UInt16);
        let data: Vec<u8> = std::iter::repeat(1234u16.to_ne_bytes())
            .take(36)
            .flatten()
            .collect();
        for alg in [
            ResampleAlg::Nearest,
            ResampleAlg::Average,
            ResampleAlg::Gauss,
            ResampleAlg::Cubic,
            ResampleAlg::Mode,
        ] {
            let out = downsample(&plane(&data, 6, 6), ops, 2, 3, 3, alg);
            for chunk in out.chunks_exact(2) {
                assert_eq!(u16::from_ne_bytes([chunk[0], chunk[1]]), 1234, "{}", alg);
            }
        }
    }

    #[test]
    fn odd_edges_use_partial_cells() {
        let ops = PixelOps::for_type(PixelType::Byte);
        let data = [2u8, 4, 100];
        let out = downsample(&plane(&data, 3, 1), ops, 2, 2, 1, ResampleAlg::Average);
        assert_eq!(out, vec![3, 100]);
    }
}
