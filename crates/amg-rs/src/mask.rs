//! Uncompressed RLE codec for binary masks.
//!
//! Counts follow the COCO convention: column-major scan order, alternating
//! background/foreground runs starting with background. A mask whose first
//! scanned pixel is foreground starts with a zero-length background run.

use ndarray::{Array2, ArrayView3, Axis, ShapeBuilder};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{AmgError, AmgResult};
use crate::types::Rle;

/// `size` and run counts are `u32`, so each side and the pixel count must fit.
fn checked_size(h: usize, w: usize) -> AmgResult<(u32, u32)> {
    let (Ok(hu), Ok(wu)) = (u32::try_from(h), u32::try_from(w)) else {
        return Err(AmgError::InvalidInput("mask side does not fit in u32"));
    };
    if u64::from(hu) * u64::from(wu) > u64::from(u32::MAX) {
        return Err(AmgError::InvalidInput("mask has too many pixels for u32 run counts"));
    }
    Ok((hu, wu))
}

/// Run-length encode pixels that are already in column-major scan order.
fn encode_runs(pixels: impl Iterator<Item = bool>, h: u32, w: u32) -> Rle {
    let mut counts = Vec::new();
    let mut p = false;
    let mut c: u32 = 0;

    for v in pixels {
        if v != p {
            counts.push(c);
            c = 0;
            p = v;
        }
        c += 1;
    }
    counts.push(c);

    Rle::new(h, w, counts)
}

/// Encode a column-major binary mask into RLE.
///
/// `mask` is stored in column-major order (Fortran order): pixel (x, y) is at index `y + h * x`.
/// Length must be `h * w`.
pub fn encode(mask: &[bool], h: u32, w: u32) -> AmgResult<Rle> {
    let n = (h as usize) * (w as usize);
    if mask.len() != n {
        return Err(AmgError::LengthMismatch {
            expected: n,
            got: mask.len(),
        });
    }
    Ok(encode_runs(mask.iter().copied(), h, w))
}

/// Decode an RLE to a column-major binary mask of size `h * w`.
pub fn decode(rle: &Rle) -> AmgResult<Vec<bool>> {
    rle.validate()?;
    let mut mask = vec![false; rle.pixel_count() as usize];
    let mut idx = 0usize;
    let mut v = false;
    for &c in &rle.counts {
        let end = idx + c as usize;
        mask[idx..end].fill(v);
        idx = end;
        v = !v;
    }
    Ok(mask)
}

/// Encode a batch of `(N, h, w)` masks, one RLE per mask.
///
/// Masks are encoded independently and in parallel.
pub fn mask_to_rle(masks: ArrayView3<'_, bool>) -> AmgResult<Vec<Rle>> {
    let (n, h, w) = masks.dim();
    let (hu, wu) = checked_size(h, w)?;
    debug!(n, h, w, "encoding masks to RLE");

    let rles = (0..n)
        .into_par_iter()
        .map(|i| {
            let mask = masks.index_axis(Axis(0), i);
            // Iterating the transposed view walks each column top to bottom.
            encode_runs(mask.t().iter().copied(), hu, wu)
        })
        .collect();
    Ok(rles)
}

/// Decode one RLE into an `(h, w)` mask in row-major layout.
pub fn rle_to_mask(rle: &Rle) -> AmgResult<Array2<bool>> {
    let flat = decode(rle)?;
    let shape = (rle.h() as usize, rle.w() as usize).f();
    let mask = Array2::from_shape_vec(shape, flat)?;
    Ok(mask.as_standard_layout().into_owned())
}

/// Compute the area (number of foreground pixels) of an RLE mask.
///
/// Only sums the odd-indexed runs (which represent 1s). Does not validate.
pub fn area(rle: &Rle) -> u64 {
    rle.counts.iter().skip(1).step_by(2).map(|&c| c as u64).sum()
}

/// Foreground area of an RLE, rejecting records whose counts do not cover `size`.
pub fn area_from_rle(rle: &Rle) -> AmgResult<u64> {
    rle.validate()?;
    Ok(area(rle))
}

/// Compute the bounding box `[x, y, w, h]` of the foreground of an RLE mask.
///
/// An empty foreground yields `[0, 0, 0, 0]`.
pub fn rle_to_box_xywh(rle: &Rle) -> AmgResult<[f32; 4]> {
    rle.validate()?;
    let h = rle.h() as usize;
    if h == 0 || rle.w() == 0 {
        return Ok([0.0; 4]);
    }

    let mut xs = rle.w() as usize;
    let mut xe: usize = 0;
    let mut ys = h;
    let mut ye: usize = 0;
    let mut has_any = false;

    let mut cc = 0usize;
    for (i, &c) in rle.counts.iter().enumerate() {
        let c = c as usize;
        if i % 2 == 1 && c > 0 {
            has_any = true;
            let x1 = cc / h;
            let y1 = cc % h;
            let end = cc + c - 1;
            let x2 = end / h;
            let y2 = end % h;

            xs = xs.min(x1);
            xe = xe.max(x2 + 1);
            ys = ys.min(y1);
            // A run that wraps into another column covers every row in between.
            if x1 != x2 {
                ys = 0;
                ye = h;
            }
            ye = ye.max(y2 + 1);
        }
        cc += c;
    }

    if !has_any {
        return Ok([0.0; 4]);
    }

    Ok([xs as f32, ys as f32, (xe - xs) as f32, (ye - ys) as f32])
}
