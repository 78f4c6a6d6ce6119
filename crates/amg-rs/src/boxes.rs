//! Box format conversion and crop-frame geometry.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{AmgError, AmgResult};
use crate::types::CropBox;

/// Default absolute tolerance used by [`is_box_near_crop_edge`].
pub const DEFAULT_CROP_EDGE_ATOL: f32 = 20.0;

fn invalid(coords: &[f32], reason: &'static str) -> AmgError {
    AmgError::InvalidBox {
        coords: coords.to_vec(),
        reason,
    }
}

fn check_box_columns(boxes: &ArrayView2<'_, f32>) -> AmgResult<()> {
    if boxes.ncols() != 4 {
        return Err(AmgError::InvalidInput("boxes must have shape (N, 4)"));
    }
    Ok(())
}

/// Convert an `xyxy` box to `xywh`.
///
/// Degenerate boxes (`x2 < x1` or `y2 < y1`) and non-finite coordinates are
/// rejected rather than clamped.
pub fn box_xyxy_to_xywh(b: &[f32; 4]) -> AmgResult<[f32; 4]> {
    if b.iter().any(|v| !v.is_finite()) {
        return Err(invalid(b, "non-finite coordinate"));
    }
    let [x1, y1, x2, y2] = *b;
    if x2 < x1 || y2 < y1 {
        return Err(invalid(b, "max corner lies before min corner"));
    }
    Ok([x1, y1, x2 - x1, y2 - y1])
}

/// Batched [`box_xyxy_to_xywh`] over an `(N, 4)` array.
pub fn boxes_xyxy_to_xywh(boxes: ArrayView2<'_, f32>) -> AmgResult<Array2<f32>> {
    check_box_columns(&boxes)?;
    let mut out = boxes.to_owned();
    for mut row in out.rows_mut() {
        let b = [row[0], row[1], row[2], row[3]];
        let [_, _, bw, bh] = box_xyxy_to_xywh(&b)?;
        row[2] = bw;
        row[3] = bh;
    }
    Ok(out)
}

/// Translate crop-local `xyxy` boxes into original-image coordinates.
pub fn uncrop_boxes_xyxy(
    boxes: ArrayView2<'_, f32>,
    crop_box: &CropBox,
) -> AmgResult<Array2<f32>> {
    check_box_columns(&boxes)?;
    let [x0, y0, _, _] = *crop_box;
    let offset = Array1::from(vec![x0 as f32, y0 as f32, x0 as f32, y0 as f32]);
    Ok(&boxes + &offset)
}

/// Zero-pad crop-local `(N, ch, cw)` masks into an `(N, orig_h, orig_w)` frame.
pub fn uncrop_masks(
    masks: ArrayView3<'_, bool>,
    crop_box: &CropBox,
    orig_h: usize,
    orig_w: usize,
) -> AmgResult<Array3<bool>> {
    let coords = crop_box.map(|v| v as f32);
    let [x0, y0, x1, y1] = *crop_box;
    if x0 < 0 || y0 < 0 || x1 < x0 || y1 < y0 {
        return Err(invalid(&coords, "crop must be non-negative and well ordered"));
    }
    let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
    if x1 > orig_w || y1 > orig_h {
        return Err(invalid(&coords, "crop extends past the original image"));
    }
    let (n, h, w) = masks.dim();
    if h != y1 - y0 || w != x1 - x0 {
        return Err(invalid(&coords, "crop size does not match mask size"));
    }

    let mut out = Array3::from_elem((n, orig_h, orig_w), false);
    out.slice_mut(s![.., y0..y1, x0..x1]).assign(&masks);
    Ok(out)
}

/// Flag boxes that touch the crop boundary but not the original image boundary.
///
/// `boxes` are crop-local `xyxy`; `crop_box` and `orig_box` are in original-image
/// coordinates. A coordinate counts as near an edge when `|a - b| <= atol`.
pub fn is_box_near_crop_edge(
    boxes: ArrayView2<'_, f32>,
    crop_box: &CropBox,
    orig_box: &CropBox,
    atol: f32,
) -> AmgResult<Array1<bool>> {
    let boxes = uncrop_boxes_xyxy(boxes, crop_box)?;
    let crop = crop_box.map(|v| v as f32);
    let orig = orig_box.map(|v| v as f32);

    let flags = boxes
        .axis_iter(Axis(0))
        .map(|b| {
            b.iter().enumerate().any(|(i, &v)| {
                let near_crop_edge = (v - crop[i]).abs() <= atol;
                let near_image_edge = (v - orig[i]).abs() <= atol;
                near_crop_edge && !near_image_edge
            })
        })
        .collect();
    Ok(flags)
}
