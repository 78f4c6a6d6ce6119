//! Batched storage and COCO-compatible uncompressed RLE for per-object
//! segmentation results, with the crop geometry used when masks are
//! generated crop by crop.

pub mod batch;
pub mod boxes;
pub mod error;
pub mod loader;
pub mod mask;
pub mod mask_data;
pub mod params;
pub mod types;

pub use batch::{batch_iterator, BatchIter, Batchable, Sequences};
pub use boxes::{
    box_xyxy_to_xywh, boxes_xyxy_to_xywh, is_box_near_crop_edge, uncrop_boxes_xyxy, uncrop_masks,
    DEFAULT_CROP_EDGE_ATOL,
};
pub use error::{AmgError, AmgResult};
pub use loader::{Batches, DataLoader, Dataset};
pub use mask::{area_from_rle, mask_to_rle, rle_to_box_xywh, rle_to_mask};
pub use mask_data::{ArrayField, Field, Keep, MaskData};
pub use params::{LoaderParams, Params};
pub use types::{CropBox, Element, Rle};
