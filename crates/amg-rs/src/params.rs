use serde::{Deserialize, Serialize};

use crate::boxes::DEFAULT_CROP_EDGE_ATOL;

/// Post-processing parameters for crop-based mask generation.
///
/// Every field has a default, so a partial JSON config only needs to list the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Params {
    /// Absolute distance (pixels) at which a box coordinate counts as touching
    /// a crop or image edge (default: 20).
    pub crop_edge_atol: f32,
    /// Number of masks encoded per chunk (default: 64).
    pub batch_size: usize,
    /// Settings for feeding datasets through a [`DataLoader`](crate::DataLoader).
    pub loader: LoaderParams,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            crop_edge_atol: DEFAULT_CROP_EDGE_ATOL,
            batch_size: 64,
            loader: LoaderParams::default(),
        }
    }
}

/// Batching, shuffling and worker settings for a [`DataLoader`](crate::DataLoader).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderParams {
    /// Items per batch (default: 1).
    pub batch_size: usize,
    /// Re-permute item order on every pass (default: false).
    pub shuffle: bool,
    /// Worker threads used to fetch items; 0 fetches on the calling thread (default: 2).
    pub num_workers: usize,
    /// Seed for the shuffle order; drawn from entropy when unset.
    pub seed: Option<u64>,
}

impl Default for LoaderParams {
    fn default() -> Self {
        LoaderParams {
            batch_size: 1,
            shuffle: false,
            num_workers: 2,
            seed: None,
        }
    }
}
