//! Indexed dataset access and batched loading with optional shuffling.
//!
//! Items of one batch are fetched in parallel on the loader's own worker pool
//! and returned in index order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use crate::batch::{batch_iterator, BatchIter};
use crate::error::{AmgError, AmgResult};
use crate::params::LoaderParams;

/// A collection with a length and indexed item access.
pub trait Dataset: Sync {
    type Item: Send;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch item `index`; `index` is always below `len()`.
    fn get(&self, index: usize) -> Self::Item;
}

impl<T: Clone + Send + Sync> Dataset for [T] {
    type Item = T;

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn get(&self, index: usize) -> T {
        self[index].clone()
    }
}

impl<T: Clone + Send + Sync> Dataset for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(&self, index: usize) -> T {
        self[index].clone()
    }
}

/// Produces batches of items from a [`Dataset`].
pub struct DataLoader<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    params: LoaderParams,
    pool: Option<ThreadPool>,
    order: Vec<usize>,
    rng: StdRng,
}

impl<'a, D: Dataset + ?Sized> DataLoader<'a, D> {
    pub fn new(dataset: &'a D, params: LoaderParams) -> AmgResult<Self> {
        if params.batch_size == 0 {
            return Err(AmgError::InvalidInput("loader batch size must be positive"));
        }
        let pool = match params.num_workers {
            0 => None,
            n => Some(ThreadPoolBuilder::new().num_threads(n).build()?),
        };
        let rng = StdRng::seed_from_u64(params.seed.unwrap_or_else(rand::random));
        debug!(
            items = dataset.len(),
            batch_size = params.batch_size,
            shuffle = params.shuffle,
            num_workers = params.num_workers,
            "created data loader"
        );
        Ok(DataLoader {
            dataset,
            params,
            pool,
            order: Vec::new(),
            rng,
        })
    }

    /// Number of batches per pass.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.params.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn params(&self) -> &LoaderParams {
        &self.params
    }

    /// Start a pass over the dataset. With `shuffle` set, every pass draws a
    /// new order.
    pub fn batches(&mut self) -> AmgResult<Batches<'_, D>> {
        self.order = (0..self.dataset.len()).collect();
        if self.params.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        let chunks = batch_iterator(self.params.batch_size, (self.order.as_slice(),))?;
        Ok(Batches {
            dataset: self.dataset,
            pool: self.pool.as_ref(),
            chunks,
        })
    }
}

/// One pass of a [`DataLoader`].
pub struct Batches<'s, D: Dataset + ?Sized> {
    dataset: &'s D,
    pool: Option<&'s ThreadPool>,
    chunks: BatchIter<(&'s [usize],)>,
}

impl<D: Dataset + ?Sized> Iterator for Batches<'_, D> {
    type Item = Vec<D::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let (indices,) = self.chunks.next()?;
        let dataset = self.dataset;
        trace!(size = indices.len(), "loading batch");
        let batch: Vec<D::Item> = match self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| dataset.get(i))
                    .collect::<Vec<_>>()
            }),
            None => indices.iter().map(|&i| dataset.get(i)).collect(),
        };
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl<D: Dataset + ?Sized> ExactSizeIterator for Batches<'_, D> {}
