//! Lock-step batching over several equal-length sequences.
//!
//! Batches borrow from their sources; nothing is copied or materialized ahead
//! of the batch currently being yielded.

use std::iter::FusedIterator;
use std::ops::Range;

use ndarray::{ArrayView, Axis, Dimension, Slice};

use crate::error::{AmgError, AmgResult};

/// A sequence that can be cut into contiguous batches along its leading axis.
pub trait Batchable {
    type Batch;

    fn batch_len(&self) -> usize;

    /// Slice `range` out of the sequence. `range` is always within `0..batch_len()`.
    fn slice_batch(&self, range: Range<usize>) -> Self::Batch;
}

impl<'a, T> Batchable for &'a [T] {
    type Batch = &'a [T];

    fn batch_len(&self) -> usize {
        self.len()
    }

    fn slice_batch(&self, range: Range<usize>) -> &'a [T] {
        let slice: &'a [T] = *self;
        &slice[range]
    }
}

impl<'a, T> Batchable for &'a Vec<T> {
    type Batch = &'a [T];

    fn batch_len(&self) -> usize {
        self.len()
    }

    fn slice_batch(&self, range: Range<usize>) -> &'a [T] {
        let v: &'a Vec<T> = *self;
        &v[range]
    }
}

impl<'a, A, D: Dimension> Batchable for ArrayView<'a, A, D> {
    type Batch = ArrayView<'a, A, D>;

    fn batch_len(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    fn slice_batch(&self, range: Range<usize>) -> ArrayView<'a, A, D> {
        self.clone().slice_axis_move(Axis(0), Slice::from(range))
    }
}

/// A group of parallel sequences sliced together.
///
/// Implemented for tuples of one to four [`Batchable`]s and for a `Vec` of a
/// single [`Batchable`] type.
pub trait Sequences {
    type Batch;

    fn lengths(&self) -> Vec<usize>;

    fn slice_all(&self, range: Range<usize>) -> Self::Batch;
}

macro_rules! impl_sequences_for_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: Batchable),+> Sequences for ($($name,)+) {
            type Batch = ($($name::Batch,)+);

            fn lengths(&self) -> Vec<usize> {
                vec![$(self.$idx.batch_len()),+]
            }

            fn slice_all(&self, range: Range<usize>) -> Self::Batch {
                ($(self.$idx.slice_batch(range.clone()),)+)
            }
        }
    };
}

impl_sequences_for_tuple!(A.0);
impl_sequences_for_tuple!(A.0, B.1);
impl_sequences_for_tuple!(A.0, B.1, C.2);
impl_sequences_for_tuple!(A.0, B.1, C.2, D.3);

impl<S: Batchable> Sequences for Vec<S> {
    type Batch = Vec<S::Batch>;

    fn lengths(&self) -> Vec<usize> {
        self.iter().map(Batchable::batch_len).collect()
    }

    fn slice_all(&self, range: Range<usize>) -> Self::Batch {
        self.iter().map(|s| s.slice_batch(range.clone())).collect()
    }
}

/// Lazy iterator returned by [`batch_iterator`].
#[derive(Debug, Clone)]
pub struct BatchIter<S> {
    sequences: S,
    batch_size: usize,
    len: usize,
    next: usize,
    n_batches: usize,
}

impl<S> BatchIter<S> {
    /// Total number of batches, `ceil(len / batch_size)`.
    pub fn n_batches(&self) -> usize {
        self.n_batches
    }
}

/// Iterate over `sequences` in lock-step batches of `batch_size`.
///
/// Yields `ceil(L / batch_size)` batches; the last one may be shorter. All
/// sequences must share the same length `L`.
pub fn batch_iterator<S: Sequences>(batch_size: usize, sequences: S) -> AmgResult<BatchIter<S>> {
    if batch_size == 0 {
        return Err(AmgError::InvalidInput("batch size must be positive"));
    }
    let lengths = sequences.lengths();
    let Some(&len) = lengths.first() else {
        return Err(AmgError::InvalidInput("batched iteration needs at least one sequence"));
    };
    if let Some(&got) = lengths.iter().find(|&&l| l != len) {
        return Err(AmgError::LengthMismatch { expected: len, got });
    }

    Ok(BatchIter {
        sequences,
        batch_size,
        len,
        next: 0,
        n_batches: len.div_ceil(batch_size),
    })
}

impl<S: Sequences> Iterator for BatchIter<S> {
    type Item = S::Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.n_batches {
            return None;
        }
        let start = self.next * self.batch_size;
        let end = (start + self.batch_size).min(self.len);
        self.next += 1;
        Some(self.sequences.slice_all(start..end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_batches - self.next;
        (remaining, Some(remaining))
    }
}

impl<S: Sequences> ExactSizeIterator for BatchIter<S> {}

impl<S: Sequences> FusedIterator for BatchIter<S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_batches_cover_input() {
        let data: Vec<u32> = (0..10).collect();
        let batches: Vec<&[u32]> = batch_iterator(3, (data.as_slice(),))
            .unwrap()
            .map(|(b,)| b)
            .collect();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[3], &[9]);
        let joined: Vec<u32> = batches.concat();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_batch() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let iter = batch_iterator(3, (&data,)).unwrap();
        assert_eq!(iter.len(), 2);
        let sizes: Vec<usize> = iter.map(|(b,)| b.len()).collect();
        assert_eq!(sizes, vec![3, 3]);
    }

    #[test]
    fn test_empty_sequences_yield_nothing() {
        let data: Vec<u8> = Vec::new();
        assert_eq!(batch_iterator(4, (&data,)).unwrap().count(), 0);
    }

    #[test]
    fn test_heterogeneous_tuple() {
        let names = vec!["a", "b", "c", "d", "e"];
        let points = Array2::from_shape_fn((5, 2), |(i, j)| (i * 2 + j) as f32);
        let mut iter = batch_iterator(2, (&names, points.view())).unwrap();

        let (n, p) = iter.next().unwrap();
        assert_eq!(n, &["a", "b"]);
        assert_eq!(p.dim(), (2, 2));
        assert_eq!(p[[1, 0]], 2.0);

        let (n, p) = iter.last().unwrap();
        assert_eq!(n, &["e"]);
        assert_eq!(p.row(0).to_vec(), vec![8.0, 9.0]);
    }

    #[test]
    fn test_vec_of_sequences() {
        let a = [1, 2, 3];
        let b = [4, 5, 6];
        let batches: Vec<Vec<&[i32]>> = batch_iterator(2, vec![&a[..], &b[..]])
            .unwrap()
            .collect();
        assert_eq!(batches, vec![vec![&[1, 2][..], &[4, 5][..]], vec![&[3][..], &[6][..]]]);
    }

    #[test]
    fn test_restart_by_clone() {
        let data = vec![0u8; 5];
        let iter = batch_iterator(2, (&data,)).unwrap();
        assert_eq!(iter.clone().count(), 3);
        assert_eq!(iter.count(), 3);
    }

    #[test]
    fn test_length_mismatch() {
        let a = vec![1, 2, 3];
        let b = vec![1.0, 2.0];
        let err = batch_iterator(2, (&a, &b)).unwrap_err();
        assert!(matches!(
            err,
            AmgError::LengthMismatch {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn test_invalid_batch_size_and_no_sequences() {
        let a = vec![1];
        assert!(matches!(
            batch_iterator(0, (&a,)),
            Err(AmgError::InvalidInput(_))
        ));
        let none: Vec<&[u8]> = Vec::new();
        assert!(matches!(
            batch_iterator(1, none),
            Err(AmgError::InvalidInput(_))
        ));
    }
}
