//! Contiguous batching of items selected for correction.

use crate::error::ConfigError;

/// Split `items` into contiguous, non-overlapping slices of `size` items;
/// only the last slice may be shorter.
///
/// Concatenating the returned slices in order reproduces `items` exactly.
/// A `size` of zero is a configuration error.
pub fn partition<T>(items: &[T], size: usize) -> Result<Vec<&[T]>, ConfigError> {
    if size == 0 {
        return Err(ConfigError::InvalidBatchSize(size));
    }
    Ok(items.chunks(size).collect())
}

/// Number of batches [`partition`] yields for `len` items.
pub fn batch_count(len: usize, size: usize) -> usize {
    if size == 0 {
        0
    } else {
        len.div_ceil(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_rejected() {
        let items = [1, 2, 3];
        assert_eq!(
            partition(&items, 0).unwrap_err(),
            ConfigError::InvalidBatchSize(0)
        );
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let items: [u8; 0] = [];
        assert!(partition(&items, 4).unwrap().is_empty());
    }

    #[test]
    fn last_batch_may_be_short() {
        let items: Vec<usize> = (0..7).collect();
        let batches = partition(&items, 3).unwrap();
        assert_eq!(batches, vec![&[0, 1, 2][..], &[3, 4, 5][..], &[6][..]]);
    }

    #[test]
    fn concatenation_reproduces_input() {
        for len in 0..40usize {
            let items: Vec<usize> = (0..len).map(|i| i * 7).collect();
            for size in 1..12 {
                let batches = partition(&items, size).unwrap();
                assert_eq!(batches.len(), batch_count(len, size));
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
                let joined: Vec<usize> = batches.concat();
                assert_eq!(joined, items, "len={} size={}", len, size);
            }
        }
    }
}
