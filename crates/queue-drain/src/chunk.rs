//! Fixed-size batch chunking.

use crate::error::QueueError;

/// Split `items` into contiguous chunks of at most `size` items.
///
/// Order is preserved and every item appears in exactly one chunk; only the
/// last chunk may be shorter than `size`. Empty input yields no chunks. A
/// `size` of zero is rejected with [`QueueError::InvalidArgument`].
pub fn chunk<T>(items: &[T], size: usize) -> Result<Vec<&[T]>, QueueError> {
    if size == 0 {
        return Err(QueueError::invalid_argument(
            "chunk_size",
            "must be greater than zero",
        ));
    }

    Ok(items.chunks(size).collect())
}

#[cfg(test)]
#[path = "chunk_tests.rs"]
mod tests;
