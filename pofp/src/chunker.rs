//! C5: takes up to `K` items at a time from an upstream blocking
//! channel and emits non-empty batches (spec.md §4.5).

use crossbeam_channel::Receiver;

pub struct BoundedChunker<T> {
    upstream: Receiver<T>,
    chunk_size: usize,
}

impl<T> BoundedChunker<T> {
    pub fn new(upstream: Receiver<T>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        Self { upstream, chunk_size }
    }

    /// Block on the first item until one arrives or the upstream
    /// closes, then drain up to `chunk_size - 1` more without blocking.
    /// Returns `None` only once the upstream is closed and drained.
    /// Arrival order is preserved within a batch.
    pub fn try_take(&self) -> Option<Vec<T>> {
        let first = match self.upstream.recv() {
            Ok(item) => item,
            Err(_) => return None,
        };

        let mut batch = Vec::with_capacity(self.chunk_size);
        batch.push(first);
        while batch.len() < self.chunk_size {
            match self.upstream.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn batches_up_to_k_and_preserves_order() {
        let (tx, rx) = unbounded();
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        let chunker = BoundedChunker::new(rx, 3);
        assert_eq!(chunker.try_take(), Some(vec![0, 1, 2]));
        assert_eq!(chunker.try_take(), Some(vec![3, 4]));
    }

    #[test]
    fn returns_none_once_upstream_closes_and_drains() {
        let (tx, rx) = unbounded::<i32>();
        tx.send(1).unwrap();
        drop(tx);
        let chunker = BoundedChunker::new(rx, 4);
        assert_eq!(chunker.try_take(), Some(vec![1]));
        assert_eq!(chunker.try_take(), None);
    }

    #[test]
    fn batches_are_never_empty() {
        let (tx, rx) = unbounded::<i32>();
        drop(tx);
        let chunker = BoundedChunker::new(rx, 4);
        assert_eq!(chunker.try_take(), None);
    }
}
