//! The streaming iterator contract (§4.3).
//!
//! Iterators are deliberately not modelled as a native lazy sequence: they
//! must be addressable by an opaque id across many separate guest→host
//! calls, and they must support deterministic, idempotent resource release.
//! A native `Stream`/`Iterator` impl can't be named across an FFI boundary
//! the way an id in a map can.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;

/// One chunk produced by a streaming capability method.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub has_more: bool,
}

impl Chunk {
    pub fn more(data: Vec<u8>) -> Self {
        Self { data, has_more: true }
    }

    pub fn last(data: Vec<u8>) -> Self {
        Self { data, has_more: false }
    }
}

/// An opaque, identified, lazy producer of chunks, owned by exactly one
/// capability set at a time.
#[async_trait]
pub trait Iterator: Send + Sync {
    /// Produce the next chunk. Once a call returns `has_more: false`, the
    /// iterator is logically drained; the capability set guarantees it will
    /// not call `next` again (it closes and removes the record instead).
    async fn next(&mut self, ctx: &CallContext) -> Result<Chunk>;

    /// Release any backing resource. Must be idempotent: the capability set
    /// may call this from end-of-stream, explicit guest close, the
    /// staleness sweep, or set shutdown, and must tolerate being called more
    /// than once without it being a logic error. A failure here does not
    /// undo the iterator's removal from the set's table — it is reported,
    /// not retried (§7).
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCloseIterator {
        remaining: Vec<u8>,
        close_calls: std::sync::Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Iterator for CountingCloseIterator {
        async fn next(&mut self, _ctx: &CallContext) -> Result<Chunk> {
            Ok(Chunk::last(std::mem::take(&mut self.remaining)))
        }

        async fn close(&mut self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_when_called_twice() {
        let close_calls = std::sync::Arc::new(AtomicUsize::new(0));
        let mut it = CountingCloseIterator {
            remaining: vec![1, 2, 3],
            close_calls: close_calls.clone(),
        };
        it.close().await.unwrap();
        it.close().await.unwrap();
        assert_eq!(close_calls.load(Ordering::SeqCst), 2);
    }
}
