//! Fixed-capacity slab pool and the pooled append-only buffer.
//!
//! The pool preallocates equally sized chunks into a lock-free bounded queue.
//! Acquisition never blocks (an empty pool is reported, not waited on) and
//! release never blocks (chunks beyond capacity are dropped). Buffers draw
//! chunks as they grow and report partial writes when the pool runs dry,
//! which the HTTP parser treats as body truncation.

use crate::memory::view::{Slab, View};

use std::io::{self, Read};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use thiserror::Error;

/// Errors raised when constructing a [`BufferPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid chunk size: {0} bytes")]
    InvalidChunkSize(usize),

    #[error("invalid pool size: {pool_size} bytes with {chunk_size}-byte chunks")]
    InvalidPoolSize { pool_size: usize, chunk_size: usize },
}

/// Errors raised by [`Buffer`] writes. Both variants carry the number of
/// bytes successfully transferred before the failure.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer pool exhausted after {0} bytes")]
    PoolExhausted(usize),

    #[error("source failed after {copied} bytes: {source}")]
    Source {
        copied: usize,
        #[source]
        source: io::Error,
    },
}

/// A factory of variable-sized buffers whose backing storage comes from a
/// fixed-size pool of chunks. Cloning yields a handle to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// All currently available chunks.
    chunks: ArrayQueue<Vec<u8>>,
    /// Size of each chunk in bytes.
    chunk_size: usize,
}

impl BufferPool {
    /// Creates a pool holding `max_pool_size / chunk_size` chunks of
    /// `chunk_size` bytes each.
    pub fn new(max_pool_size: usize, chunk_size: usize) -> Result<BufferPool, PoolError> {
        if chunk_size < 1 {
            return Err(PoolError::InvalidChunkSize(chunk_size));
        }
        if max_pool_size < chunk_size {
            return Err(PoolError::InvalidPoolSize {
                pool_size: max_pool_size,
                chunk_size,
            });
        }

        let num_chunks = max_pool_size / chunk_size;
        let chunks = ArrayQueue::new(num_chunks);
        for _ in 0..num_chunks {
            // The queue was sized for exactly this many chunks.
            let _ = chunks.push(vec![0u8; chunk_size]);
        }
        Ok(BufferPool {
            inner: Arc::new(PoolInner { chunks, chunk_size }),
        })
    }

    /// Returns a new empty buffer backed by this pool.
    pub fn new_buffer(&self) -> Buffer {
        Buffer {
            pool: self.clone(),
            chunks: Vec::new(),
            read_offset: 0,
            length: 0,
        }
    }

    /// Size of each chunk in bytes.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// Number of chunks currently available.
    pub fn available(&self) -> usize {
        self.inner.chunks.len()
    }

    /// Obtains a zeroed chunk, or `None` when the pool is empty.
    fn get_chunk(&self) -> Option<Vec<u8>> {
        let mut chunk = self.inner.chunks.pop()?;
        chunk.fill(0);
        Some(chunk)
    }

    /// Returns a chunk to the pool, dropping it if the pool is already at
    /// capacity.
    fn release(&self, chunk: Vec<u8>) {
        let _ = self.inner.chunks.push(chunk);
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("chunk_size", &self.inner.chunk_size)
            .field("available", &self.inner.chunks.len())
            .finish()
    }
}

/// One chunk owned by a buffer: the slab plus how many bytes of it have been
/// written. The slab stays uniquely owned (and hence writable) until
/// [`Buffer::bytes`] shares it with a view.
struct Chunk {
    slab: Slab,
    filled: usize,
}

/// A variable-sized append-only buffer whose storage is drawn from a
/// [`BufferPool`].
///
/// Contents start at `chunks[0][read_offset]` and end at the last chunk's
/// fill mark; every chunk in between is fully used. Storage returns to the
/// pool on [`Buffer::release`] or drop.
pub struct Buffer {
    pool: BufferPool,
    chunks: Vec<Chunk>,
    /// Where reading starts in the first chunk.
    read_offset: usize,
    /// Unread length in bytes.
    length: usize,
}

impl Buffer {
    /// Number of bytes of the unread portion of the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns a view aliasing the buffer's live bytes. The view shares the
    /// buffer's slabs; a chunk referenced by a live view is no longer
    /// writable, so writes issued after this call go to fresh chunks.
    pub fn bytes(&self) -> View {
        let mut view = View::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            let start = if i == 0 { self.read_offset } else { 0 };
            if chunk.filled > start {
                view.push_segment(chunk.slab.clone(), start, chunk.filled);
            }
        }
        view
    }

    /// Appends the contents of `p`, drawing additional chunks from the pool
    /// as needed. When the pool runs dry mid-write, as many bytes as possible
    /// are written and [`BufferError::PoolExhausted`] reports the count.
    pub fn write(&mut self, p: &[u8]) -> Result<usize, BufferError> {
        let chunk_size = self.pool.chunk_size();
        let mut written = 0;
        while written < p.len() {
            if !self.has_writable_tail() {
                match self.pool.get_chunk() {
                    Some(chunk) => self.chunks.push(Chunk {
                        slab: Arc::new(chunk),
                        filled: 0,
                    }),
                    None => {
                        self.rep_ok();
                        return Err(BufferError::PoolExhausted(written));
                    }
                }
            }
            let chunk = self.chunks.last_mut().expect("writable tail chunk");
            let data = Arc::get_mut(&mut chunk.slab).expect("unshared tail chunk");
            let n = (chunk_size - chunk.filled).min(p.len() - written);
            data[chunk.filled..chunk.filled + n].copy_from_slice(&p[written..written + n]);
            chunk.filled += n;
            written += n;
            self.length += n;
        }
        self.rep_ok();
        Ok(written)
    }

    /// Copies from `r` until EOF or an error, drawing chunks from the pool as
    /// needed. Returns the number of bytes copied; pool exhaustion and read
    /// errors carry the partial count.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> Result<usize, BufferError> {
        let chunk_size = self.pool.chunk_size();
        let mut copied = 0;
        loop {
            if !self.has_writable_tail() {
                match self.pool.get_chunk() {
                    Some(chunk) => self.chunks.push(Chunk {
                        slab: Arc::new(chunk),
                        filled: 0,
                    }),
                    None => {
                        self.rep_ok();
                        return Err(BufferError::PoolExhausted(copied));
                    }
                }
            }
            let chunk = self.chunks.last_mut().expect("writable tail chunk");
            let data = Arc::get_mut(&mut chunk.slab).expect("unshared tail chunk");
            match r.read(&mut data[chunk.filled..chunk_size]) {
                Ok(0) => {
                    self.trim_empty_tail();
                    self.rep_ok();
                    return Ok(copied);
                }
                Ok(n) => {
                    chunk.filled += n;
                    copied += n;
                    self.length += n;
                }
                Err(source) => {
                    self.trim_empty_tail();
                    self.rep_ok();
                    return Err(BufferError::Source { copied, source });
                }
            }
        }
    }

    /// Empties the buffer and returns its storage to the pool. Chunks still
    /// referenced by a live view are replaced in the pool by fresh chunks so
    /// the pool's capacity never decays. Releasing twice is a no-op.
    pub fn release(&mut self) {
        let chunk_size = self.pool.chunk_size();
        for chunk in self.chunks.drain(..) {
            match Arc::try_unwrap(chunk.slab) {
                Ok(data) => self.pool.release(data),
                Err(_) => self.pool.release(vec![0u8; chunk_size]),
            }
        }
        self.read_offset = 0;
        self.length = 0;
    }

    /// True when the last chunk has free space and is not shared with a view.
    fn has_writable_tail(&mut self) -> bool {
        let chunk_size = self.pool.chunk_size();
        match self.chunks.last_mut() {
            Some(chunk) if chunk.filled < chunk_size => Arc::get_mut(&mut chunk.slab).is_some(),
            _ => false,
        }
    }

    /// Returns a completely unused trailing chunk to the pool.
    fn trim_empty_tail(&mut self) {
        if let Some(chunk) = self.chunks.last() {
            if chunk.filled == 0 {
                let chunk = self.chunks.pop().expect("non-empty chunk list");
                if let Ok(data) = Arc::try_unwrap(chunk.slab) {
                    self.pool.release(data);
                }
            }
        }
    }

    /// Checks representation invariants. Compiled out of release builds.
    fn rep_ok(&self) {
        if cfg!(debug_assertions) {
            let chunk_size = self.pool.chunk_size();
            let mut total = 0;
            for chunk in &self.chunks {
                assert_eq!(chunk.slab.len(), chunk_size);
                assert!(chunk.filled <= chunk_size);
                total += chunk.filled;
            }
            if self.chunks.is_empty() {
                assert_eq!(self.read_offset, 0);
            } else {
                assert!(self.read_offset < chunk_size);
                assert!(self.chunks.last().expect("non-empty").filled > 0);
            }
            assert_eq!(self.length, total - self.read_offset);
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.length)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_geometry_validation() {
        assert!(matches!(
            BufferPool::new(16, 0),
            Err(PoolError::InvalidChunkSize(0))
        ));
        assert!(matches!(
            BufferPool::new(4, 8),
            Err(PoolError::InvalidPoolSize { .. })
        ));
        let pool = BufferPool::new(33, 8).unwrap();
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.chunk_size(), 8);
    }

    #[test]
    fn write_and_bytes_round() {
        let pool = BufferPool::new(64, 8).unwrap();
        let mut buf = pool.new_buffer();
        assert_eq!(buf.write(b"hello ").unwrap(), 6);
        assert_eq!(buf.write(b"buffered world").unwrap(), 14);
        assert_eq!(buf.len(), 20);
        assert_eq!(buf.bytes().to_vec(), b"hello buffered world");
    }

    #[test]
    fn write_spans_chunks_exactly() {
        let pool = BufferPool::new(32, 4).unwrap();
        let mut buf = pool.new_buffer();
        buf.write(b"12345678").unwrap();
        assert_eq!(pool.available(), 6);
        buf.write(b"9").unwrap();
        assert_eq!(pool.available(), 5);
        assert_eq!(buf.bytes().to_vec(), b"123456789");
    }

    #[test]
    fn exhaustion_reports_partial_write() {
        let pool = BufferPool::new(8, 4).unwrap();
        let mut buf = pool.new_buffer();
        let err = buf.write(b"0123456789ab").unwrap_err();
        match err {
            BufferError::PoolExhausted(written) => assert_eq!(written, 8),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.bytes().to_vec(), b"01234567");
    }

    #[test]
    fn interleaved_buffers_see_their_own_writes() {
        let pool = BufferPool::new(64, 8).unwrap();
        let mut a = pool.new_buffer();
        let mut b = pool.new_buffer();
        a.write(b"aaaa").unwrap();
        b.write(b"bb").unwrap();
        a.write(b"AAAA").unwrap();
        b.write(b"BBBBBBBBBB").unwrap();
        assert_eq!(a.bytes().to_vec(), b"aaaaAAAA");
        assert_eq!(b.bytes().to_vec(), b"bbBBBBBBBBBB");
    }

    #[test]
    fn release_returns_chunks() {
        let pool = BufferPool::new(32, 8).unwrap();
        let mut buf = pool.new_buffer();
        buf.write(b"0123456789").unwrap();
        assert_eq!(pool.available(), 2);
        buf.release();
        assert_eq!(pool.available(), 4);
        assert_eq!(buf.len(), 0);
        // A second release is a no-op.
        buf.release();
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn drop_releases_chunks() {
        let pool = BufferPool::new(32, 8).unwrap();
        {
            let mut buf = pool.new_buffer();
            buf.write(b"0123456789").unwrap();
            assert_eq!(pool.available(), 2);
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn release_with_live_view_replaces_chunks() {
        let pool = BufferPool::new(32, 8).unwrap();
        let mut buf = pool.new_buffer();
        buf.write(b"shared").unwrap();
        let view = buf.bytes();
        buf.release();
        // The aliased chunk was replaced, not reclaimed, so capacity holds.
        assert_eq!(pool.available(), 4);
        assert_eq!(view.to_vec(), b"shared");
    }

    #[test]
    fn write_after_bytes_leaves_view_intact() {
        let pool = BufferPool::new(64, 8).unwrap();
        let mut buf = pool.new_buffer();
        buf.write(b"first").unwrap();
        let view = buf.bytes();
        buf.write(b"second").unwrap();
        assert_eq!(view.to_vec(), b"first");
        assert_eq!(buf.bytes().to_vec(), b"firstsecond");
    }

    #[test]
    fn read_from_copies_until_eof() {
        let pool = BufferPool::new(64, 8).unwrap();
        let mut buf = pool.new_buffer();
        let mut src = &b"stream of bytes"[..];
        assert_eq!(buf.read_from(&mut src).unwrap(), 15);
        assert_eq!(buf.bytes().to_vec(), b"stream of bytes");
        // No trailing unused chunk is kept.
        assert_eq!(pool.available(), 6);
    }

    #[test]
    fn read_from_exhaustion() {
        let pool = BufferPool::new(8, 4).unwrap();
        let mut buf = pool.new_buffer();
        let mut src = &b"exhausts the pool"[..];
        let err = buf.read_from(&mut src).unwrap_err();
        match err {
            BufferError::PoolExhausted(copied) => assert_eq!(copied, 8),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(buf.bytes().to_vec(), b"exhausts");
    }

    #[test]
    fn zeroed_chunks_on_reuse() {
        let pool = BufferPool::new(8, 8).unwrap();
        let mut buf = pool.new_buffer();
        buf.write(b"dirtydat").unwrap();
        buf.release();
        let mut buf = pool.new_buffer();
        buf.write(b"x").unwrap();
        assert_eq!(buf.bytes().to_vec(), b"x");
        let chunk = pool.get_chunk();
        assert!(chunk.is_none(), "single-chunk pool is in use");
    }
}
