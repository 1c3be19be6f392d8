use crate::errors::StreamError;
use crate::http::find_subslice;
use std::io::{ErrorKind, Read};

pub const DEFAULT_CAPACITY: usize = 8192;

/// Fixed-capacity receive buffer over a byte source.
///
/// Invariant: `consumed <= filled <= capacity`. Bytes in `consumed..filled`
/// are the unconsumed region; everything before `consumed` is garbage that
/// the next [`fill`](Self::fill) compacts away.
pub struct RollingBuffer<R> {
    source: R,
    data: Box<[u8]>,
    consumed: usize,
    filled: usize,
}

impl<R: Read> RollingBuffer<R> {
    pub fn new(source: R, capacity: usize) -> Self {
        Self::with_initial(source, capacity, &[])
    }

    /// Start with bytes that were already received, e.g. the body bytes that
    /// arrived together with the response head. Capacity grows to hold them.
    pub fn with_initial(source: R, capacity: usize, initial: &[u8]) -> Self {
        let capacity = capacity.max(initial.len()).max(1);
        let mut data = vec![0u8; capacity].into_boxed_slice();
        data[..initial.len()].copy_from_slice(initial);

        Self {
            source,
            data,
            consumed: 0,
            filled: initial.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn consumed_offset(&self) -> usize {
        self.consumed
    }

    pub fn filled_len(&self) -> usize {
        self.filled
    }

    /// Number of unconsumed bytes.
    pub fn available(&self) -> usize {
        self.filled - self.consumed
    }

    pub fn unconsumed(&self) -> &[u8] {
        &self.data[self.consumed..self.filled]
    }

    /// Move the unconsumed bytes to the front, then issue exactly one read
    /// into the free space.
    ///
    /// Fails with `StreamClosed` when the source reports EOF or an error, and
    /// with `BufferFull` when the unconsumed region already spans the whole
    /// capacity.
    pub fn fill(&mut self) -> Result<usize, StreamError> {
        self.compact();

        if self.filled == self.data.len() {
            return Err(StreamError::BufferFull(self.data.len()));
        }

        loop {
            match self.source.read(&mut self.data[self.filled..]) {
                Ok(0) => return Err(StreamError::StreamClosed),
                Ok(n) => {
                    self.filled += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "Receive failed, treating stream as closed");
                    return Err(StreamError::StreamClosed);
                }
            }
        }
    }

    /// Offset of `needle` relative to the consumed offset, searching only the
    /// unconsumed region.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        find_subslice(self.unconsumed(), needle)
    }

    /// Advance past `n` bytes. Asking for more than is buffered leaves the
    /// buffer untouched and reports `BufferOverrun`.
    pub fn consume(&mut self, n: usize) -> Result<(), StreamError> {
        let available = self.available();
        if n > available {
            return Err(StreamError::BufferOverrun {
                requested: n,
                available,
            });
        }
        self.consumed += n;
        Ok(())
    }

    /// Copy up to `max` unconsumed bytes onto `out` and consume them.
    pub fn take_into(&mut self, max: usize, out: &mut Vec<u8>) -> usize {
        let n = max.min(self.available());
        out.extend_from_slice(&self.data[self.consumed..self.consumed + n]);
        self.consumed += n;
        n
    }

    fn compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.data.copy_within(self.consumed..self.filled, 0);
        self.filled -= self.consumed;
        self.consumed = 0;
    }
}
