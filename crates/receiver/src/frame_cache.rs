//! Double-buffered hand-off of the latest decoded frame.
//!
//! One producer publishes into the back slot while any number of consumers
//! read the front slot. Pixel data is immutable once published; the mutex
//! only guards the slot index, the borrow flag and the sequence counter, so
//! consumers never wait on a decode.

use crate::frame::DecodedFrame;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The new frame is now the front slot.
    Swapped,
    /// The front slot is borrowed; the frame waits in the back slot and is
    /// replaced by the next publish.
    SwapSkipped,
}

#[derive(Default)]
struct CacheState {
    slots: [Option<Arc<DecodedFrame>>; 2],
    front: usize,
    borrowed: bool,
    /// Number of frames made visible through a swap.
    sequence: u64,
    target: Option<(u32, u32)>,
    closed: bool,
}

impl CacheState {
    fn front_frame(&self) -> Option<Arc<DecodedFrame>> {
        self.slots[self.front].clone()
    }
}

#[derive(Default)]
pub struct FrameCache {
    state: Mutex<CacheState>,
    changed: Condvar,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `frame` in the back slot and make it visible unless the front
    /// slot is borrowed.
    pub fn publish(&self, frame: DecodedFrame) -> PublishOutcome {
        let frame = Arc::new(frame);

        let (outcome, replaced) = {
            let mut state = self.state();
            let back = 1 - state.front;
            let replaced = state.slots[back].replace(frame);

            if state.borrowed {
                (PublishOutcome::SwapSkipped, replaced)
            } else {
                state.front = back;
                state.sequence += 1;
                self.changed.notify_all();
                (PublishOutcome::Swapped, replaced)
            }
        };

        // The displaced frame is freed outside the lock.
        drop(replaced);
        outcome
    }

    /// Copy of the front frame, or `None` before the first publish.
    ///
    /// The lock is held only long enough to clone a reference; the pixel copy
    /// happens after it is released.
    pub fn copy_latest(&self) -> Option<DecodedFrame> {
        let front = self.state().front_frame();
        front.map(|frame| DecodedFrame::clone(&frame))
    }

    /// Zero-copy access to the front frame.
    ///
    /// While the returned guard lives, publishes keep the front slot in place.
    /// Only one borrow may be outstanding at a time.
    ///
    /// # Panics
    /// If another [`BorrowedFrame`] from this cache is still alive.
    pub fn borrow_latest(&self) -> Option<BorrowedFrame<'_>> {
        let mut state = self.state();
        assert!(
            !state.borrowed,
            "FrameCache supports a single zero-copy borrower; release the previous BorrowedFrame first"
        );

        let frame = state.front_frame()?;
        state.borrowed = true;
        Some(BorrowedFrame { cache: self, frame })
    }

    fn release(&self) {
        let mut state = self.state();
        state.borrowed = false;
        self.changed.notify_all();
    }

    /// Number of frames that have become visible so far.
    pub fn sequence(&self) -> u64 {
        self.state().sequence
    }

    /// Block until a frame newer than `after_sequence` is visible, the cache
    /// is closed, or `timeout` expires.
    pub fn wait_for_frame(&self, after_sequence: u64, timeout: Duration) -> Option<DecodedFrame> {
        let state = self.state();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.sequence <= after_sequence && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if state.sequence <= after_sequence {
            return None;
        }
        let front = state.front_frame();
        drop(state);
        front.map(|frame| DecodedFrame::clone(&frame))
    }

    /// Target size frames should be published at; `(0, _)` or `(_, 0)` disables resizing.
    pub fn set_target_resolution(&self, width: u32, height: u32) {
        self.state().target = (width > 0 && height > 0).then_some((width, height));
    }

    pub fn target_resolution(&self) -> Option<(u32, u32)> {
        self.state().target
    }

    /// Wake every waiter; subsequent waits return immediately.
    pub fn close(&self) {
        self.state().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

/// Borrow of the front frame; dropping it releases the slot.
pub struct BorrowedFrame<'a> {
    cache: &'a FrameCache,
    frame: Arc<DecodedFrame>,
}

impl BorrowedFrame<'_> {
    /// Explicit release, same as dropping the guard.
    pub fn release(self) {}
}

impl Deref for BorrowedFrame<'_> {
    type Target = DecodedFrame;

    fn deref(&self) -> &DecodedFrame {
        &self.frame
    }
}

impl Drop for BorrowedFrame<'_> {
    fn drop(&mut self) {
        self.cache.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn frame(fill: u8, timestamp_ms: u64) -> DecodedFrame {
        DecodedFrame {
            pixels: vec![fill; 4 * 4 * 4],
            width: 4,
            height: 4,
            timestamp_ms,
        }
    }

    #[test]
    fn test_empty_cache() {
        let cache = FrameCache::new();
        assert!(cache.copy_latest().is_none());
        assert!(cache.borrow_latest().is_none());
        assert_eq!(cache.sequence(), 0);
    }

    #[test]
    fn test_publish_then_copy_returns_frame() {
        let cache = FrameCache::new();
        assert_eq!(cache.publish(frame(7, 10)), PublishOutcome::Swapped);
        assert_eq!(cache.copy_latest(), Some(frame(7, 10)));

        assert_eq!(cache.publish(frame(8, 20)), PublishOutcome::Swapped);
        assert_eq!(cache.copy_latest(), Some(frame(8, 20)));
        assert_eq!(cache.sequence(), 2);
    }

    #[test]
    fn test_copy_is_independent_of_cache() {
        let cache = FrameCache::new();
        cache.publish(frame(1, 1));

        let mut copy = cache.copy_latest().unwrap();
        copy.pixels.fill(99);
        assert_eq!(cache.copy_latest(), Some(frame(1, 1)));
    }

    #[test]
    fn test_borrowed_slot_is_not_overwritten() {
        let cache = FrameCache::new();
        cache.publish(frame(1, 1));

        let borrowed = cache.borrow_latest().unwrap();
        let ptr = borrowed.pixels.as_ptr();

        assert_eq!(cache.publish(frame(2, 2)), PublishOutcome::SwapSkipped);
        assert_eq!(cache.publish(frame(3, 3)), PublishOutcome::SwapSkipped);

        assert_eq!(borrowed.pixels.as_ptr(), ptr);
        assert!(borrowed.pixels.iter().all(|&b| b == 1));
        assert_eq!(cache.copy_latest(), Some(frame(1, 1)));
        assert_eq!(cache.sequence(), 1);

        borrowed.release();

        assert_eq!(cache.publish(frame(4, 4)), PublishOutcome::Swapped);
        assert_eq!(cache.copy_latest(), Some(frame(4, 4)));
    }

    #[test]
    #[should_panic(expected = "single zero-copy borrower")]
    fn test_second_borrow_panics() {
        let cache = FrameCache::new();
        cache.publish(frame(1, 1));

        let _first = cache.borrow_latest();
        let _second = cache.borrow_latest();
    }

    #[test]
    fn test_borrow_again_after_drop() {
        let cache = FrameCache::new();
        cache.publish(frame(1, 1));

        drop(cache.borrow_latest());
        assert_eq!(cache.borrow_latest().map(|f| f.timestamp_ms), Some(1));
    }

    #[test]
    fn test_target_resolution_toggle() {
        let cache = FrameCache::new();
        assert_eq!(cache.target_resolution(), None);

        cache.set_target_resolution(320, 240);
        assert_eq!(cache.target_resolution(), Some((320, 240)));

        cache.set_target_resolution(0, 240);
        assert_eq!(cache.target_resolution(), None);
    }

    #[test]
    fn test_wait_for_frame_wakes_on_publish() {
        let cache = Arc::new(FrameCache::new());
        let producer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cache.publish(frame(5, 5));
            })
        };

        let got = cache.wait_for_frame(0, Duration::from_secs(5));
        producer.join().unwrap();
        assert_eq!(got, Some(frame(5, 5)));
    }

    #[test]
    fn test_wait_for_frame_times_out_and_close_wakes() {
        let cache = Arc::new(FrameCache::new());
        assert_eq!(cache.wait_for_frame(0, Duration::from_millis(20)), None);

        let closer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cache.close();
            })
        };

        let started = Instant::now();
        assert_eq!(cache.wait_for_frame(0, Duration::from_secs(30)), None);
        assert!(started.elapsed() < Duration::from_secs(10));
        closer.join().unwrap();
        assert!(cache.is_closed());
    }

    #[test]
    fn test_concurrent_readers_see_whole_frames() {
        let cache = Arc::new(FrameCache::new());
        cache.publish(frame(0, 0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let f = cache.copy_latest().unwrap();
                        let first = f.pixels[0];
                        assert!(f.pixels.iter().all(|&b| b == first), "torn frame");
                        assert_eq!(f.timestamp_ms, first as u64);
                    }
                })
            })
            .collect();

        for i in 1..=200u8 {
            cache.publish(frame(i, i as u64));
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
