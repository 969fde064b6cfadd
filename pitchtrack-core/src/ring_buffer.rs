//! # Ring Buffer Module
//!
//! Fixed-capacity circular sample store that accumulates incoming audio blocks
//! and hands out the most recent `capacity` samples as one contiguous,
//! chronologically ordered analysis window.

/// Fraction of the capacity that must be written before a window is available
/// on a buffer that has not wrapped yet.
const MIN_FILL_RATIO: f32 = 0.75;

/// Circular buffer of mono samples.
///
/// The write cursor always lies in `[0, capacity)`. The buffer counts as
/// filled once it has wrapped at least once or received a block at least as
/// long as its capacity.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<f32>,
    cursor: usize,
    filled: bool,
}

impl RingBuffer {
    /// Creates an empty buffer holding `capacity` samples.
    ///
    /// # Panics
    /// * If `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0.0; capacity],
            cursor: 0,
            filled: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Appends samples, overwriting the oldest ones once full.
    ///
    /// A block at least as long as the capacity replaces the whole content with
    /// its tail and resets the cursor to the start.
    pub fn push(&mut self, samples: &[f32]) {
        let capacity = self.data.len();
        let n = samples.len();
        if n == 0 {
            return;
        }

        if n >= capacity {
            self.data.copy_from_slice(&samples[n - capacity..]);
            self.cursor = 0;
            self.filled = true;
            return;
        }

        let end = self.cursor + n;
        if end < capacity {
            self.data[self.cursor..end].copy_from_slice(samples);
            self.cursor = end;
        } else {
            let first = capacity - self.cursor;
            self.data[self.cursor..].copy_from_slice(&samples[..first]);
            let rest = n - first;
            self.data[..rest].copy_from_slice(&samples[first..]);
            self.cursor = rest;
            self.filled = true;
        }
    }

    /// True once enough history has been written to analyse.
    pub fn is_ready(&self) -> bool {
        self.filled || self.cursor >= self.min_fill()
    }

    /// Returns the content oldest-to-newest, or `None` while too little history
    /// has been written.
    pub fn window(&self) -> Option<Vec<f32>> {
        let mut out = Vec::with_capacity(self.data.len());
        self.window_into(&mut out).then_some(out)
    }

    /// Like [`window`](Self::window) but reuses `out`, so the audio callback
    /// does not allocate once `out` has grown to capacity.
    ///
    /// Returns `false` and leaves `out` empty when no window is available.
    pub fn window_into(&self, out: &mut Vec<f32>) -> bool {
        out.clear();
        if !self.is_ready() {
            return false;
        }
        out.extend_from_slice(&self.data[self.cursor..]);
        out.extend_from_slice(&self.data[..self.cursor]);
        true
    }

    /// Zeroes the content and forgets all history.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.cursor = 0;
        self.filled = false;
    }

    fn min_fill(&self) -> usize {
        (self.data.len() as f32 * MIN_FILL_RATIO) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn chunked_pushes_reproduce_content_in_order() {
        let content = ramp(64);
        for chunk in [1usize, 3, 7, 16, 30, 63, 64] {
            let mut ring = RingBuffer::new(64);
            for block in content.chunks(chunk) {
                ring.push(block);
            }
            assert!(ring.is_filled(), "chunk size {chunk}");
            assert_eq!(ring.cursor(), 0, "chunk size {chunk}");
            assert_eq!(ring.window().unwrap(), content, "chunk size {chunk}");
        }
    }

    #[test]
    fn no_window_below_three_quarters() {
        let mut ring = RingBuffer::new(100);
        ring.push(&ramp(74));
        assert!(ring.window().is_none());
        assert!(!ring.is_filled());

        ring.push(&[1.0]);
        let window = ring.window().unwrap();
        assert_eq!(window.len(), 100);
        // Unwritten slots are the oldest part of the window.
        assert!(window[..25].iter().all(|&s| s == 0.0));
        assert_eq!(window[25], 0.0);
        assert_eq!(window[26], 1.0);
        assert_eq!(window[99], 1.0);
    }

    #[test]
    fn wrap_keeps_newest_samples_last() {
        let mut ring = RingBuffer::new(8);
        ring.push(&ramp(6));
        ring.push(&[10.0, 11.0, 12.0, 13.0]);
        assert!(ring.is_filled());
        assert_eq!(ring.cursor(), 2);
        assert_eq!(
            ring.window().unwrap(),
            vec![2.0, 3.0, 4.0, 5.0, 10.0, 11.0, 12.0, 13.0]
        );
    }

    #[test]
    fn oversized_block_keeps_tail() {
        let mut ring = RingBuffer::new(4);
        ring.push(&[1.0]);
        ring.push(&ramp(10));
        assert!(ring.is_filled());
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.window().unwrap(), vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn empty_push_is_a_no_op() {
        let mut ring = RingBuffer::new(4);
        ring.push(&[]);
        assert_eq!(ring.cursor(), 0);
        assert!(!ring.is_filled());
    }

    #[test]
    fn reset_forgets_history() {
        let mut ring = RingBuffer::new(4);
        ring.push(&ramp(5));
        ring.reset();
        assert!(!ring.is_filled());
        assert_eq!(ring.cursor(), 0);
        assert!(ring.window().is_none());
    }
}
