//! # Byte Ring Buffer
//!
//! Fixed-capacity byte FIFO used between a blocking transport worker and the
//! dispatch loop. Push onto a full buffer is destructive: the oldest byte is
//! overwritten and the read position advances (drop-oldest). For an inbound
//! telemetry stream fresh bytes are worth more than stale ones, and the
//! protocol parser re-synchronizes at the next frame sentinel.
//!
//! The buffer itself is not synchronized; the owning adapter wraps it in a
//! `parking_lot::Mutex` and holds the lock only while transferring bytes.

/// Fixed-capacity drop-oldest byte FIFO.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    full: bool,
}

impl RingBuffer {
    /// Create a buffer holding up to `capacity` bytes. Zero capacity is a
    /// programming error.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            buf: vec![0; capacity],
            head: 0,
            tail: 0,
            full: false,
        }
    }

    /// Discard all content.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.full = false;
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        if self.full {
            self.buf.len()
        } else if self.head >= self.tail {
            self.head - self.tail
        } else {
            self.buf.len() + self.head - self.tail
        }
    }

    /// Free space remaining.
    pub fn available(&self) -> usize {
        self.buf.len() - self.len()
    }

    /// Append one byte, overwriting the oldest byte when full.
    pub fn push(&mut self, byte: u8) {
        self.buf[self.head] = byte;
        self.head = (self.head + 1) % self.buf.len();
        if self.head == self.tail {
            self.full = true;
        }
        if self.full {
            self.tail = self.head;
        }
    }

    /// Remove and return the oldest byte, or `None` when empty.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % self.buf.len();
        self.full = false;
        Some(byte)
    }

    /// Append a slice, overwriting oldest content on overflow.
    pub fn copy_from(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    /// Drain up to `out.len()` bytes into `out`, returning the count moved.
    pub fn copy_to(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.pop() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Drop-oldest on overflow: capacity 4, push b1..b6, pop 4 yields
    /// {b3, b4, b5, b6}.
    #[test]
    fn overflow_keeps_newest_suffix() {
        let mut rb = RingBuffer::new(4);
        for b in 1..=6u8 {
            rb.push(b);
        }
        assert!(rb.is_full());
        let drained: Vec<u8> = std::iter::from_fn(|| rb.pop()).collect();
        assert_eq!(drained, vec![3, 4, 5, 6]);
        assert!(rb.is_empty());
    }

    /// Without overflow, popped bytes form a prefix of pushed bytes for any
    /// interleaving of push and pop that never exceeds capacity.
    #[test]
    fn fifo_prefix_without_overflow() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let cap = rng.gen_range(1..32);
            let mut rb = RingBuffer::new(cap);
            let mut pushed = Vec::new();
            let mut popped = Vec::new();
            for _ in 0..128 {
                if rb.len() < cap && (rb.is_empty() || rng.gen_bool(0.6)) {
                    let b: u8 = rng.gen();
                    rb.push(b);
                    pushed.push(b);
                } else if let Some(b) = rb.pop() {
                    popped.push(b);
                }
            }
            while let Some(b) = rb.pop() {
                popped.push(b);
            }
            assert_eq!(popped, pushed, "cap {}", cap);
        }
    }

    /// With overflow, the drained content is a contiguous suffix of the
    /// pushed sequence.
    #[test]
    fn overflow_is_contiguous_suffix() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let cap = rng.gen_range(1..16);
            let total = cap + rng.gen_range(1..64);
            let mut rb = RingBuffer::new(cap);
            let pushed: Vec<u8> = (0..total).map(|_| rng.gen()).collect();
            rb.copy_from(&pushed);
            let mut out = vec![0u8; cap];
            let n = rb.copy_to(&mut out);
            assert_eq!(n, cap);
            assert_eq!(&out[..n], &pushed[total - cap..]);
        }
    }

    #[test]
    fn size_and_available_track_content() {
        let mut rb = RingBuffer::new(8);
        assert_eq!(rb.len(), 0);
        assert_eq!(rb.available(), 8);

        rb.copy_from(&[1, 2, 3]);
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.available(), 5);
        assert_eq!(rb.capacity(), 8);

        rb.pop();
        assert_eq!(rb.len(), 2);

        rb.reset();
        assert!(rb.is_empty());
        assert_eq!(rb.available(), 8);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let mut rb = RingBuffer::new(2);
        assert_eq!(rb.pop(), None);
        rb.push(7);
        assert_eq!(rb.pop(), Some(7));
        assert_eq!(rb.pop(), None);
    }
}
