// Growable byte window for the JSON decoder; grows geometrically up to a cap and never shrinks.

pub struct JsonWindow {
    buf: Vec<u8>,
    filled: usize,
    cap: usize,
}

impl JsonWindow {
    pub fn new(initial: usize, cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            buf: vec![0; initial.clamp(1, cap)],
            filled: 0,
            cap,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Drop everything before `keep_from`; returns how far the rest moved.
    pub fn compact(&mut self, keep_from: usize) -> usize {
        let keep_from = keep_from.min(self.filled);
        if keep_from > 0 {
            self.buf.copy_within(keep_from..self.filled, 0);
            self.filled -= keep_from;
        }
        keep_from
    }

    /// Ensure there is room for another read, doubling once more than three
    /// quarters are in use. Returns false when the window is full at its cap.
    pub fn reserve(&mut self) -> bool {
        let len = self.buf.len();
        let free = len - self.filled;
        if free * 4 < len && len < self.cap {
            let next = len.saturating_mul(2).min(self.cap);
            tracing::debug!(from = len, to = next, "growing json window");
            self.buf.resize(next, 0);
        }
        self.buf.len() > self.filled
    }

    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    pub fn commit(&mut self, read: usize) {
        self.filled = (self.filled + read).min(self.buf.len());
    }
}

#[cfg(test)]
mod tests {
    use super::JsonWindow;

    fn fill(window: &mut JsonWindow, bytes: &[u8]) {
        let spare = window.spare();
        let n = bytes.len().min(spare.len());
        spare[..n].copy_from_slice(&bytes[..n]);
        window.commit(n);
    }

    #[test]
    fn compact_moves_tail_to_front() {
        let mut window = JsonWindow::new(8, 64);
        fill(&mut window, b"abcdef");
        assert_eq!(window.compact(4), 4);
        assert_eq!(window.data(), b"ef");
    }

    #[test]
    fn grows_when_nearly_full_and_stops_at_cap() {
        let mut window = JsonWindow::new(4, 10);
        fill(&mut window, b"abcd");
        assert!(window.reserve());
        assert_eq!(window.capacity(), 8);
        fill(&mut window, b"efgh");
        assert!(window.reserve());
        assert_eq!(window.capacity(), 10);
        fill(&mut window, b"ij");
        assert!(!window.reserve());
        assert_eq!(window.data(), b"abcdefghij");
    }

    #[test]
    fn keeps_size_when_mostly_free() {
        let mut window = JsonWindow::new(16, 64);
        fill(&mut window, b"ab");
        assert!(window.reserve());
        assert_eq!(window.capacity(), 16);
    }
}
