use std::collections::VecDeque;

/// FIFO byte container backing a socket's inbound and outbound buffers.
///
/// Supports non-destructive peeking (also at an offset) and push-back of
/// bytes that were read but not consumed.
#[derive(Debug, Default, Clone)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends `data` at the tail.
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend(data);
    }

    /// Moves up to `dest.len()` bytes from the head into `dest`.
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        let n = self.peek(dest);
        self.buf.drain(..n);
        n
    }

    /// Copies up to `dest.len()` bytes from the head without consuming them.
    pub fn peek(&self, dest: &mut [u8]) -> usize {
        self.peek_at(0, dest)
    }

    /// Copies up to `dest.len()` bytes starting `offset` bytes past the head.
    pub fn peek_at(&self, offset: usize, dest: &mut [u8]) -> usize {
        if offset >= self.buf.len() {
            return 0;
        }
        let n = dest.len().min(self.buf.len() - offset);
        for (slot, byte) in dest[..n].iter_mut().zip(self.buf.range(offset..offset + n)) {
            *slot = *byte;
        }
        n
    }

    /// Pushes `data` back in front of the head, so the next read returns it first.
    pub fn unread(&mut self, data: &[u8]) {
        self.buf.reserve(data.len());
        for &byte in data.iter().rev() {
            self.buf.push_front(byte);
        }
    }

    /// Drops up to `n` bytes from the head, returning how many were dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        n
    }

    /// Returns the contiguous run of bytes at the head.
    pub fn head(&self) -> &[u8] {
        self.buf.as_slices().0
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_is_non_destructive() {
        let mut queue = ByteQueue::new();
        queue.write(b"hello world");
        let mut peeked = [0u8; 5];
        assert_eq!(queue.peek(&mut peeked), 5);
        let mut read = [0u8; 5];
        assert_eq!(queue.read(&mut read), 5);
        assert_eq!(peeked, read);
        assert_eq!(&read, b"hello");
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn peek_at_offset() {
        let mut queue = ByteQueue::new();
        queue.write(b"abcdef");
        let mut out = [0u8; 8];
        assert_eq!(queue.peek_at(2, &mut out), 4);
        assert_eq!(&out[..4], b"cdef");
        assert_eq!(queue.peek_at(6, &mut out), 0);
    }

    #[test]
    fn unread_goes_to_the_front_and_stacks() {
        let mut queue = ByteQueue::new();
        queue.write(b"tail");
        queue.unread(b"xy");
        queue.unread(b"xy");
        let mut out = [0u8; 8];
        let n = queue.read(&mut out);
        assert_eq!(&out[..n], b"xyxytail");
    }

    #[test]
    fn discard_and_clear() {
        let mut queue = ByteQueue::new();
        queue.write(b"0123456789");
        assert_eq!(queue.discard(4), 4);
        assert_eq!(queue.head().first(), Some(&b'4'));
        assert_eq!(queue.discard(100), 6);
        assert!(queue.is_empty());
        queue.write(b"more");
        queue.clear();
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn head_spans_after_wraparound() {
        let mut queue = ByteQueue::new();
        queue.write(&[1; 16]);
        queue.discard(12);
        queue.write(&[2; 16]);
        let mut total = 0;
        while !queue.is_empty() {
            let n = queue.head().len();
            assert!(n > 0);
            total += queue.discard(n);
        }
        assert_eq!(total, 20);
    }
}
