//! Growable FIFO byte buffer.
//!
//! Bridges two framings of the same byte stream: a producer that writes
//! whole cipher blocks and a consumer that takes fixed-width text lines (or
//! the reverse on the read side). Bytes leave in the order they arrived.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

#[derive(Debug, Default, Clone)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteQueue {
            buf: VecDeque::with_capacity(capacity),
        }
    }

    /// Number of bytes waiting to be removed.
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append bytes at the back.
    pub fn add(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
    }

    /// Remove up to `n` bytes from the front.
    pub fn remove(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    /// Remove up to `out.len()` bytes into `out`, returning the count.
    pub fn remove_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        let (front, back) = self.buf.as_slices();
        if n <= front.len() {
            out[..n].copy_from_slice(&front[..n]);
        } else {
            let split = front.len();
            out[..split].copy_from_slice(front);
            out[split..n].copy_from_slice(&back[..n - split]);
        }
        self.buf.drain(..n);
        n
    }

    /// Contiguous view of all pending bytes, without removing them.
    pub fn peek(&mut self) -> &[u8] {
        self.buf.make_contiguous()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Read for ByteQueue {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        Ok(self.remove_into(out))
    }
}

impl Write for ByteQueue {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.add(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_in_order() {
        let mut q = ByteQueue::new();
        q.add(b"hello ");
        q.add(b"world");
        assert_eq!(q.available(), 11);
        assert_eq!(q.remove(5), b"hello");
        assert_eq!(q.remove(100), b" world");
        assert!(q.is_empty());
    }

    #[test]
    fn remove_into_across_wraparound() {
        let mut q = ByteQueue::with_capacity(4);
        q.add(b"abcd");
        assert_eq!(q.remove(3), b"abc");
        q.add(b"efgh");
        let mut out = [0u8; 5];
        assert_eq!(q.remove_into(&mut out), 5);
        assert_eq!(&out, b"defgh");
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = ByteQueue::new();
        q.add(b"xyz");
        assert_eq!(q.peek(), b"xyz");
        assert_eq!(q.available(), 3);
    }

    #[test]
    fn read_write_adapters() {
        let mut q = ByteQueue::new();
        q.write_all(b"stream").unwrap();
        let mut out = Vec::new();
        q.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"stream");
        assert_eq!(q.read(&mut [0u8; 4]).unwrap(), 0);
    }

    mod proptest_suite {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fifo_without_loss_or_duplication(
                chunks in proptest::collection::vec(
                    proptest::collection::vec(any::<u8>(), 0..64),
                    0..32,
                ),
                takes in proptest::collection::vec(0usize..80, 0..64),
            ) {
                let mut q = ByteQueue::new();
                let mut expected: Vec<u8> = Vec::new();
                let mut drained: Vec<u8> = Vec::new();

                for (i, chunk) in chunks.iter().enumerate() {
                    q.add(chunk);
                    expected.extend_from_slice(chunk);
                    if let Some(&n) = takes.get(i) {
                        let before = q.available();
                        let out = q.remove(n);
                        prop_assert_eq!(out.len(), n.min(before));
                        drained.extend(out);
                    }
                }
                drained.extend(q.remove(usize::MAX));

                prop_assert_eq!(drained, expected);
                prop_assert!(q.is_empty());
            }
        }
    }
}
