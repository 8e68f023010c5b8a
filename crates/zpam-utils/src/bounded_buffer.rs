//! Body-assembly buffer with a hard capacity (spec §4.8): "during
//! Body* the session appends chunks to a bounded buffer (configurable
//! hard cap; exceeding it yields a temp-failure)".

use zpam_trc::Error;

pub struct BoundedBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        BoundedBuffer {
            buf: Vec::new(),
            capacity,
        }
    }

    /// Appends `chunk`, returning `ResourceExhausted` without mutating
    /// the buffer if doing so would exceed capacity.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if self.buf.len() + chunk.len() > self.capacity {
            return Err(Error::ResourceExhausted(format!(
                "body buffer capacity {} exceeded",
                self.capacity
            )));
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overflow_without_partial_write() {
        let mut buf = BoundedBuffer::new(10);
        buf.push(b"12345").unwrap();
        assert!(buf.push(b"123456").is_err());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn accepts_up_to_capacity() {
        let mut buf = BoundedBuffer::new(10);
        buf.push(b"0123456789").unwrap();
        assert_eq!(buf.len(), 10);
    }
}
