//! Fixed-population buffer pool
//!
//! The packet hot path never allocates: readers borrow a buffer here,
//! hand it through a worker channel, and the worker returns it after
//! processing. When the pool runs dry the packet is dropped at the
//! reader, never blocking a producer.

use std::sync::Mutex;

use bytes::BytesMut;

/// LIFO pool of equally-sized buffers.
pub struct MemPool {
    pool: Mutex<Vec<BytesMut>>,
    item_size: usize,
}

impl MemPool {
    pub fn new(item_size: usize, items: usize) -> Self {
        let pool = (0..items).map(|_| BytesMut::zeroed(item_size)).collect();
        Self {
            pool: Mutex::new(pool),
            item_size,
        }
    }

    /// Borrow a buffer, `None` when the pool is exhausted. Returned
    /// buffers are full-length; readers truncate to the packet size
    /// before passing them on.
    pub fn get(&self) -> Option<BytesMut> {
        self.pool.lock().unwrap().pop()
    }

    /// Return a borrowed buffer, restoring its full length.
    pub fn put(&self, mut buf: BytesMut) {
        buf.resize(self.item_size, 0);
        self.pool.lock().unwrap().push(buf);
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }
}
