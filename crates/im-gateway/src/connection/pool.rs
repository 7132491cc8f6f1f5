//! Recycling of drained connections

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::Connection;
use crate::protocol::GatewayCodec;

/// Free list of scrubbed connections
pub struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    capacity: usize,
    codec: Arc<GatewayCodec>,
    allocated: AtomicUsize,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(capacity: usize, codec: Arc<GatewayCodec>) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity.min(1024))),
            capacity,
            codec,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Take an idle connection or allocate one; it must be reset before use
    pub fn get(&self) -> Connection {
        if let Some(conn) = self.idle.lock().pop() {
            debug_assert!(conn.is_pristine(), "pooled connection kept session state");
            return conn;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Connection::empty(Arc::clone(&self.codec))
    }

    /// Hand back one reference to a finished connection.
    ///
    /// Every owner calls this when it lets go; only the last reference is
    /// recycled. Returns whether the connection went back to the free list.
    pub fn put(&self, conn: Arc<Connection>) -> bool {
        let Some(mut conn) = Arc::into_inner(conn) else {
            return false;
        };
        conn.scrub();

        let mut idle = self.idle.lock();
        if idle.len() >= self.capacity {
            return false;
        }
        idle.push(conn);
        true
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    /// Connections created since start, pooled or not
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}
