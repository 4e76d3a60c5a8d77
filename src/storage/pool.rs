//! Fixed-size SQLite connection pool
//!
//! Connections circulate through a bounded channel. Reserving a connection
//! is a blocking receive, returning it is a send performed by the guard's
//! `Drop`, so every exit path gives the slot back.
//!
//! In single-thread mode only slot 0 circulates; the other slots are parked
//! and every caller is serialized through the one designated connection.

use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::time::Duration;

/// Number of connections in a fully initialized pool
pub const POOL_SIZE: usize = 4;

/// How often a collapsing pool rechecks for close while it waits
const DRAIN_POLL: Duration = Duration::from_millis(50);

struct Slot {
    index: usize,
    conn: Connection,
}

#[derive(Default)]
struct PoolState {
    opened: usize,
    parked: Vec<Slot>,
    single_thread: bool,
    closed: bool,
}

/// Pool of SQLite connections shared by all readers and writers
pub struct SqlPool {
    tx: Sender<Slot>,
    rx: Receiver<Slot>,
    state: Mutex<PoolState>,
    /// Serializes mode switches
    switching: Mutex<()>,
    reserve_timeout: Option<Duration>,
}

/// A reserved connection, returned to its pool on drop
pub struct PooledConnection<'a> {
    slot: Option<Slot>,
    pool: &'a SqlPool,
}

impl<'a> PooledConnection<'a> {
    /// Index of the pool slot this connection occupies
    pub fn slot_index(&self) -> usize {
        self.slot.as_ref().map(|s| s.index).unwrap_or(usize::MAX)
    }

    /// Give the connection back to the pool now
    pub fn release(self) {}
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.slot {
            Some(slot) => &slot.conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.slot {
            Some(slot) => &mut slot.conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.put(slot);
        }
    }
}

impl SqlPool {
    /// Create an empty pool; connections are added with [`SqlPool::add`].
    pub fn new(reserve_timeout: Option<Duration>) -> Self {
        let (tx, rx) = channel::bounded(POOL_SIZE);
        Self {
            tx,
            rx,
            state: Mutex::new(PoolState::default()),
            switching: Mutex::new(()),
            reserve_timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn put(&self, slot: Slot) {
        // The pool owns the receiver and never holds more than POOL_SIZE
        // slots, so this send neither blocks nor fails while the pool lives.
        if self.tx.try_send(slot).is_err() {
            tracing::warn!("Dropping connection that could not be returned to the pool");
        }
    }

    /// Add a freshly opened connection. Returns the slot index.
    pub fn add(&self, conn: Connection) -> Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        if state.opened >= POOL_SIZE {
            return Err(Error::Config(format!("pool already holds {} connections", POOL_SIZE)));
        }
        let index = state.opened;
        state.opened += 1;
        let slot = Slot { index, conn };
        if state.single_thread && index != 0 {
            state.parked.push(slot);
        } else {
            self.put(slot);
        }
        tracing::debug!("Pool slot {} added", index);
        Ok(index)
    }

    /// Reserve a connection, waiting until one is free.
    ///
    /// Uses the configured reserve timeout when there is one.
    pub fn reserve(&self) -> Result<PooledConnection<'_>> {
        if let Some(timeout) = self.reserve_timeout {
            return self.reserve_timeout(timeout);
        }
        self.ensure_open()?;
        let slot = self.rx.recv().map_err(|_| Error::PoolClosed)?;
        Ok(PooledConnection {
            slot: Some(slot),
            pool: self,
        })
    }

    /// Reserve a connection, giving up after `timeout`.
    ///
    /// A waiter that times out has claimed nothing.
    pub fn reserve_timeout(&self, timeout: Duration) -> Result<PooledConnection<'_>> {
        self.ensure_open()?;
        match self.rx.recv_timeout(timeout) {
            Ok(slot) => Ok(PooledConnection {
                slot: Some(slot),
                pool: self,
            }),
            Err(RecvTimeoutError::Timeout) => Err(Error::PoolTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::PoolClosed),
        }
    }

    /// Return a reserved connection. `None` is a no-op.
    pub fn give_back(&self, conn: Option<PooledConnection<'_>>) {
        drop(conn);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lock().closed {
            return Err(Error::PoolClosed);
        }
        Ok(())
    }

    /// Collapse the pool to the designated connection (slot 0), or expand it
    /// back to every opened connection.
    ///
    /// Collapsing waits for all outstanding connections to come back. The
    /// wait happens outside the state lock, so reservers still time out and
    /// see a close on schedule.
    pub fn set_single_thread(&self, single_thread: bool) -> Result<()> {
        let _switching = self.switching.lock().unwrap_or_else(|e| e.into_inner());
        let circulating = {
            let mut state = self.lock();
            if state.closed {
                return Err(Error::PoolClosed);
            }
            if state.single_thread == single_thread {
                return Ok(());
            }
            state.single_thread = single_thread;
            if !single_thread {
                for slot in state.parked.drain(..) {
                    self.put(slot);
                }
                tracing::debug!("Pool single-thread mode: false");
                return Ok(());
            }
            // Slots added from here on are parked by `add`.
            state.opened - state.parked.len()
        };

        let mut drained = Vec::with_capacity(circulating);
        while drained.len() < circulating {
            match self.rx.recv_timeout(DRAIN_POLL) {
                Ok(slot) => drained.push(slot),
                Err(RecvTimeoutError::Timeout) => {
                    if self.lock().closed {
                        return Err(Error::PoolClosed);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::PoolClosed),
            }
        }

        let mut state = self.lock();
        for slot in drained {
            if slot.index == 0 {
                self.put(slot);
            } else {
                state.parked.push(slot);
            }
        }
        tracing::debug!("Pool single-thread mode: true");
        Ok(())
    }

    pub fn is_single_thread(&self) -> bool {
        self.lock().single_thread
    }

    /// Number of connections opened into this pool
    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    /// Number of connections currently waiting to be reserved
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Close every connection that is not currently reserved and refuse
    /// further reservations.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let parked = state.parked.len();
        state.parked.clear();
        let idle = self.rx.try_iter().count();
        tracing::debug!("Pool closed ({} idle, {} parked connections)", idle, parked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn full_pool(timeout: Option<Duration>) -> SqlPool {
        let pool = SqlPool::new(timeout);
        for _ in 0..POOL_SIZE {
            pool.add(Connection::open_in_memory().unwrap()).unwrap();
        }
        pool
    }

    #[test]
    fn test_reserve_and_return() {
        let pool = full_pool(None);
        assert_eq!(pool.available(), POOL_SIZE);

        let a = pool.reserve().unwrap();
        let b = pool.reserve().unwrap();
        assert_ne!(a.slot_index(), b.slot_index());
        assert_eq!(pool.available(), POOL_SIZE - 2);

        a.release();
        pool.give_back(Some(b));
        pool.give_back(None);
        assert_eq!(pool.available(), POOL_SIZE);
    }

    #[test]
    fn test_connection_is_usable() {
        let pool = full_pool(None);
        let conn = pool.reserve().unwrap();
        let value: i64 = conn.query_row("SELECT 40 + 2", [], |row| row.get(0)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_reserve_timeout_does_not_leak() {
        let pool = full_pool(Some(Duration::from_millis(20)));
        let held: Vec<_> = (0..POOL_SIZE).map(|_| pool.reserve().unwrap()).collect();

        assert!(matches!(pool.reserve(), Err(Error::PoolTimeout)));
        assert_eq!(pool.available(), 0);

        drop(held);
        assert_eq!(pool.available(), POOL_SIZE);
        assert!(pool.reserve().is_ok());
    }

    #[test]
    fn test_too_many_connections() {
        let pool = full_pool(None);
        assert!(pool.add(Connection::open_in_memory().unwrap()).is_err());
        assert_eq!(pool.opened(), POOL_SIZE);
    }

    #[test]
    fn test_single_thread_uses_designated_slot() {
        let pool = full_pool(None);
        pool.set_single_thread(true).unwrap();
        assert!(pool.is_single_thread());
        assert_eq!(pool.available(), 1);

        for _ in 0..3 {
            let conn = pool.reserve().unwrap();
            assert_eq!(conn.slot_index(), 0);
        }

        pool.set_single_thread(false).unwrap();
        assert_eq!(pool.available(), POOL_SIZE);
    }

    #[test]
    fn test_single_thread_waits_for_outstanding() {
        let pool = Arc::new(full_pool(None));
        let released = Arc::new(AtomicBool::new(false));

        let holder = {
            let pool = Arc::clone(&pool);
            let released = Arc::clone(&released);
            let (ready_tx, ready_rx) = channel::bounded::<()>(0);
            let handle = thread::spawn(move || {
                let conn = pool.reserve().unwrap();
                ready_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::SeqCst);
                drop(conn);
            });
            ready_rx.recv().unwrap();
            handle
        };

        pool.set_single_thread(true).unwrap();
        assert!(released.load(Ordering::SeqCst));
        holder.join().unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_collapsing_pool_does_not_delay_timed_reservers() {
        let pool = Arc::new(full_pool(Some(Duration::from_millis(20))));
        let held = pool.reserve().unwrap();

        let collapser = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.set_single_thread(true))
        };
        thread::sleep(Duration::from_millis(30));

        let started = std::time::Instant::now();
        let result = pool.reserve();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(matches!(result, Err(Error::PoolTimeout)));

        drop(held);
        collapser.join().unwrap().unwrap();
        assert!(pool.is_single_thread());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_close_ends_a_pending_collapse() {
        let pool = Arc::new(full_pool(None));
        let held = pool.reserve().unwrap();

        let collapser = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.set_single_thread(true))
        };
        thread::sleep(Duration::from_millis(30));
        pool.close();

        assert!(matches!(collapser.join().unwrap(), Err(Error::PoolClosed)));
        drop(held);
    }

    #[test]
    fn test_bootstrap_slots_are_parked() {
        let pool = SqlPool::new(None);
        pool.set_single_thread(true).unwrap();
        for _ in 0..POOL_SIZE {
            pool.add(Connection::open_in_memory().unwrap()).unwrap();
        }
        assert_eq!(pool.available(), 1);

        pool.set_single_thread(false).unwrap();
        assert_eq!(pool.available(), POOL_SIZE);
    }

    #[test]
    fn test_concurrent_reservers_never_share_a_slot() {
        let pool = Arc::new(full_pool(None));
        let in_use: Arc<Vec<AtomicBool>> =
            Arc::new((0..POOL_SIZE).map(|_| AtomicBool::new(false)).collect());
        let outstanding = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..POOL_SIZE + 6)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                let outstanding = Arc::clone(&outstanding);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let conn = pool.reserve().unwrap();
                        let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        let was_held = in_use[conn.slot_index()].swap(true, Ordering::SeqCst);
                        assert!(!was_held, "slot {} claimed twice", conn.slot_index());
                        thread::yield_now();
                        in_use[conn.slot_index()].store(false, Ordering::SeqCst);
                        outstanding.fetch_sub(1, Ordering::SeqCst);
                        drop(conn);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= POOL_SIZE);
        assert_eq!(pool.available(), POOL_SIZE);
    }

    #[test]
    fn test_closed_pool_refuses_reserve() {
        let pool = full_pool(None);
        pool.close();
        pool.close();
        assert!(matches!(pool.reserve(), Err(Error::PoolClosed)));
        assert_eq!(pool.available(), 0);
    }
}
