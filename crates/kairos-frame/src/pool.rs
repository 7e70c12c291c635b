//! Per-stream buffer pool.
//!
//! A fixed set of fixed-length buffers. `acquire` suspends while the pool is
//! empty; `release` hands a returned buffer straight to the suspended waiter
//! if there is one. At most one waiter may be pending, so a stream never
//! holds more than `capacity` buffers regardless of load.
//!
//! The pool remembers which buffers it lent out. A returned buffer that it
//! did not lend is dropped, so stray releases cannot grow the
//! number of buffers in circulation past `capacity`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::error::{FrameError, Result};

/// Shared handle to one stream's buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    buffer_len: usize,
    state: Mutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    available: Vec<BytesMut>,
    /// Base addresses of buffers currently lent out.
    lent: HashSet<usize>,
    waiter: Option<oneshot::Sender<BytesMut>>,
    aborted: bool,
}

impl BufferPool {
    /// Allocate `capacity` zeroed buffers of `buffer_len` bytes each.
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        let available = (0..capacity).map(|_| BytesMut::zeroed(buffer_len)).collect();
        Self {
            shared: Arc::new(Shared {
                capacity,
                buffer_len,
                state: Mutex::new(PoolState {
                    available,
                    lent: HashSet::with_capacity(capacity),
                    waiter: None,
                    aborted: false,
                }),
            }),
        }
    }

    /// Number of buffers the pool owns.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Fixed length of every buffer.
    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len
    }

    /// Buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.lock().available.len()
    }

    /// Buffers currently lent out (held by the stream or its consumers).
    pub fn outstanding(&self) -> usize {
        self.lock().lent.len()
    }

    /// Whether a suspended `acquire` is waiting for a buffer.
    pub fn has_waiter(&self) -> bool {
        self.lock()
            .waiter
            .as_ref()
            .is_some_and(|waiter| !waiter.is_closed())
    }

    /// Whether [`BufferPool::abort`] has been called.
    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Take a buffer, suspending until one is released if the pool is empty.
    ///
    /// Fails with [`FrameError::WaiterPending`] if another acquire is already
    /// suspended, and with [`FrameError::Aborted`] once the pool is aborted.
    pub async fn acquire(&self) -> Result<BytesMut> {
        let receiver = {
            let mut state = self.lock();
            if state.aborted {
                return Err(FrameError::Aborted);
            }
            if let Some(buffer) = state.available.pop() {
                state.lent.insert(buffer_id(&buffer));
                return Ok(buffer);
            }
            // A waiter whose acquire future was dropped no longer counts.
            if state
                .waiter
                .as_ref()
                .is_some_and(|waiter| !waiter.is_closed())
            {
                return Err(FrameError::WaiterPending);
            }
            let (sender, receiver) = oneshot::channel();
            state.waiter = Some(sender);
            receiver
        };

        trace!(capacity = self.shared.capacity, "buffer pool exhausted, waiting");
        receiver.await.map_err(|_| FrameError::Aborted)
    }

    /// Return a buffer to the pool, or directly to the pending waiter.
    ///
    /// Only buffers this pool lent out, and that are not already back, are
    /// taken; anything else is dropped with a warning.
    pub fn release(&self, mut buffer: BytesMut) {
        let id = buffer_id(&buffer);
        let mut state = self.lock();
        if state.aborted {
            return;
        }
        if !state.lent.contains(&id) {
            warn!(
                capacity = self.shared.capacity,
                outstanding = state.lent.len(),
                "buffer not lent by this pool, dropping it"
            );
            return;
        }
        if buffer.len() != self.shared.buffer_len {
            buffer.resize(self.shared.buffer_len, 0);
        }
        // Handing over to the waiter keeps the buffer lent.
        if let Some(waiter) = state.waiter.take() {
            match waiter.send(buffer) {
                Ok(()) => return,
                Err(returned) => buffer = returned,
            }
        }
        state.lent.remove(&id);
        state.available.push(buffer);
    }

    /// Reject the pending waiter and refuse further acquires.
    pub fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        state.waiter = None;
        state.available.clear();
        state.lent.clear();
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// Truncating or resizing within capacity keeps the base address.
fn buffer_id(buffer: &BytesMut) -> usize {
    buffer.as_ptr() as usize
}
