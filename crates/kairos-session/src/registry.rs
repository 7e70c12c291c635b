//! Session-scoped stream registry.
//!
//! One registry exists per connection attempt. It maps local stream ids to
//! the stream's pool and abort token, enforces source id uniqueness, and
//! holds the control channel's outbound queue. Teardown aborts every entry;
//! nothing carries over to the next attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use kairos_frame::{BufferPool, StreamId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SessionError};

#[derive(Debug)]
struct StreamEntry {
    source_id: u32,
    pool: BufferPool,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ControlEndpoint {
    stream_id: StreamId,
    outbound: mpsc::UnboundedSender<Bytes>,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_stream_id: StreamId,
    streams: HashMap<StreamId, StreamEntry>,
    control: Option<ControlEndpoint>,
}

impl RegistryState {
    fn check_source(&self, source_id: u32) -> Result<()> {
        if self.streams.values().any(|entry| entry.source_id == source_id) {
            return Err(SessionError::DuplicateSource(source_id));
        }
        Ok(())
    }

    fn insert(&mut self, source_id: u32, pool: BufferPool, cancel: CancellationToken) -> StreamId {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;
        self.streams.insert(
            stream_id,
            StreamEntry {
                source_id,
                pool,
                cancel,
            },
        );
        stream_id
    }
}

/// Shared handle to one session's streams.
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl StreamRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a data stream and assign its id.
    pub(crate) fn register(
        &self,
        source_id: u32,
        pool: BufferPool,
        cancel: CancellationToken,
    ) -> Result<StreamId> {
        let mut state = self.lock();
        state.check_source(source_id)?;
        Ok(state.insert(source_id, pool, cancel))
    }

    /// Track the control stream and its outbound queue.
    pub(crate) fn register_control(
        &self,
        source_id: u32,
        pool: BufferPool,
        cancel: CancellationToken,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Result<StreamId> {
        let mut state = self.lock();
        if state.control.is_some() {
            return Err(SessionError::DuplicateControlChannel);
        }
        state.check_source(source_id)?;
        let stream_id = state.insert(source_id, pool, cancel);
        state.control = Some(ControlEndpoint {
            stream_id,
            outbound,
        });
        Ok(stream_id)
    }

    /// Forget a stream whose task has ended.
    pub(crate) fn remove(&self, stream_id: StreamId) {
        let mut state = self.lock();
        state.streams.remove(&stream_id);
        if state
            .control
            .as_ref()
            .is_some_and(|control| control.stream_id == stream_id)
        {
            state.control = None;
        }
    }

    /// Return a buffer to its stream's pool. Returns false for unknown streams.
    pub(crate) fn release(&self, stream_id: StreamId, buffer: BytesMut) -> bool {
        let pool = self
            .lock()
            .streams
            .get(&stream_id)
            .map(|entry| entry.pool.clone());
        match pool {
            Some(pool) => {
                pool.release(buffer);
                true
            }
            None => {
                debug!(stream_id, "buffer returned for unknown stream, dropping it");
                false
            }
        }
    }

    /// Queue bytes on the control channel. Returns false without one.
    pub(crate) fn send_control(&self, bytes: Bytes) -> bool {
        let state = self.lock();
        match &state.control {
            Some(control) => control.outbound.send(bytes).is_ok(),
            None => {
                debug!(len = bytes.len(), "no control channel, dropping message");
                false
            }
        }
    }

    /// Stop taking control messages and let the worker flush its queue.
    ///
    /// Returns the control stream's token, which is cancelled once the
    /// worker has written everything queued and closed its write side.
    pub(crate) fn close_control(&self) -> Option<CancellationToken> {
        let mut state = self.lock();
        let control = state.control.take()?;
        state
            .streams
            .get(&control.stream_id)
            .map(|entry| entry.cancel.clone())
    }

    /// Abort every stream and forget them all.
    pub(crate) fn abort_all(&self) -> usize {
        let mut state = self.lock();
        let count = state.streams.len();
        for (stream_id, entry) in state.streams.drain() {
            debug!(stream_id, source_id = entry.source_id, "aborting stream");
            entry.cancel.cancel();
            entry.pool.abort();
        }
        state.control = None;
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().streams.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
