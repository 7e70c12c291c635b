//! Stream acceptors.
//!
//! One loop per direction. Each accepted stream is handshaken, validated,
//! registered, and handed to its own task; the acceptor then goes back to
//! accepting. Acceptors only return on a session-fatal error.

use std::convert::Infallible;
use std::sync::Arc;

use kairos_frame::{
    read_descriptor, BufferPool, Frame, FrameError, FrameReassembler, StreamDescriptor, StreamId,
};
use kairos_transport::MultiplexedSession;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::handle::{EventSender, SessionEvent};
use crate::registry::StreamRegistry;
use crate::worker::ControlWorker;

/// Everything a stream task needs from its session.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) registry: StreamRegistry,
    pub(crate) events: EventSender,
    pub(crate) faults: mpsc::UnboundedSender<SessionError>,
    pub(crate) config: Arc<SessionConfig>,
}

impl SessionContext {
    fn report(&self, stream_id: StreamId, err: SessionError) {
        if err.is_abort() {
            debug!(stream_id, "stream task stopped by teardown");
            return;
        }
        // Stream tasks from a torn-down session have nobody left to tell.
        let _ = self.faults.send(err);
    }
}

/// Accept unidirectional data streams until the session fails.
pub(crate) async fn accept_unidirectional<S: MultiplexedSession>(
    session: &S,
    ctx: &SessionContext,
) -> Result<Infallible> {
    loop {
        let mut recv = session.accept_uni().await?;
        let descriptor = handshake(&mut recv, ctx).await?;
        if descriptor.source_id == ctx.config.control_source_id {
            return Err(SessionError::ControlOnUnidirectional(descriptor.source_id));
        }
        spawn_data_stream(descriptor, recv, ctx)?;
    }
}

/// Accept the bidirectional control stream until the session fails.
pub(crate) async fn accept_bidirectional<S: MultiplexedSession>(
    session: &S,
    ctx: &SessionContext,
) -> Result<Infallible> {
    loop {
        let (send, mut recv) = session.accept_bi().await?;
        let descriptor = handshake(&mut recv, ctx).await?;
        if descriptor.source_id != ctx.config.control_source_id {
            return Err(SessionError::UnexpectedBidirectionalSource(
                descriptor.source_id,
            ));
        }
        spawn_control_stream(descriptor, recv, send, ctx)?;
    }
}

async fn handshake<R: AsyncRead + Unpin>(
    recv: &mut R,
    ctx: &SessionContext,
) -> Result<StreamDescriptor> {
    let descriptor = read_descriptor(recv).await?;
    debug!(
        source_id = descriptor.source_id,
        buffer_count = descriptor.recommended_buffer_count,
        max_frame_length = descriptor.max_frame_length,
        "stream handshake"
    );
    descriptor.validate(&ctx.config.limits)?;
    Ok(descriptor)
}

fn stream_pool(descriptor: &StreamDescriptor) -> BufferPool {
    BufferPool::new(
        descriptor.recommended_buffer_count as usize,
        descriptor.max_frame_length as usize,
    )
}

fn spawn_data_stream<R>(descriptor: StreamDescriptor, recv: R, ctx: &SessionContext) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let pool = stream_pool(&descriptor);
    let cancel = CancellationToken::new();
    let stream_id = ctx
        .registry
        .register(descriptor.source_id, pool.clone(), cancel.clone())?;
    info!(stream_id, source_id = descriptor.source_id, "data stream open");

    let reassembler = FrameReassembler::with_pool(stream_id, descriptor.source_id, pool, recv)
        .with_cancel_token(cancel);
    let events = ctx.events.clone();
    let sink = move |frame: Frame| {
        events
            .send(SessionEvent::Data(frame))
            .map_err(|_| FrameError::SinkClosed)
    };

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let result = reassembler.run(sink).await;
        ctx.registry.remove(stream_id);
        if let Err(err) = result {
            ctx.report(stream_id, err.into());
        }
    });
    Ok(())
}

fn spawn_control_stream<R, W>(
    descriptor: StreamDescriptor,
    recv: R,
    send: W,
    ctx: &SessionContext,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pool = stream_pool(&descriptor);
    let cancel = CancellationToken::new();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let stream_id = ctx.registry.register_control(
        descriptor.source_id,
        pool.clone(),
        cancel.clone(),
        outbound_tx,
    )?;
    info!(stream_id, "control stream open");

    let reassembler = FrameReassembler::with_pool(stream_id, descriptor.source_id, pool, recv)
        .with_cancel_token(cancel);
    let worker = ControlWorker::new(reassembler, send, outbound_rx, &ctx.config)?;

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let result = worker.run(ctx.events.clone()).await;
        ctx.registry.remove(stream_id);
        if let Err(err) = result {
            ctx.report(stream_id, err);
        }
    });
    Ok(())
}
