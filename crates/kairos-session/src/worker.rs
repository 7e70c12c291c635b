//! Control-channel worker.
//!
//! Wraps a [`FrameReassembler`] on the reserved bidirectional stream and adds
//! the write side: a periodic keepalive ping and the outbound message queue.
//! Inbound keepalive acknowledgments are consumed here; everything else is
//! forwarded as [`SessionEvent::Control`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kairos_frame::{BufferPool, Frame, FrameError, FrameReassembler, FrameSink};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::control::{is_keepalive_ack, ControlMessage};
use crate::error::{Result, SessionError};
use crate::handle::{EventSender, SessionEvent};

/// Reader, writer and keepalive for the control stream.
pub(crate) struct ControlWorker<R, W> {
    reassembler: FrameReassembler<R>,
    writer: W,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    ping: Bytes,
    keepalive_interval: Duration,
    keepalive_timeout: Option<Duration>,
}

impl<R, W> ControlWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        reassembler: FrameReassembler<R>,
        writer: W,
        outbound: mpsc::UnboundedReceiver<Bytes>,
        config: &SessionConfig,
    ) -> Result<Self> {
        Ok(Self {
            reassembler,
            writer,
            outbound,
            ping: ControlMessage::ping().to_frame_bytes()?,
            keepalive_interval: config.keepalive_interval,
            keepalive_timeout: config.keepalive_timeout,
        })
    }

    /// Run until the stream closes, a write fails, or the stream is aborted.
    ///
    /// The read and write halves stop together.
    pub(crate) async fn run(self, events: EventSender) -> Result<()> {
        let Self {
            reassembler,
            writer,
            outbound,
            ping,
            keepalive_interval,
            keepalive_timeout,
        } = self;

        let cancel = reassembler.cancel_token();
        let acked = Arc::new(Notify::new());
        let sink = ControlSink {
            pool: reassembler.pool().clone(),
            events,
            acked: Arc::clone(&acked),
        };

        let read = async {
            let result = reassembler.run(sink).await;
            cancel.cancel();
            result
        };
        let write = async {
            let keepalive = Keepalive {
                ping: &ping,
                interval: keepalive_interval,
                timeout: keepalive_timeout,
                acked: &acked,
            };
            let result = write_loop(writer, outbound, keepalive, &cancel).await;
            cancel.cancel();
            result
        };

        match tokio::join!(read, write) {
            (_, Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err.into()),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

struct ControlSink {
    pool: BufferPool,
    events: EventSender,
    acked: Arc<Notify>,
}

impl FrameSink for ControlSink {
    fn on_frame(&mut self, frame: Frame) -> kairos_frame::Result<()> {
        if is_keepalive_ack(frame.as_bytes()) {
            trace!(stream_id = frame.stream_id(), "keepalive acknowledged");
            self.acked.notify_one();
            self.pool.release(frame.into_buffer());
            return Ok(());
        }
        self.events
            .send(SessionEvent::Control(frame))
            .map_err(|_| FrameError::SinkClosed)
    }
}

struct Keepalive<'a> {
    ping: &'a [u8],
    interval: Duration,
    timeout: Option<Duration>,
    acked: &'a Notify,
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    keepalive: Keepalive<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(keepalive.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline_from_now = || {
        keepalive
            .timeout
            .map(|timeout| (Instant::now() + timeout, timeout))
    };
    let mut deadline = deadline_from_now();

    loop {
        let expiry = async move {
            match deadline {
                Some((at, timeout)) => {
                    tokio::time::sleep_until(at).await;
                    timeout
                }
                None => std::future::pending::<Duration>().await,
            }
        };

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            timeout = expiry => {
                warn!(?timeout, "keepalive acknowledgment overdue");
                return Err(SessionError::KeepaliveTimeout(timeout));
            }
            _ = keepalive.acked.notified() => {
                deadline = deadline_from_now();
                continue;
            }
            _ = ticker.tick() => {
                trace!("sending keepalive ping");
                write_or_cancel(&mut writer, keepalive.ping, cancel).await?
            }
            message = outbound.recv() => match message {
                Some(bytes) => {
                    debug!(len = bytes.len(), "sending control message");
                    write_or_cancel(&mut writer, &bytes, cancel).await?
                }
                None => break,
            },
        };
        if !written {
            break;
        }
    }

    // Best effort: the peer may already be gone.
    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_or_cancel<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<bool> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(false),
        written = writer.write_all(bytes) => written
            .map(|()| true)
            .map_err(SessionError::ControlWrite),
    }
}
