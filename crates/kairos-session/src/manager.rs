//! Session manager.
//!
//! Owns the connect / serve / tear down / retry cycle. Each attempt gets a
//! fresh [`StreamRegistry`]; any session-fatal error aborts every stream,
//! closes the session, reports `disconnected`, and retries after a fixed
//! delay. Commands are served in every phase, so buffer returns and
//! shutdown never block on the network. A shutdown first lets the control
//! channel write what is already queued, for at most `shutdown_flush`.

use std::sync::Arc;
use std::time::Duration;

use kairos_transport::{Connector, EndpointLocation, MultiplexedSession};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::acceptor::{accept_bidirectional, accept_unidirectional, SessionContext};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::handle::{
    Command, ConnectionStatus, EventReceiver, EventSender, SessionEvent, SessionHandle,
};
use crate::registry::StreamRegistry;

/// How one connection attempt ended.
enum Exit {
    Failed(SessionError),
    Shutdown,
}

/// Drives the session lifecycle for one endpoint.
pub struct SessionManager<C> {
    connector: C,
    config: Arc<SessionConfig>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender,
}

impl<C: Connector> SessionManager<C> {
    /// Create a manager, the handle that commands it, and its event stream.
    ///
    /// Nothing happens until [`SessionManager::run`] is polled and a
    /// [`Command::Setup`] arrives.
    pub fn new(connector: C, config: SessionConfig) -> (Self, SessionHandle, EventReceiver) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            connector,
            config: Arc::new(config),
            commands,
            events,
        };
        (manager, SessionHandle::new(commands_tx), events_rx)
    }

    /// Serve until shutdown.
    ///
    /// Returns after [`Command::Shutdown`], when every [`SessionHandle`] is
    /// dropped, or when the event receiver is dropped. Session failures never
    /// end this loop; they are retried after `reconnect_delay`.
    pub async fn run(mut self) {
        let Some(location) = self.wait_for_setup().await else {
            debug!("stopped before setup");
            return;
        };
        self.emit(ConnectionStatus::Connecting);

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.serve(&location, attempt).await {
                Exit::Shutdown => {
                    info!(attempt, "session shut down");
                    self.emit(ConnectionStatus::Disconnected);
                    return;
                }
                Exit::Failed(err) => {
                    error!(
                        attempt,
                        error = %err,
                        delay = ?self.config.reconnect_delay,
                        "session failed, reconnecting"
                    );
                    self.emit(ConnectionStatus::Disconnected);
                }
            }
            if self.events.is_closed() {
                debug!("event receiver dropped, stopping");
                return;
            }
            if !self.pause(self.config.reconnect_delay).await {
                info!("session shut down while waiting to reconnect");
                return;
            }
        }
    }

    async fn wait_for_setup(&mut self) -> Option<EndpointLocation> {
        loop {
            match self.commands.recv().await? {
                Command::Setup(location) => return Some(location),
                Command::Shutdown => return None,
                Command::ReleaseBuffer { stream_id, .. } => {
                    debug!(stream_id, "buffer returned before setup, dropping it");
                }
                Command::SendControl(bytes) => {
                    debug!(len = bytes.len(), "control message before setup, dropping it");
                }
            }
        }
    }

    /// One connection attempt: establish, serve streams, tear down.
    async fn serve(&mut self, location: &EndpointLocation, attempt: u64) -> Exit {
        let registry = StreamRegistry::new();

        let connector = &self.connector;
        let establish = async {
            let descriptor = connector.resolve(location).await?;
            debug!(attempt, port = descriptor.port, "endpoint resolved");
            connector.open(location, &descriptor).await
        };
        tokio::pin!(establish);
        let session = loop {
            tokio::select! {
                result = &mut establish => match result {
                    Ok(session) => break session,
                    Err(err) => return Exit::Failed(err.into()),
                },
                command = self.commands.recv() => {
                    if !dispatch(None, command) {
                        return Exit::Shutdown;
                    }
                }
            }
        };

        info!(attempt, %location, "session connected");
        self.emit(ConnectionStatus::Connected);

        let (faults_tx, mut faults) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            registry: registry.clone(),
            events: self.events.clone(),
            faults: faults_tx,
            config: Arc::clone(&self.config),
        };

        let exit = {
            let unidirectional = accept_unidirectional(&session, &ctx);
            let bidirectional = accept_bidirectional(&session, &ctx);
            tokio::pin!(unidirectional, bidirectional);
            loop {
                tokio::select! {
                    result = &mut unidirectional => break Exit::Failed(acceptor_error(result)),
                    result = &mut bidirectional => break Exit::Failed(acceptor_error(result)),
                    Some(fault) = faults.recv() => break Exit::Failed(fault),
                    command = self.commands.recv() => {
                        if !dispatch(Some(&registry), command) {
                            break Exit::Shutdown;
                        }
                    }
                }
            }
        };

        if matches!(exit, Exit::Shutdown) {
            flush_control(&registry, self.config.shutdown_flush).await;
        }
        let aborted = registry.abort_all();
        session.close();
        debug!(attempt, aborted, "session torn down");
        exit
    }

    /// Wait out the reconnect delay. Returns false on shutdown.
    async fn pause(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => {
                    if !dispatch(None, command) {
                        return false;
                    }
                }
            }
        }
    }

    fn emit(&self, status: ConnectionStatus) {
        debug!(%status, "connection status");
        let _ = self.events.send(SessionEvent::Status(status));
    }
}

/// Give the control worker a bounded chance to write what is queued.
async fn flush_control(registry: &StreamRegistry, limit: Duration) {
    let Some(finished) = registry.close_control() else {
        return;
    };
    if tokio::time::timeout(limit, finished.cancelled()).await.is_err() {
        warn!(?limit, "control channel not flushed before shutdown");
    }
}

fn acceptor_error(result: Result<std::convert::Infallible, SessionError>) -> SessionError {
    match result {
        Err(err) => err,
        Ok(never) => match never {},
    }
}

/// Apply one command. Returns false when the manager should stop.
fn dispatch(registry: Option<&StreamRegistry>, command: Option<Command>) -> bool {
    let Some(command) = command else {
        debug!("all session handles dropped");
        return false;
    };
    match command {
        Command::Shutdown => false,
        Command::Setup(location) => {
            warn!(%location, "session already set up, ignoring");
            true
        }
        Command::ReleaseBuffer { stream_id, buffer } => {
            match registry {
                Some(registry) => {
                    registry.release(stream_id, buffer);
                }
                None => debug!(stream_id, "no live session, dropping returned buffer"),
            }
            true
        }
        Command::SendControl(bytes) => {
            match registry {
                Some(registry) => {
                    registry.send_control(bytes);
                }
                None => debug!(len = bytes.len(), "no live session, dropping control message"),
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use kairos_frame::StreamDescriptor;
    use kairos_transport::memory::MemoryConnector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::Instant;

    use super::*;
    use crate::control::{ControlMessage, CONTROL_SOURCE_ID};

    fn location() -> EndpointLocation {
        EndpointLocation::parse("http://localhost:3000/").expect("location should parse")
    }

    fn within(elapsed: Duration, expected: Duration) -> bool {
        elapsed >= expected && elapsed < expected + Duration::from_millis(50)
    }

    async fn next_status(events: &mut EventReceiver) -> ConnectionStatus {
        loop {
            match events.recv().await.expect("manager should be running") {
                SessionEvent::Status(status) => return status,
                other => debug!(?other, "skipping event"),
            }
        }
    }

    #[tokio::test]
    async fn stops_when_handles_dropped_before_setup() {
        let (connector, _peers) = MemoryConnector::new();
        let (manager, handle, _events) = SessionManager::new(connector, SessionConfig::default());
        drop(handle);
        manager.run().await;
    }

    #[tokio::test]
    async fn connect_then_shutdown() {
        let (connector, mut peers) = MemoryConnector::new();
        let (manager, handle, mut events) =
            SessionManager::new(connector, SessionConfig::default());
        let task = tokio::spawn(manager.run());

        handle.setup(location()).expect("setup should be accepted");
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
        let peer = peers.recv().await.expect("a session should open");

        handle.shutdown().expect("shutdown should be accepted");
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        task.await.expect("manager should not panic");
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_failures_retry_after_fixed_delay() {
        let (connector, mut peers) = MemoryConnector::new();
        let connector = connector.fail_next_resolves(2);
        let (manager, handle, mut events) =
            SessionManager::new(connector, SessionConfig::default());
        let task = tokio::spawn(manager.run());

        handle.setup(location()).expect("setup should be accepted");
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        let first_failure = Instant::now();
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        assert!(within(first_failure.elapsed(), Duration::from_millis(1000)));
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
        assert!(within(first_failure.elapsed(), Duration::from_millis(2000)));
        assert!(peers.recv().await.is_some());

        handle.shutdown().expect("shutdown should be accepted");
        task.await.expect("manager should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_triggers_reconnect() {
        let (connector, mut peers) = MemoryConnector::new();
        let (manager, handle, mut events) =
            SessionManager::new(connector, SessionConfig::default());
        let task = tokio::spawn(manager.run());

        handle.setup(location()).expect("setup should be accepted");
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
        let first = peers.recv().await.expect("first session should open");

        first.close();
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
        let second = peers.recv().await.expect("second session should open");
        assert!(!second.is_closed());

        // A second setup is ignored rather than starting another session.
        handle.setup(location()).expect("setup should be accepted");
        handle.shutdown().expect("shutdown should be accepted");
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        task.await.expect("manager should not panic");
        assert!(peers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_control_message_is_written_before_shutdown() {
        let (connector, mut peers) = MemoryConnector::new();
        let (manager, handle, mut events) =
            SessionManager::new(connector, SessionConfig::default());
        let task = tokio::spawn(manager.run());

        handle.setup(location()).expect("setup should be accepted");
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
        let peer = peers.recv().await.expect("a session should open");

        let mut control = peer.open_bi().expect("peer should open a stream");
        let handshake = StreamDescriptor {
            source_id: CONTROL_SOURCE_ID,
            recommended_buffer_count: 4,
            max_frame_length: 1024,
        }
        .encode();
        control
            .write_all(&handshake)
            .await
            .expect("handshake should be written");

        // The first ping means the control stream is registered.
        let ping = ControlMessage::ping()
            .to_frame_bytes()
            .expect("ping should frame");
        let mut first = vec![0u8; ping.len()];
        control
            .read_exact(&mut first)
            .await
            .expect("ping should arrive");
        assert_eq!(first, ping.to_vec());

        let message = [7u8, 0, 0, 0, b'h', b'e', b'y'];
        handle
            .send_control(message.to_vec())
            .expect("message should be accepted");
        handle.shutdown().expect("shutdown should be accepted");

        let mut rest = Vec::new();
        control
            .read_to_end(&mut rest)
            .await
            .expect("control stream should end cleanly");
        assert!(rest.windows(message.len()).any(|window| window == message));

        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        task.await.expect("manager should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_reconnect_delay() {
        let (connector, _peers) = MemoryConnector::new();
        let connector = connector.fail_next_resolves(usize::MAX);
        let (manager, handle, mut events) =
            SessionManager::new(connector, SessionConfig::default());
        let task = tokio::spawn(manager.run());

        handle.setup(location()).expect("setup should be accepted");
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        handle.shutdown().expect("shutdown should be accepted");
        task.await.expect("manager should not panic");
    }
}
