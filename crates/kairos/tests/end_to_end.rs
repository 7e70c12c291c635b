use std::time::Duration;

use kairos::frame::Frame;
use kairos::session::{
    ConnectionStatus, ControlMessage, EventReceiver, SessionConfig, SessionEvent, SessionHandle,
    SessionManager, CONTROL_SOURCE_ID,
};
use kairos::transport::memory::{MemoryConnector, MemoryPeer};
use kairos::transport::EndpointLocation;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Client {
    handle: SessionHandle,
    events: EventReceiver,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    task: JoinHandle<()>,
}

impl Client {
    async fn connect() -> (Self, MemoryPeer) {
        let (connector, peers) = MemoryConnector::new();
        let (manager, handle, events) = SessionManager::new(connector, SessionConfig::default());
        let task = tokio::spawn(manager.run());
        handle
            .setup(EndpointLocation::parse("http://localhost:3000/").expect("location should parse"))
            .expect("setup should be accepted");

        let mut client = Self {
            handle,
            events,
            peers,
            task,
        };
        assert_eq!(client.next_status().await, ConnectionStatus::Connecting);
        let peer = client.next_peer().await;
        (client, peer)
    }

    async fn next_peer(&mut self) -> MemoryPeer {
        assert_eq!(self.next_status().await, ConnectionStatus::Connected);
        self.peers.recv().await.expect("a session should open")
    }

    async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("an event should arrive")
            .expect("manager should be running")
    }

    async fn next_status(&mut self) -> ConnectionStatus {
        match self.next_event().await {
            SessionEvent::Status(status) => status,
            other => panic!("expected a status event, got {other:?}"),
        }
    }

    async fn next_data(&mut self) -> Frame {
        match self.next_event().await {
            SessionEvent::Data(frame) => frame,
            other => panic!("expected a data frame, got {other:?}"),
        }
    }

    async fn next_control(&mut self) -> Frame {
        match self.next_event().await {
            SessionEvent::Control(frame) => frame,
            other => panic!("expected a control frame, got {other:?}"),
        }
    }

    async fn shutdown(mut self) {
        self.handle.shutdown().expect("shutdown should be accepted");
        assert_eq!(self.next_status().await, ConnectionStatus::Disconnected);
        self.task.await.expect("manager should not panic");
    }
}

fn handshake(source_id: u32, buffers: u32, max_frame_length: u32) -> Vec<u8> {
    [source_id, buffers, max_frame_length]
        .iter()
        .flat_map(|field| field.to_le_bytes())
        .collect()
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = ((payload.len() + 4) as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

async fn open_data_stream(peer: &MemoryPeer, source_id: u32, buffers: u32) -> DuplexStream {
    let mut stream = peer.open_uni().expect("peer should open a stream");
    stream
        .write_all(&handshake(source_id, buffers, 4096))
        .await
        .expect("handshake should be written");
    stream
}

async fn open_control_stream(peer: &MemoryPeer) -> DuplexStream {
    let mut stream = peer.open_bi().expect("peer should open a stream");
    stream
        .write_all(&handshake(CONTROL_SOURCE_ID, 4, 4096))
        .await
        .expect("handshake should be written");
    stream
}

async fn read_frame(stream: &mut DuplexStream) -> Vec<u8> {
    let mut prefix = [0u8; 4];
    stream
        .read_exact(&mut prefix)
        .await
        .expect("prefix should arrive");
    let mut bytes = prefix.to_vec();
    bytes.resize(u32::from_le_bytes(prefix) as usize, 0);
    stream
        .read_exact(&mut bytes[4..])
        .await
        .expect("payload should arrive");
    bytes
}

fn ping() -> Vec<u8> {
    frame(br#"{"type":"Ping"}"#)
}

#[tokio::test]
async fn split_frame_is_delivered_once() {
    let (mut client, peer) = Client::connect().await;

    let mut stream = peer.open_uni().expect("peer should open a stream");
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00])
        .await
        .expect("handshake should be written");
    let wire = [0x0C, 0x00, 0x00, 0x00, 1, 2, 3, 4, 5, 6, 7, 8];
    stream
        .write_all(&wire[..6])
        .await
        .expect("first half should be written");
    tokio::task::yield_now().await;
    stream
        .write_all(&wire[6..])
        .await
        .expect("second half should be written");

    let frame = client.next_data().await;
    assert_eq!(frame.stream_id(), 0);
    assert_eq!(frame.source_id(), 5);
    assert_eq!(frame.as_bytes(), &wire[..]);
    assert_eq!(frame.payload(), &[1u8, 2, 3, 4, 5, 6, 7, 8]);
    client.handle.release(frame).expect("release should be accepted");

    assert!(client.events.try_recv().is_err());
    client.shutdown().await;
    assert!(peer.is_closed());
}

#[tokio::test]
async fn streams_are_demultiplexed_by_source() {
    let (mut client, peer) = Client::connect().await;

    let mut first = open_data_stream(&peer, 1, 4).await;
    let mut second = open_data_stream(&peer, 2, 4).await;
    first.write_all(&frame(b"one")).await.expect("write should succeed");
    second.write_all(&frame(b"two")).await.expect("write should succeed");

    let mut seen = Vec::new();
    for _ in 0..2 {
        let frame = client.next_data().await;
        seen.push((frame.source_id(), frame.payload().to_vec()));
        client.handle.release(frame).expect("release should be accepted");
    }
    seen.sort();
    assert_eq!(seen, vec![(1, b"one".to_vec()), (2, b"two".to_vec())]);

    client.shutdown().await;
}

#[tokio::test]
async fn keepalive_acks_are_not_forwarded() {
    let (mut client, peer) = Client::connect().await;
    let mut control = open_control_stream(&peer).await;

    assert_eq!(read_frame(&mut control).await, ping());
    control
        .write_all(&[0x08, 0x00, 0x00, 0x00, 0x70, 0x6F, 0x6E, 0x67])
        .await
        .expect("ack should be written");
    let status = frame(br#"{"type":"Status","running":true}"#);
    control.write_all(&status).await.expect("status should be written");

    let frame = client.next_control().await;
    assert_eq!(frame.source_id(), CONTROL_SOURCE_ID);
    assert_eq!(frame.as_bytes(), &status[..]);
    let message = ControlMessage::from_payload(frame.payload()).expect("payload should parse");
    assert_eq!(message.msg_type, "Status");
    client.handle.release(frame).expect("release should be accepted");

    client.shutdown().await;
}

#[tokio::test]
async fn outbound_messages_reach_the_control_stream() {
    let (client, peer) = Client::connect().await;
    let mut control = open_control_stream(&peer).await;

    // The first ping proves the control channel is registered.
    assert_eq!(read_frame(&mut control).await, ping());
    client
        .handle
        .send_json(&ControlMessage::new("Start").with_field("rate", 100.into()))
        .expect("message should be accepted");
    client
        .handle
        .send_control(frame(b"raw"))
        .expect("framed bytes should be accepted");

    let mut received = Vec::new();
    while received.len() < 2 {
        let bytes = read_frame(&mut control).await;
        if bytes != ping() {
            received.push(bytes);
        }
    }
    assert_eq!(received[0], frame(br#"{"type":"Start","rate":100}"#));
    assert_eq!(received[1], frame(b"raw"));

    client.shutdown().await;
}

#[tokio::test]
async fn exhausted_pool_blocks_until_release() {
    let (mut client, peer) = Client::connect().await;
    let mut stream = open_data_stream(&peer, 7, 1).await;
    for payload in [b"a", b"b", b"c"] {
        stream.write_all(&frame(payload)).await.expect("write should succeed");
    }

    let first = client.next_data().await;
    assert_eq!(first.payload(), b"a");
    let stalled = tokio::time::timeout(Duration::from_millis(100), client.events.recv()).await;
    assert!(stalled.is_err(), "no frame without a free buffer");

    client.handle.release(first).expect("release should be accepted");
    let second = client.next_data().await;
    assert_eq!(second.payload(), b"b");
    client.handle.release(second).expect("release should be accepted");
    let third = client.next_data().await;
    assert_eq!(third.payload(), b"c");
    client.handle.release(third).expect("release should be accepted");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_source_forces_a_clean_reconnect() {
    let (mut client, first_peer) = Client::connect().await;

    let _kept = open_data_stream(&first_peer, 5, 4).await;
    let _duplicate = open_data_stream(&first_peer, 5, 4).await;
    assert_eq!(client.next_status().await, ConnectionStatus::Disconnected);
    assert!(first_peer.is_closed());

    // Nothing survives the teardown: the same source is accepted again and
    // stream ids start over.
    let second_peer = client.next_peer().await;
    let mut stream = open_data_stream(&second_peer, 5, 4).await;
    stream.write_all(&frame(b"again")).await.expect("write should succeed");
    let frame = client.next_data().await;
    assert_eq!(frame.stream_id(), 0);
    assert_eq!(frame.source_id(), 5);
    assert_eq!(frame.payload(), b"again");
    client.handle.release(frame).expect("release should be accepted");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn data_source_on_bidirectional_stream_is_fatal() {
    let (mut client, peer) = Client::connect().await;

    let mut stream = peer.open_bi().expect("peer should open a stream");
    stream
        .write_all(&handshake(9, 4, 4096))
        .await
        .expect("handshake should be written");
    assert_eq!(client.next_status().await, ConnectionStatus::Disconnected);

    let _next = client.next_peer().await;
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn message_sent_just_before_shutdown_is_written() {
    let (mut client, peer) = Client::connect().await;
    let mut control = open_control_stream(&peer).await;
    assert_eq!(read_frame(&mut control).await, ping());

    client
        .handle
        .send_json(&ControlMessage::new("Stop"))
        .expect("message should be accepted");
    client.handle.shutdown().expect("shutdown should be accepted");

    let mut written = Vec::new();
    control
        .read_to_end(&mut written)
        .await
        .expect("control stream should end cleanly");
    let stop = frame(br#"{"type":"Stop"}"#);
    assert!(written.windows(stop.len()).any(|window| window == stop));

    assert_eq!(client.next_status().await, ConnectionStatus::Disconnected);
    client.task.await.expect("manager should not panic");
}

#[tokio::test(start_paused = true)]
async fn framing_violation_on_data_stream_reconnects() {
    let (mut client, first_peer) = Client::connect().await;

    let mut stream = open_data_stream(&first_peer, 3, 4).await;
    stream
        .write_all(&[0x02, 0x00, 0x00, 0x00])
        .await
        .expect("write should succeed");
    assert_eq!(client.next_status().await, ConnectionStatus::Disconnected);
    assert!(first_peer.is_closed());

    let _second = client.next_peer().await;
    client.shutdown().await;
}
