//! Memory loopback demo.
//!
//! Runs the full client engine against an in-process server that opens a
//! control stream and one data stream, then prints what the client sees.
//!
//! Run: cargo run -p kairos --example memory-loopback

use std::time::Duration;

use kairos::session::{
    ControlMessage, SessionConfig, SessionEvent, SessionManager, CONTROL_SOURCE_ID,
};
use kairos::transport::memory::{MemoryConnector, MemoryPeer};
use kairos::transport::EndpointLocation;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SOURCE_ID: u32 = 0x0000_0001;
const FRAMES: usize = 5;

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

/// Play the server side of one session.
async fn serve(peer: MemoryPeer) -> std::io::Result<()> {
    let mut control = peer.open_bi().map_err(std::io::Error::other)?;
    control
        .write_all(&handshake(CONTROL_SOURCE_ID, 4, 1024))
        .await?;
    control.write_all(&frame(br#"{"type":"Hello"}"#)).await?;

    let mut data = peer.open_uni().map_err(std::io::Error::other)?;
    data.write_all(&handshake(SOURCE_ID, 2, 256)).await?;
    for n in 0..FRAMES {
        // Odd chunking on purpose: the client reassembles regardless.
        let bytes = frame(format!("event #{n}").as_bytes());
        let (head, tail) = bytes.split_at(3);
        data.write_all(head).await?;
        data.write_all(tail).await?;
    }

    // Answer control messages: pings get the keepalive ack, anything else an echo.
    loop {
        let mut prefix = [0u8; 4];
        control.read_exact(&mut prefix).await?;
        let mut body = vec![0u8; (u32::from_le_bytes(prefix) as usize).saturating_sub(4)];
        control.read_exact(&mut body).await?;
        let reply = match serde_json::from_slice::<ControlMessage>(&body) {
            Ok(message) if message.msg_type == "Ping" => frame(b"pong"),
            _ => frame(format!(r#"{{"type":"Echo","len":{}}}"#, body.len()).as_bytes()),
        };
        control.write_all(&reply).await?;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .init();

    let (connector, mut peers) = MemoryConnector::new();
    let (manager, handle, mut events) = SessionManager::new(connector, SessionConfig::default());
    let manager = tokio::spawn(manager.run());
    tokio::spawn(async move {
        while let Some(peer) = peers.recv().await {
            tokio::spawn(async move {
                if let Err(err) = serve(peer).await {
                    tracing::info!(error = %err, "server side finished");
                }
            });
        }
    });

    handle.setup(EndpointLocation::parse("http://localhost:3000/")?)?;

    let mut received = 0;
    let mut echoed = false;
    while received < FRAMES || !echoed {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await?
            .ok_or("session manager stopped")?;
        match event {
            SessionEvent::Status(status) => println!("status: {status}"),
            SessionEvent::Data(frame) => {
                println!(
                    "data   stream={} source={} {:?}",
                    frame.stream_id(),
                    frame.source_id(),
                    String::from_utf8_lossy(frame.payload())
                );
                handle.release(frame)?;
                received += 1;
            }
            SessionEvent::Control(frame) => {
                println!("control {:?}", String::from_utf8_lossy(frame.payload()));
                let message = ControlMessage::from_payload(frame.payload())?;
                handle.release(frame)?;
                match message.msg_type.as_str() {
                    // The greeting proves the control channel is up.
                    "Hello" => handle.send_json(&ControlMessage::new("Stop"))?,
                    "Echo" => echoed = true,
                    _ => {}
                }
            }
        }
    }

    handle.shutdown()?;
    while let Some(event) = events.recv().await {
        if let SessionEvent::Status(status) = event {
            println!("status: {status}");
        }
    }
    manager.await?;
    Ok(())
}
