use std::fs;

use bytes::{Bytes, BytesMut};
use kairos_frame::encode_frame;
use kairos_session::{frame_json, ConnectionStatus, EventReceiver, SessionEvent};
use tracing::debug;

use crate::cmd::{parse_duration, Client, SendArgs};
use crate::exit::{frame_error, session_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_frame, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let settle = parse_duration(&args.settle)?;
    let timeout = parse_duration(&args.timeout)?;
    let message = resolve_message(&args)?;

    let mut client = Client::start(&args.url)?;
    let outcome = tokio::time::timeout(timeout, async {
        wait_for_connected(&mut client.events).await?;
        tokio::time::sleep(settle).await;
        client
            .handle
            .send_control(message)
            .map_err(|err| session_error("send failed", err))?;
        if !args.wait {
            return Ok(SUCCESS);
        }
        loop {
            match client.events.recv().await {
                Some(SessionEvent::Control(frame)) => {
                    print_frame(&frame, format);
                    let _ = client.handle.release(frame);
                    return Ok(SUCCESS);
                }
                Some(SessionEvent::Data(frame)) => {
                    let _ = client.handle.release(frame);
                }
                Some(SessionEvent::Status(status)) => debug!(%status, "status while waiting"),
                None => return Err(CliError::new(FAILURE, "session ended before a reply")),
            }
        }
    })
    .await;

    client.stop().await;
    match outcome {
        Ok(result) => result,
        Err(_) => Err(CliError::new(
            TIMEOUT,
            format!("no result within {}", args.timeout),
        )),
    }
}

async fn wait_for_connected(events: &mut EventReceiver) -> CliResult<()> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Status(ConnectionStatus::Connected) => return Ok(()),
            SessionEvent::Status(status) => debug!(%status, "waiting for connection"),
            // Nothing is released before the session is up.
            _ => {}
        }
    }
    Err(CliError::new(FAILURE, "session ended before connecting"))
}

/// Build the framed control message from the payload flags.
fn resolve_message(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        let value = serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return frame_json(&value).map_err(|err| session_error("invalid message", err));
    }
    let payload = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path).map_err(|err| {
            CliError::new(FAILURE, format!("failed reading {}: {err}", path.display()))
        })?
    } else {
        return Err(CliError::new(USAGE, "one of --json, --data or --file is required"));
    };
    let mut framed = BytesMut::new();
    encode_frame(&payload, &mut framed).map_err(|err| frame_error("invalid message", err))?;
    Ok(framed.freeze())
}
