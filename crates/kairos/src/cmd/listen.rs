use kairos_session::SessionEvent;
use tracing::{debug, info};

use crate::cmd::{Client, ListenArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, print_status, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = Client::start(&args.url)?;
    let mut printed = 0usize;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let event = tokio::select! {
            signal = &mut ctrl_c => {
                signal.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
                })?;
                info!("interrupted");
                break;
            }
            event = client.events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let frame = match event {
            SessionEvent::Status(status) => {
                print_status(status, format);
                continue;
            }
            SessionEvent::Control(frame) => {
                print_frame(&frame, format);
                let _ = client.handle.release(frame);
                continue;
            }
            SessionEvent::Data(frame) => frame,
        };

        let wanted = args
            .sources
            .as_ref()
            .is_none_or(|sources| sources.contains(&frame.source_id()));
        if wanted {
            print_frame(&frame, format);
            printed = printed.saturating_add(1);
        } else {
            debug!(source_id = frame.source_id(), "filtered frame");
        }
        // Return the buffer right away so the stream never stalls on us.
        let _ = client.handle.release(frame);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    client.stop().await;
    Ok(SUCCESS)
}
