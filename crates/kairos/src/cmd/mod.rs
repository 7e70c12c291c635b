use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use kairos_session::{EventReceiver, SessionConfig, SessionHandle, SessionManager};
use kairos_transport::{EndpointLocation, WebTransportConnector};
use tokio::task::JoinHandle;

use crate::exit::{session_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and print every received frame.
    Listen(ListenArgs),
    /// Send one control message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Server location (e.g. http://localhost:3000/).
    pub url: String,
    /// Only print frames from these source ids (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub sources: Option<Vec<u32>>,
    /// Exit after printing N data frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server location (e.g. http://localhost:3000/).
    pub url: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one control reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Delay between connecting and sending, giving the server time to
    /// open its control stream (e.g. 200ms).
    #[arg(long, default_value = "200ms")]
    pub settle: String,
    /// Give up if nothing completes within this time (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A running session manager driven by a command.
pub struct Client {
    pub handle: SessionHandle,
    pub events: EventReceiver,
    task: JoinHandle<()>,
}

impl Client {
    pub fn start(url: &str) -> CliResult<Self> {
        let location =
            EndpointLocation::parse(url).map_err(|err| transport_error("invalid url", err))?;
        let connector =
            WebTransportConnector::new().map_err(|err| transport_error("client setup", err))?;
        let (manager, handle, events) = SessionManager::new(connector, SessionConfig::default());
        let task = tokio::spawn(manager.run());
        handle
            .setup(location)
            .map_err(|err| session_error("setup failed", err))?;
        Ok(Self {
            handle,
            events,
            task,
        })
    }

    /// Disconnect and wait for the manager to stop.
    pub async fn stop(self) {
        let _ = self.handle.shutdown();
        drop(self.events);
        let _ = self.task.await;
    }
}

/// Parse `500ms`, `5s`, `1m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let invalid = || {
        CliError::new(
            USAGE,
            format!("invalid duration {input:?} (expected e.g. 500ms, 5s, 1m)"),
        )
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Err(invalid()),
    }
}
