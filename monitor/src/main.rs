use clap::Parser;
use client::ClientConfig;
use log::{error, info, warn};
use monitor::{BackoffConfig, MonitorConfig, Supervisor};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Watches a game server over RCON and prints one JSON status line per poll.
/// Lines typed on stdin are run as admin commands.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Game server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// RCON port
    #[arg(short, long, default_value = "27015")]
    port: u16,

    /// RCON password
    #[arg(short = 'P', long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: String,

    /// Seconds between status polls
    #[arg(short = 'i', long, default_value = "60")]
    interval: u64,

    /// Seconds before a liveness probe gives up
    #[arg(long, default_value = "3")]
    probe_timeout: u64,

    /// Port for the TCP liveness probe (defaults to the RCON port)
    #[arg(long)]
    probe_port: Option<u16>,

    /// Command whose response lines are counted as players
    #[arg(long)]
    players_command: Option<String>,

    /// Name reported in every snapshot
    #[arg(long, default_value = "Game Server")]
    server_name: String,

    /// Player capacity reported in every snapshot
    #[arg(long, default_value = "0")]
    max_players: u32,

    /// Seconds to wait for each admin command's response
    #[arg(short, long, default_value = "10")]
    timeout: u64,

    /// Upper bound on the reconnect delay, in seconds
    #[arg(long, default_value = "30")]
    max_backoff: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let client = ClientConfig {
        command_timeout: Duration::from_secs(args.timeout),
        ..ClientConfig::new(args.host, args.port, args.password)
    };
    let config = MonitorConfig {
        poll_interval: Duration::from_secs(args.interval),
        probe_timeout: Duration::from_secs(args.probe_timeout),
        probe_port: args.probe_port,
        players_command: args.players_command,
        server_name: args.server_name,
        max_players: args.max_players,
        reconnect: BackoffConfig {
            max_delay: Duration::from_secs(args.max_backoff),
            ..Default::default()
        },
        ..MonitorConfig::new(client)
    };

    let supervisor = Supervisor::start(config)?;

    // Print every snapshot as one JSON line
    let mut status = supervisor.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = status.recv().await {
            match serde_json::to_string(snapshot.as_ref()) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode snapshot: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let command = match line? {
                    Some(line) => line,
                    None => {
                        // Keep monitoring until Ctrl+C
                        stdin_open = false;
                        continue;
                    }
                };
                let command = command.trim();
                if command.is_empty() {
                    continue;
                }
                match supervisor.execute(command).await {
                    Ok(body) => eprintln!("{}", body),
                    Err(e) => warn!("{:?}: {}", e.kind(), e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    supervisor.shutdown().await;
    if let Err(e) = printer.await {
        error!("Snapshot printer panicked: {}", e);
    }

    Ok(())
}
