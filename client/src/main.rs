use clap::Parser;
use client::{ClientConfig, Gateway};
use log::{error, info};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run admin commands against a game server over RCON", long_about = None)]
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

    /// Seconds to wait for each command's response
    #[arg(short, long, default_value = "10")]
    timeout: u64,

    /// Command to run. Reads commands from stdin when omitted.
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig {
        command_timeout: Duration::from_secs(args.timeout),
        ..ClientConfig::new(args.host, args.port, args.password)
    };

    let gateway = Gateway::connect(&config).await?;
    info!("Connected to {}", config.address());

    if !args.command.is_empty() {
        let command = args.command.join(" ");
        let result = gateway.execute(&command).await;
        gateway.close().await;
        println!("{}", result?);
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "quit" || command == "exit" {
            break;
        }

        match gateway.execute(command).await {
            Ok(body) => println!("{}", body),
            Err(e) if e.is_fatal() => {
                error!("{:?}: {}", e.kind(), e);
                return Err(e.into());
            }
            Err(e) => eprintln!("{:?}: {}", e.kind(), e),
        }
    }

    gateway.close().await;
    Ok(())
}
