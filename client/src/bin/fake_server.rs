use clap::Parser;
use client::fake::FakeServer;
use log::info;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about = "Local fake RCON server for experiments", long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "27015")]
    port: u16,

    /// Password clients must authenticate with
    #[arg(short = 'P', long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: String,

    /// Canned response as COMMAND=BODY; `\n` in BODY becomes a newline
    #[arg(short, long = "respond")]
    responses: Vec<String>,

    /// Milliseconds to wait before answering each command
    #[arg(short, long, default_value = "0")]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let mut server = FakeServer::new(args.password).delay(Duration::from_millis(args.delay_ms));
    for entry in &args.responses {
        match entry.split_once('=') {
            Some((command, body)) => {
                server = server.respond(command, body.replace("\\n", "\n"));
            }
            None => return Err(format!("expected COMMAND=BODY, got {:?}", entry).into()),
        }
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    let handle = server.listen_on(listener)?;
    info!("Fake RCON server ready on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl+C, shutting down...");
    info!("Served {} connections", handle.connections());
    handle.stop();

    Ok(())
}
