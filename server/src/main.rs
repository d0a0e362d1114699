use clap::Parser;
use log::{error, info};
use server::config::{tick_interval, GameConfig, RoomConfig, ServerConfig};
use server::network::{Server, ServerMessage};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative Pong activity server", long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Simulation rate of every room (updates per second)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,
    /// Maximum number of connected clients across all rooms
    #[arg(short, long, default_value = "64")]
    max_clients: usize,
    /// Seconds a dropped session keeps its seat
    #[arg(long, default_value = "5")]
    reconnect_grace: u64,
    /// Seconds of silence before a client counts as dropped
    #[arg(long, default_value = "10")]
    client_timeout: u64,
    /// Seconds a new room waits for its first participant
    #[arg(long, default_value = "20")]
    seat_reservation: u64,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_clients: self.max_clients,
            client_timeout: Duration::from_secs(self.client_timeout),
            room: RoomConfig {
                tick_interval: tick_interval(self.tick_rate),
                reconnect_grace: Duration::from_secs(self.reconnect_grace),
                seat_reservation: Duration::from_secs(self.seat_reservation),
                game: GameConfig::default(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut server = Server::new(&address, args.server_config()).await?;
    let control = server.control();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
        let _ = control.send(ServerMessage::Shutdown);
    });

    info!(
        "Starting server on {} at {} Hz (max {} clients)",
        address, args.tick_rate, args.max_clients
    );
    server.run().await
}
