//! Headless client that joins a room and plays by following the ball.

use bincode::{deserialize, serialize};
use clap::Parser;
use log::{debug, info, warn};
use serde_json::json;
use shared::messages::{PLAYER_POSITION, SPECTATOR_CUBE_POSITION, WELCOME_MESSAGE};
use shared::{CubePosition, Direction, Packet, Role, RoomState, SessionId, MAX_PACKET_SIZE};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;

/// Paddle stays put while the ball is this close vertically
const DEAD_BAND: f32 = 20.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless Pong bot", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Activity instance (room) to join
    #[arg(short = 'i', long, default_value = "local-instance")]
    instance_id: String,

    /// User id sent with the join options
    #[arg(short = 'u', long, default_value = "bot")]
    user_id: String,

    /// Display name
    #[arg(long)]
    username: Option<String>,

    /// Resume this session instead of joining
    #[arg(long)]
    resume: Option<SessionId>,

    /// Input rate (messages per second)
    #[arg(long, default_value = "30")]
    input_rate: u32,
}

struct Bot {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session_id: Option<SessionId>,
    state: Option<RoomState>,
    scores: BTreeMap<SessionId, u32>,
    frame: u32,
}

impl Bot {
    async fn send(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        kind: &str,
        payload: String,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.send(&Packet::Message {
            kind: kind.to_string(),
            payload,
        })
        .await
    }

    /// Returns false when the server turned us away.
    fn handle_packet(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Joined {
                room_id,
                session_id,
                role,
            } => {
                info!("Joined room {} as {:?} (session {})", room_id, role, session_id);
                self.session_id = Some(session_id);
            }
            Packet::Message { kind, payload } if kind == WELCOME_MESSAGE => {
                let text: String = serde_json::from_str(&payload).unwrap_or(payload);
                info!("Server says: {}", text);
            }
            Packet::Message { kind, .. } => debug!("Ignoring message {}", kind),
            Packet::State { state } => {
                if state.scoreboard != self.scores {
                    info!("Score: {:?}", state.scoreboard);
                    self.scores = state.scoreboard.clone();
                }
                self.state = Some(state);
            }
            Packet::Rejected { reason } => {
                warn!("Rejected by server: {}", reason);
                return false;
            }
            other => debug!("Unexpected packet {:?}", other),
        }
        true
    }

    async fn act(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let (Some(session_id), Some(state)) = (&self.session_id, &self.state) else {
            return Ok(());
        };
        let Some(role) = state.participants.get(session_id).map(|me| me.role) else {
            return Ok(());
        };
        let ball_y = state.ball.y;

        match role {
            Role::Player { y } => {
                let direction = if ball_y > y + DEAD_BAND {
                    Some(Direction::Up)
                } else if ball_y < y - DEAD_BAND {
                    Some(Direction::Down)
                } else {
                    None
                };
                if let Some(direction) = direction {
                    self.send_message(PLAYER_POSITION, direction.to_json()).await?;
                }
            }
            Role::Spectator { .. } => {
                self.frame = self.frame.wrapping_add(1);
                let angle = self.frame as f32 * 0.05;
                let position = CubePosition {
                    x: angle.cos() * 300.0,
                    y: angle.sin() * 300.0,
                };
                self.send_message(SPECTATOR_CUBE_POSITION, serde_json::to_string(&position)?)
                    .await?;
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let server_addr = args.server.parse::<SocketAddr>()?;
    info!("Bot socket bound to {}", socket.local_addr()?);

    let mut bot = Bot {
        socket,
        server_addr,
        session_id: args.resume.clone(),
        state: None,
        scores: BTreeMap::new(),
        frame: 0,
    };

    match &args.resume {
        Some(session_id) => {
            info!("Resuming session {} in {}", session_id, args.instance_id);
            bot.send(&Packet::Reconnect {
                room_id: args.instance_id.clone(),
                session_id: session_id.clone(),
            })
            .await?;
        }
        None => {
            let mut options = json!({
                "instanceId": args.instance_id,
                "userId": args.user_id,
            });
            if let Some(username) = &args.username {
                options["username"] = json!(username);
            }
            info!("Joining {} as {}", args.instance_id, args.user_id);
            bot.send(&Packet::JoinOrCreate {
                options: options.to_string(),
            })
            .await?;
        }
    }

    let mut buffer = vec![0u8; MAX_PACKET_SIZE];
    let mut heartbeat = interval(Duration::from_secs(1));
    let mut input = interval(Duration::from_secs_f64(1.0 / args.input_rate.max(1) as f64));

    loop {
        tokio::select! {
            received = bot.socket.recv_from(&mut buffer) => {
                let (len, _) = received?;
                match deserialize::<Packet>(&buffer[..len]) {
                    Ok(packet) => {
                        if !bot.handle_packet(packet) {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to deserialize packet: {}", e),
                }
            }
            _ = heartbeat.tick() => {
                bot.send(&Packet::Heartbeat).await?;
            }
            _ = input.tick() => {
                bot.act().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Leaving");
                bot.send(&Packet::Leave).await?;
                break;
            }
        }
    }

    Ok(())
}
