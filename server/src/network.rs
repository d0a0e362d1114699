//! Server network layer: UDP packets in, room commands out, room events back to clients

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::registry::RoomRegistry;
use crate::room::{parse_instance_id, spawn_room, Room, RoomCommand, RoomEvent, RoomHandle};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::{Packet, SessionId, MAX_PACKET_SIZE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        session_id: SessionId,
        room_id: Option<String>,
    },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet, room_id: String },
}

/// Front end owning the socket, the client table and one task per room
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    registry: RoomRegistry,
    rooms: HashMap<String, RoomHandle>,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
    room_tx: mpsc::UnboundedSender<RoomEvent>,
    room_rx: mpsc::UnboundedReceiver<RoomEvent>,
}

impl Server {
    pub async fn new(addr: &str, config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (room_tx, room_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            registry: RoomRegistry::new(),
            rooms: HashMap::new(),
            config,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
            room_tx,
            room_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn registry(&self) -> RoomRegistry {
        self.registry.clone()
    }

    /// Sender that can stop [`Server::run`] with [`ServerMessage::Shutdown`].
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, room_id } => {
                        let recipients = {
                            let clients_guard = clients.read().await;
                            clients_guard.addrs_in_room(&room_id)
                        };
                        if recipients.is_empty() {
                            continue;
                        }

                        let data = match serialize(&packet) {
                            Ok(data) => data,
                            Err(e) => {
                                error!("Failed to serialize broadcast for room {}: {}", room_id, e);
                                continue;
                            }
                        };
                        for (session_id, addr) in recipients {
                            if let Err(e) = socket.send_to(&data, addr).await {
                                error!("Failed to send to client {}: {}", session_id, e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) -> JoinHandle<()> {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMEOUT_CHECK_INTERVAL);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client in timed_out {
                    let message = ServerMessage::ClientTimeout {
                        session_id: client.session_id,
                        room_id: client.room_id,
                    };
                    if let Err(e) = server_tx.send(message) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        })
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn reject(&self, addr: SocketAddr, reason: &str) {
        warn!("Rejecting client at {}: {}", addr, reason);
        self.send_packet(
            Packet::Rejected {
                reason: reason.to_string(),
            },
            addr,
        );
    }

    fn send_to_room(&self, room_id: &str, command: RoomCommand) -> bool {
        match self.rooms.get(room_id) {
            Some(handle) => {
                if !handle.send(command) {
                    warn!("Room {} is no longer running", room_id);
                    return false;
                }
                true
            }
            None => {
                debug!("No room {} for {:?}", room_id, command);
                false
            }
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::JoinOrCreate { options } => self.handle_join(&options, addr).await,

            Packet::Reconnect {
                room_id,
                session_id,
            } => self.handle_reconnect(room_id, session_id, addr).await,

            Packet::Message { kind, payload } => {
                let target = {
                    let mut clients = self.clients.write().await;
                    clients
                        .touch(addr)
                        .map(|client| (client.session_id.clone(), client.room_id.clone()))
                };

                match target {
                    Some((session_id, Some(room_id))) => {
                        self.send_to_room(
                            &room_id,
                            RoomCommand::Message {
                                session_id,
                                kind,
                                payload,
                            },
                        );
                    }
                    Some((session_id, None)) => {
                        debug!("Message {} from {} outside any room", kind, session_id)
                    }
                    None => warn!("Message from unknown client at {}", addr),
                }
            }

            Packet::Leave => {
                let client = {
                    let mut clients = self.clients.write().await;
                    let session_id = clients
                        .find_by_addr(addr)
                        .map(|client| client.session_id.clone());
                    session_id.and_then(|id| clients.remove_client(&id))
                };

                if let Some(client) = client {
                    if let Some(room_id) = client.room_id {
                        self.send_to_room(
                            &room_id,
                            RoomCommand::Leave {
                                session_id: client.session_id,
                                consented: true,
                            },
                        );
                    }
                }
            }

            Packet::Heartbeat => {
                let mut clients = self.clients.write().await;
                if clients.touch(addr).is_none() {
                    debug!("Heartbeat from unknown client at {}", addr);
                }
            }

            Packet::Joined { .. } | Packet::State { .. } | Packet::Rejected { .. } => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_join(&mut self, options: &str, addr: SocketAddr) {
        let options: Value = match serde_json::from_str(options) {
            Ok(options) => options,
            Err(e) => {
                self.reject(addr, &format!("Malformed join options: {}", e));
                return;
            }
        };
        let room_id = match parse_instance_id(&options) {
            Ok(room_id) => room_id,
            Err(e) => {
                self.reject(addr, &e.to_string());
                return;
            }
        };

        // Joining again from the same address leaves the previous room first
        let previous = {
            let mut clients = self.clients.write().await;
            let session_id = clients
                .find_by_addr(addr)
                .map(|client| client.session_id.clone());
            session_id.and_then(|id| clients.remove_client(&id))
        };
        if let Some(previous) = previous {
            if let Some(previous_room) = previous.room_id {
                info!(
                    "Client {} rejoining from {}, leaving room {}",
                    previous.session_id, addr, previous_room
                );
                self.send_to_room(
                    &previous_room,
                    RoomCommand::Leave {
                        session_id: previous.session_id,
                        consented: true,
                    },
                );
            }
        }

        let session_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };
        let Some(session_id) = session_id else {
            self.reject(addr, "Server full");
            return;
        };

        if !self.ensure_room(&room_id, &options, addr) {
            self.clients.write().await.remove_client(&session_id);
            return;
        }

        self.clients
            .write()
            .await
            .set_room(&session_id, Some(room_id.clone()));
        let joined = self.send_to_room(
            &room_id,
            RoomCommand::Join {
                session_id: session_id.clone(),
                options,
            },
        );
        if !joined {
            self.clients.write().await.remove_client(&session_id);
            self.reject(addr, "Room is closing, try again");
        }
    }

    /// Makes sure a running room exists for `room_id`, creating it from the
    /// join options if needed.
    fn ensure_room(&mut self, room_id: &str, options: &Value, addr: SocketAddr) -> bool {
        if self
            .rooms
            .get(room_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            return true;
        }
        self.rooms.remove(room_id);

        match Room::create(
            options,
            self.config.room.clone(),
            self.registry.clone(),
            self.room_tx.clone(),
        ) {
            Ok(room) => {
                self.rooms.insert(room_id.to_string(), spawn_room(room));
                true
            }
            Err(e) => {
                self.reject(addr, &e.to_string());
                false
            }
        }
    }

    async fn handle_reconnect(&mut self, room_id: String, session_id: SessionId, addr: SocketAddr) {
        if !self.rooms.contains_key(&room_id) {
            self.reject(addr, &format!("Room {} not found", room_id));
            return;
        }

        let attached = {
            let mut clients = self.clients.write().await;
            clients.attach(&session_id, addr, &room_id)
        };
        if !attached {
            self.reject(addr, "Session cannot be resumed from this address");
            return;
        }

        if !self.send_to_room(&room_id, RoomCommand::Reconnect { session_id: session_id.clone() }) {
            self.clients.write().await.remove_client(&session_id);
            self.reject(addr, &format!("Room {} not found", room_id));
        }
    }

    /// Delivers what rooms produce
    async fn handle_room_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Send { session_id, packet } => {
                let addr = self.clients.read().await.addr_of(&session_id);
                match addr {
                    Some(addr) => self.send_packet(packet, addr),
                    None => debug!("Dropping packet for detached session {}", session_id),
                }
            }
            RoomEvent::Broadcast { room_id, packet } => {
                if let Err(e) = self
                    .game_tx
                    .send(GameMessage::BroadcastPacket { packet, room_id })
                {
                    error!("Failed to queue broadcast packet: {}", e);
                }
            }
            RoomEvent::Kick { session_id, reason } => {
                let client = self.clients.write().await.remove_client(&session_id);
                if let Some(client) = client {
                    self.reject(client.addr, &reason);
                }
            }
            RoomEvent::Disposed { room_id } => {
                // A room created later under the same id is registered again
                if !self.registry.contains(&room_id) {
                    self.rooms.remove(&room_id);
                    self.clients.write().await.clear_room(&room_id);
                }
            }
        }
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let tasks = [
            self.spawn_network_receiver(),
            self.spawn_network_sender(),
            self.spawn_timeout_checker(),
        ];

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        }
                        Some(ServerMessage::ClientTimeout { session_id, room_id }) => {
                            info!("Client {} timed out", session_id);
                            if let Some(room_id) = room_id {
                                self.send_to_room(
                                    &room_id,
                                    RoomCommand::Leave { session_id, consented: false },
                                );
                            }
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                }

                Some(event) = self.room_rx.recv() => {
                    self.handle_room_event(event).await;
                }
            }
        }

        for (_, handle) in self.rooms.drain() {
            handle.shutdown().await;
        }
        for task in tasks {
            task.abort();
        }

        Ok(())
    }
}
