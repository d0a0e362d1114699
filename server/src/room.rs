//! Room lifecycle and message routing.
//!
//! A [`Room`] is one match: its replicated state, its game engine and the
//! sessions attached to it. All of its methods are synchronous; [`spawn_room`]
//! runs a room as a single tokio task that drains its command queue and its
//! fixed-step ticker one event at a time, so nothing inside a room needs a
//! lock.

use crate::config::RoomConfig;
use crate::engine::GameEngine;
use crate::registry::RoomRegistry;
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::messages::{PLAYER_POSITION, SPECTATOR_CUBE_POSITION, WELCOME_MESSAGE, WELCOME_TEXT};
use shared::{
    CubePosition, Direction, Packet, Participant, Role, RoleKind, RoomState, SessionId,
    MAX_NAME_LEN,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

const MAX_INSTANCE_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    InvalidInstanceId,
    RoomExists(String),
    MissingUserId,
    NameTooLong,
    AlreadyJoined(SessionId),
    UnknownSession(SessionId),
    Disposed,
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomError::InvalidInstanceId => write!(f, "instanceId must be a well-formed string"),
            RoomError::RoomExists(id) => write!(f, "room {} already exists", id),
            RoomError::MissingUserId => write!(f, "userId must be a string"),
            RoomError::NameTooLong => {
                write!(f, "userId and username must be at most {} bytes", MAX_NAME_LEN)
            }
            RoomError::AlreadyJoined(id) => write!(f, "session {} already joined", id),
            RoomError::UnknownSession(id) => write!(f, "unknown session {}", id),
            RoomError::Disposed => write!(f, "room is disposed"),
        }
    }
}

impl std::error::Error for RoomError {}

/// Reads and validates `instanceId` from room creation options.
pub fn parse_instance_id(options: &Value) -> Result<String, RoomError> {
    let id = options
        .get("instanceId")
        .and_then(Value::as_str)
        .ok_or(RoomError::InvalidInstanceId)?;

    let well_formed = !id.is_empty()
        && id.len() <= MAX_INSTANCE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if well_formed {
        Ok(id.to_string())
    } else {
        Err(RoomError::InvalidInstanceId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    pub user_id: String,
    pub username: Option<String>,
}

impl JoinOptions {
    pub fn parse(options: &Value) -> Result<Self, RoomError> {
        let user_id = options
            .get("userId")
            .and_then(Value::as_str)
            .ok_or(RoomError::MissingUserId)?;
        let username = options
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_string);
        let too_long = |name: &str| name.len() > MAX_NAME_LEN;
        if too_long(user_id) || username.as_deref().is_some_and(too_long) {
            return Err(RoomError::NameTooLong);
        }
        Ok(Self {
            user_id: user_id.to_string(),
            username,
        })
    }
}

/// Outbound traffic produced by rooms, consumed by the network layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Send {
        session_id: SessionId,
        packet: Packet,
    },
    Broadcast {
        room_id: String,
        packet: Packet,
    },
    /// Reject a client and detach it from the room.
    Kick {
        session_id: SessionId,
        reason: String,
    },
    Disposed {
        room_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Removed,
    /// The session keeps its seat until reconnection or until the grace
    /// timer carrying `token` fires.
    AwaitingReconnect { token: u64 },
    Unknown,
}

#[derive(Debug)]
struct SessionEntry {
    /// Token of the pending grace timer while disconnected.
    reconnect_token: Option<u64>,
}

pub struct Room {
    id: String,
    config: RoomConfig,
    engine: GameEngine,
    sessions: BTreeMap<SessionId, SessionEntry>,
    registry: RoomRegistry,
    outbox: mpsc::UnboundedSender<RoomEvent>,
    last_replicated: Option<RoomState>,
    next_token: u64,
    disposed: bool,
}

impl Room {
    /// Validates the creation options and registers the room. Nothing is
    /// registered when this fails.
    pub fn create(
        options: &Value,
        config: RoomConfig,
        registry: RoomRegistry,
        outbox: mpsc::UnboundedSender<RoomEvent>,
    ) -> Result<Self, RoomError> {
        let id = parse_instance_id(options)?;
        if !registry.register(&id) {
            return Err(RoomError::RoomExists(id));
        }

        let engine = GameEngine::new(config.game.clone(), RoomState::new());
        info!("Room with instance id {} created", id);

        Ok(Self {
            id,
            config,
            engine,
            sessions: BTreeMap::new(),
            registry,
            outbox,
            last_replicated: None,
            next_token: 0,
            disposed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn engine(&self) -> &GameEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut GameEngine {
        &mut self.engine
    }

    pub fn state(&self) -> &RoomState {
        self.engine.state()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_awaiting_reconnect(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|entry| entry.reconnect_token.is_some())
    }

    fn emit(&self, event: RoomEvent) {
        if let Err(e) = self.outbox.send(event) {
            error!("Room {} failed to queue outbound event: {}", self.id, e);
        }
    }

    /// Seats a new session: the first free player slot, otherwise spectator.
    pub fn on_join(&mut self, session_id: &str, options: &Value) -> Result<RoleKind, RoomError> {
        if self.disposed {
            return Err(RoomError::Disposed);
        }
        let options = JoinOptions::parse(options)?;
        if self.sessions.contains_key(session_id) {
            return Err(RoomError::AlreadyJoined(session_id.to_string()));
        }

        let role = match self.engine.slots().first_free() {
            Some(slot) if self.engine.add_player(session_id, slot) => {
                if let Some(participant) = self.engine.state_mut().participants.get_mut(session_id)
                {
                    participant.user_id = options.user_id.clone();
                    participant.connected = true;
                }
                if self.engine.slots().first_free().is_none() {
                    self.engine.spawn_ball();
                }
                slot.role_kind()
            }
            _ => {
                self.engine.state_mut().participants.insert(
                    session_id.to_string(),
                    Participant::spectator(options.user_id.clone()),
                );
                RoleKind::Spectator
            }
        };

        if let Some(username) = options.username {
            self.engine
                .state_mut()
                .usernames
                .insert(session_id.to_string(), username);
        }
        self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                reconnect_token: None,
            },
        );

        info!(
            "User {} joined room {} as {:?} (session {})",
            options.user_id, self.id, role, session_id
        );

        self.emit(RoomEvent::Send {
            session_id: session_id.to_string(),
            packet: Packet::Joined {
                room_id: self.id.clone(),
                session_id: session_id.to_string(),
                role,
            },
        });
        self.emit(RoomEvent::Send {
            session_id: session_id.to_string(),
            packet: Packet::Message {
                kind: WELCOME_MESSAGE.to_string(),
                payload: Value::from(WELCOME_TEXT).to_string(),
            },
        });

        Ok(role)
    }

    /// Handles a departure. Consented leaves are removed at once; anything
    /// else keeps the seat and waits for a reconnect.
    pub fn on_leave(&mut self, session_id: &str, consented: bool) -> LeaveOutcome {
        let Some(pending) = self
            .sessions
            .get(session_id)
            .map(|entry| entry.reconnect_token)
        else {
            return LeaveOutcome::Unknown;
        };

        if let Some(participant) = self.engine.state_mut().participants.get_mut(session_id) {
            participant.connected = false;
        }

        if consented {
            self.remove_session(session_id);
            info!("Client {} left room {}", session_id, self.id);
            return LeaveOutcome::Removed;
        }

        if let Some(token) = pending {
            return LeaveOutcome::AwaitingReconnect { token };
        }

        let token = self.next_token;
        self.next_token += 1;
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.reconnect_token = Some(token);
        }
        info!(
            "Client {} dropped from room {}, holding seat for {:?}",
            session_id, self.id, self.config.reconnect_grace
        );
        LeaveOutcome::AwaitingReconnect { token }
    }

    /// Restores a session that is inside its grace window. Resuming a session
    /// that never dropped is a no-op.
    pub fn on_reconnect(&mut self, session_id: &str) -> Result<(), RoomError> {
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RoomError::UnknownSession(session_id.to_string()))?;
        if entry.reconnect_token.take().is_none() {
            debug!("Session {} resumed without dropping", session_id);
            return Ok(());
        }

        if let Some(participant) = self.engine.state_mut().participants.get_mut(session_id) {
            participant.connected = true;
        }
        info!("Client {} reconnected to room {}", session_id, self.id);
        Ok(())
    }

    /// Called when a grace timer fires. Stale tokens (the session already
    /// reconnected, or dropped again later) are ignored.
    pub fn expire_reconnection(&mut self, session_id: &str, token: u64) -> bool {
        let current = self
            .sessions
            .get(session_id)
            .and_then(|entry| entry.reconnect_token);
        if current != Some(token) {
            debug!("Ignoring stale reconnection timer for {}", session_id);
            return false;
        }

        self.remove_session(session_id);
        info!(
            "Client {} did not reconnect to room {} in time",
            session_id, self.id
        );
        true
    }

    fn remove_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        if !self.engine.remove_player(session_id) {
            self.engine.state_mut().participants.remove(session_id);
        }
        self.engine.state_mut().usernames.remove(session_id);
    }

    /// Routes a client message. Malformed payloads and messages that do not
    /// fit the sender's role are dropped.
    pub fn on_message(&mut self, session_id: &str, kind: &str, payload: &str) {
        if !self.sessions.contains_key(session_id) {
            warn!("Message {} from unknown session {}", kind, session_id);
            return;
        }

        match kind {
            PLAYER_POSITION => match Direction::from_json(payload) {
                Some(direction) => {
                    if !self.engine.process_input(session_id, direction) {
                        debug!("Session {} sent {} without a paddle", session_id, kind);
                    }
                }
                None => warn!("Dropping invalid {} payload from {}", kind, session_id),
            },
            SPECTATOR_CUBE_POSITION => {
                let Some(position) = CubePosition::from_json(payload) else {
                    warn!("Dropping invalid {} payload from {}", kind, session_id);
                    return;
                };
                let participant = self.engine.state_mut().participants.get_mut(session_id);
                match participant.map(|p| &mut p.role) {
                    Some(Role::Spectator { x, y }) => {
                        *x = position.x;
                        *y = position.y;
                    }
                    _ => debug!("Session {} sent {} but is not a spectator", session_id, kind),
                }
            }
            _ => warn!("Unknown message {} from {}", kind, session_id),
        }
    }

    pub fn tick(&mut self, dt: f32) {
        self.engine.tick(dt);
    }

    /// Pushes the state to the room's clients if it changed since the last push.
    pub fn replicate(&mut self) {
        if self.disposed || self.last_replicated.as_ref() == Some(self.engine.state()) {
            return;
        }
        let state = self.engine.state().clone();
        self.emit(RoomEvent::Broadcast {
            room_id: self.id.clone(),
            packet: Packet::State {
                state: state.clone(),
            },
        });
        self.last_replicated = Some(state);
    }

    /// Rejects a client with the given error.
    pub fn reject(&self, session_id: &str, err: &RoomError) {
        warn!("Rejecting {} from room {}: {}", session_id, self.id, err);
        self.emit(RoomEvent::Kick {
            session_id: session_id.to_string(),
            reason: err.to_string(),
        });
    }

    /// Unregisters the room. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.registry.unregister(&self.id);
        info!("Room with instance id {} disposed", self.id);
        self.emit(RoomEvent::Disposed {
            room_id: self.id.clone(),
        });
    }
}

/// Work queued for a running room.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        session_id: SessionId,
        options: Value,
    },
    Leave {
        session_id: SessionId,
        consented: bool,
    },
    Reconnect {
        session_id: SessionId,
    },
    Message {
        session_id: SessionId,
        kind: String,
        payload: String,
    },
    ReconnectExpired {
        session_id: SessionId,
        token: u64,
    },
    Shutdown,
}

/// Sending side of a running room's queue.
#[derive(Debug)]
pub struct RoomHandle {
    id: String,
    sender: mpsc::UnboundedSender<RoomCommand>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queues a command. Returns false if the room has already shut down.
    pub fn send(&self, command: RoomCommand) -> bool {
        self.sender.send(command).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the room to dispose and waits for its task to end.
    pub async fn shutdown(self) {
        let _ = self.sender.send(RoomCommand::Shutdown);
        if let Err(e) = self.task.await {
            error!("Room {} task failed: {}", self.id, e);
        }
    }
}

/// Runs `room` on its own task.
pub fn spawn_room(room: Room) -> RoomHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    let id = room.id().to_string();
    let task = tokio::spawn(run_room(room, sender.clone(), receiver));
    RoomHandle { id, sender, task }
}

async fn run_room(
    mut room: Room,
    sender: mpsc::UnboundedSender<RoomCommand>,
    mut receiver: mpsc::UnboundedReceiver<RoomCommand>,
) {
    let dt = room.config().dt();
    let grace = room.config().reconnect_grace;

    let mut ticker = interval(room.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the first tick since it fires immediately
    ticker.tick().await;

    let reservation = sleep(room.config().seat_reservation);
    tokio::pin!(reservation);
    let mut awaiting_first_join = true;

    let mut grace_timers: HashMap<SessionId, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            command = receiver.recv() => {
                match command {
                    Some(RoomCommand::Join { session_id, options }) => {
                        match room.on_join(&session_id, &options) {
                            Ok(_) => awaiting_first_join = false,
                            Err(e) => room.reject(&session_id, &e),
                        }
                    }
                    Some(RoomCommand::Leave { session_id, consented }) => {
                        if let LeaveOutcome::AwaitingReconnect { token } =
                            room.on_leave(&session_id, consented)
                        {
                            if !grace_timers.contains_key(&session_id) {
                                let sender = sender.clone();
                                let expired = session_id.clone();
                                let timer = tokio::spawn(async move {
                                    sleep(grace).await;
                                    let _ = sender.send(RoomCommand::ReconnectExpired {
                                        session_id: expired,
                                        token,
                                    });
                                });
                                grace_timers.insert(session_id, timer);
                            }
                        } else if let Some(timer) = grace_timers.remove(&session_id) {
                            timer.abort();
                        }
                    }
                    Some(RoomCommand::Reconnect { session_id }) => {
                        match room.on_reconnect(&session_id) {
                            Ok(()) => {
                                if let Some(timer) = grace_timers.remove(&session_id) {
                                    timer.abort();
                                }
                            }
                            Err(e) => room.reject(&session_id, &e),
                        }
                    }
                    Some(RoomCommand::Message { session_id, kind, payload }) => {
                        room.on_message(&session_id, &kind, &payload);
                    }
                    Some(RoomCommand::ReconnectExpired { session_id, token }) => {
                        if room.expire_reconnection(&session_id, token) {
                            grace_timers.remove(&session_id);
                        }
                    }
                    Some(RoomCommand::Shutdown) | None => break,
                }
            }

            _ = ticker.tick() => {
                room.tick(dt);
                if room.state().tick % 60 == 0 {
                    debug!(
                        "Room {} tick {}: {} sessions",
                        room.id(),
                        room.state().tick,
                        room.session_count()
                    );
                }
            }

            _ = &mut reservation, if awaiting_first_join => {
                awaiting_first_join = false;
                if room.is_empty() {
                    info!("Nobody joined room {} in time", room.id());
                    break;
                }
            }
        }

        room.replicate();

        if room.is_empty() && !awaiting_first_join {
            break;
        }
    }

    // Nothing sent from here on is accepted; turn away what is still queued
    receiver.close();
    while let Ok(command) = receiver.try_recv() {
        match command {
            RoomCommand::Join { session_id, .. } | RoomCommand::Reconnect { session_id } => {
                room.reject(&session_id, &RoomError::Disposed);
            }
            _ => {}
        }
    }

    for timer in grace_timers.into_values() {
        timer.abort();
    }
    room.dispose();
}
