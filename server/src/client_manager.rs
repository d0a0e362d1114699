//! Transport-level session tracking for the UDP server
//!
//! Every address that joins gets a session id. The manager remembers which
//! room each session is attached to, enforces the server's capacity limit and
//! notices clients that went silent. Room membership itself (slots, grace
//! windows) belongs to the rooms; a timed-out client here only becomes a
//! non-consented leave there.

use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::SessionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Length of generated session ids.
pub const SESSION_ID_LEN: usize = 9;

/// A connected client
#[derive(Debug, Clone)]
pub struct Client {
    pub session_id: SessionId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Room the session is attached to, if any
    pub room_id: Option<String>,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(session_id: SessionId, addr: SocketAddr) -> Self {
        Self {
            session_id,
            addr,
            room_id: None,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing arrived from this client within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Random alphanumeric session id.
pub fn generate_session_id<R: Rng>(rng: &mut R) -> SessionId {
    rng.sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Manages all connected clients
///
/// Clients are keyed by session id. Address lookups scan the map, which is
/// fine for the handful of clients an activity instance holds.
pub struct ClientManager {
    clients: HashMap<SessionId, Client>,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
            timeout,
        }
    }

    /// Admits a new client under a fresh session id.
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let mut rng = rand::thread_rng();
        let session_id = loop {
            let candidate = generate_session_id(&mut rng);
            if !self.clients.contains_key(&candidate) {
                break candidate;
            }
        };

        info!("Client {} connected from {}", session_id, addr);
        self.clients
            .insert(session_id.clone(), Client::new(session_id.clone(), addr));
        Some(session_id)
    }

    /// Binds a known session id to a (possibly new) address, as happens when a
    /// dropped client reconnects. A session still live in `room_id` moves to
    /// the new address. Fails if the session is bound to another room, if the
    /// address belongs to another session, or if the server is full.
    pub fn attach(&mut self, session_id: &str, addr: SocketAddr, room_id: &str) -> bool {
        let addr_taken = self
            .clients
            .values()
            .any(|client| client.addr == addr && client.session_id != session_id);
        if addr_taken {
            return false;
        }

        if let Some(existing) = self.clients.get(session_id) {
            if existing.addr != addr && existing.room_id.as_deref() != Some(room_id) {
                return false;
            }
        } else if self.clients.len() >= self.max_clients {
            return false;
        }

        let mut client = Client::new(session_id.to_string(), addr);
        client.room_id = Some(room_id.to_string());
        self.clients.insert(session_id.to_string(), client);
        info!("Client {} attached from {}", session_id, addr);
        true
    }

    pub fn remove_client(&mut self, session_id: &str) -> Option<Client> {
        let client = self.clients.remove(session_id)?;
        info!("Client {} disconnected", client.session_id);
        Some(client)
    }

    pub fn get(&self, session_id: &str) -> Option<&Client> {
        self.clients.get(session_id)
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&Client> {
        self.clients.values().find(|client| client.addr == addr)
    }

    pub fn addr_of(&self, session_id: &str) -> Option<SocketAddr> {
        self.clients.get(session_id).map(|client| client.addr)
    }

    pub fn set_room(&mut self, session_id: &str, room_id: Option<String>) -> bool {
        match self.clients.get_mut(session_id) {
            Some(client) => {
                client.room_id = room_id;
                true
            }
            None => false,
        }
    }

    /// Detaches every client of a room that went away.
    pub fn clear_room(&mut self, room_id: &str) {
        for client in self.clients.values_mut() {
            if client.room_id.as_deref() == Some(room_id) {
                client.room_id = None;
            }
        }
    }

    /// Records activity from `addr`. Returns the session if known.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<&Client> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.touch();
        Some(client)
    }

    /// Removes and returns clients that went silent.
    pub fn check_timeouts(&mut self) -> Vec<Client> {
        let timed_out: Vec<SessionId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(self.timeout))
            .map(|client| client.session_id.clone())
            .collect();

        timed_out
            .iter()
            .filter_map(|session_id| self.remove_client(session_id))
            .collect()
    }

    /// Addresses of every client attached to `room_id`.
    pub fn addrs_in_room(&self, room_id: &str) -> Vec<(SessionId, SocketAddr)> {
        self.clients
            .values()
            .filter(|client| client.room_id.as_deref() == Some(room_id))
            .map(|client| (client.session_id.clone(), client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
