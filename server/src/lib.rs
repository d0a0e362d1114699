//! # Pong Activity Server
//!
//! Authoritative server for a two-player Pong activity. Each activity
//! instance maps to one room; the room owns the replicated state, runs the
//! physics at a fixed tick rate and decides scoring. Clients only send
//! intents (a paddle direction, a spectator cube position) and render what
//! the server replicates.
//!
//! ## Architecture
//!
//! ### One task per room
//! A room is a single tokio task selecting over its command queue and its
//! tick interval, so joins, leaves, messages, ticks and timer expiries are
//! handled strictly one after another. Rooms share nothing except the
//! [`registry::RoomRegistry`] used for existence checks.
//!
//! ### UDP front end
//! [`network::Server`] owns the socket. It maps addresses to sessions
//! through [`client_manager::ClientManager`], forwards packets to rooms as
//! [`room::RoomCommand`]s and turns [`room::RoomEvent`]s back into packets.
//! A client that goes silent becomes a non-consented leave, which gives it
//! the reconnection grace window.
//!
//! ## Module Organization
//!
//! - `physics`: rigid-body world (integration, contact resolution, overlap queries)
//! - `collision`: named groups of bodies that report overlapping pairs
//! - `slots`: the two player slots and their sessions
//! - `engine`: paddles, ball, scoring and the post-step bookkeeping
//! - `room`: room lifecycle, message routing and the room task
//! - `registry`: active room ids
//! - `client_manager`, `network`: the UDP transport
//! - `config`: simulation and server tuning
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod collision;
pub mod config;
pub mod engine;
pub mod network;
pub mod physics;
pub mod registry;
pub mod room;
pub mod slots;
