//! # Pong Match Server Library
//!
//! This library provides the authoritative server for real-time Pong matches.
//! It pairs waiting players (or fills the seat with a bot), runs every match
//! as an isolated simulation and streams the canonical state to the players
//! over WebSocket.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Ball physics, paddle movement, scoring and AI paddles all run on the
//! server. Clients only send paddle intents and render the snapshots they
//! receive.
//!
//! ### Matchmaking
//! Players asking for a match wait in a FIFO queue. The two longest-waiting
//! players are paired; a player left alone for the bot-fill timeout plays
//! against the bot instead.
//!
//! ### Match Lifecycle
//! Each match counts down from 3, plays until one side reaches the target
//! score and then persists its result. A player disconnecting mid-match ends
//! it immediately with an "opponent disconnected" notice to the other side.
//!
//! ## Architecture Design
//!
//! ### One Task per Match
//! A match is owned by exactly one tokio task that ticks at a fixed rate and
//! drains a mailbox of paddle, pause and leave commands. No match state is
//! shared, so a match never waits on a lock held by another one.
//!
//! ### Shared Tables
//! The queue, the session registry and the connection table are the only
//! shared state. Each sits behind a single tokio lock and exposes total
//! operations (`enqueue`, `remove`, `register`, `deregister`, `route`).
//!
//! ## Module Organization
//!
//! - `physics`: ball integration, swept paddle collision, powerups
//! - `ai`: bot paddles with difficulty-scaled prediction error
//! - `game`: the per-match state machine
//! - `session`: the task that runs a match and talks to its players
//! - `broadcast`: snapshot fan-out and throttling
//! - `matchmaking`: the waiting queue and bot-fill timers
//! - `registry`: live matches and the connection → match index
//! - `lobby`: inbound message dispatch
//! - `client_manager`: connection ids and player identities
//! - `network`: the WebSocket accept loop
//! - `store`: match records, in memory or in a JSON file
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::lobby::Lobby;
//! use server::network::Server;
//! use server::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let address = config.address();
//!     let lobby = Lobby::new(config, Arc::new(MemoryStore::new()));
//!
//!     // Accepts WebSocket connections until the listener fails
//!     Server::bind(&address, lobby).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod lobby;
pub mod matchmaking;
pub mod network;
pub mod physics;
pub mod registry;
pub mod session;
pub mod store;
pub mod utils;
