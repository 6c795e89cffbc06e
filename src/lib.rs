//! # Meshbot - Automation Daemon for Meshtastic Networks
//!
//! Meshbot connects to a Meshtastic mesh radio device over serial or TCP,
//! records the nodes it hears, and dispatches pluggable actions on packet
//! arrival or on a timer. It is built to sit unattended next to a radio:
//! the connection supervisor retries a dead link forever, and no action
//! failure ever takes the process down.
//!
//! ## Features
//!
//! - **Pluggable Actions**: TOML manifests bind builtin behaviors (ping
//!   responder, welcome messages, status reports, maintenance reboots, node
//!   database cleanup); SIGHUP reloads the catalog without a restart.
//! - **Connection Supervision**: heartbeat-probed link with deterministic
//!   teardown and fixed-interval infinite reconnect.
//! - **Node Database**: embedded sled store of every node heard, shared with
//!   actions for their own state.
//! - **Async Design**: a single Tokio select loop; actions themselves stay
//!   synchronous and sequential.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbot::config::Config;
//! use meshbot::bot::BotServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut server = BotServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bot`] - dispatch loop, action registry, connection supervisor, server
//! - [`actions`] - the action trait and builtin units
//! - [`transport`] - device link (serial/TCP/mock) and packet model
//! - [`storage`] - seen-node persistence layer
//! - [`config`] - configuration management
//! - [`errors`] - crate error taxonomy

pub mod actions;
pub mod bot;
pub mod config;
pub mod errors;
pub mod logutil;
pub mod storage;
pub mod transport;
