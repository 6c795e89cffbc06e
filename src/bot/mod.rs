//! # Bot Core Module
//!
//! The non-trivial machinery of the daemon:
//!
//! - [`registry`] - action manifest discovery and the builtin ledger
//! - [`dispatch`] - per-tick evaluation and isolated execution of actions
//! - [`supervisor`] - the connection state machine and reconnect loop
//! - [`server`] - the single event-processing loop joining it all
//!
//! Control flow: the server's `tokio::select!` turns poll ticks, inbound
//! packets and signals into dispatch ticks; the supervisor decides whether
//! those ticks may run anything by publishing [`supervisor::ConnectionState`]
//! over a watch channel.

pub mod dispatch;
pub mod registry;
pub mod server;
pub mod supervisor;

pub use server::BotServer;
