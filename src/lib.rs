#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::implicit_hasher)]

//! backhaul — reverse HTTP tunnel relay.
//!
//! Agents behind NAT or firewall connect outbound to `GET /_connect`,
//! upgrade to WebSocket, and `register` the virtual host names they serve.
//! Every other inbound HTTP request is matched by its `Host` header to the
//! owning agent and streamed through that agent's socket: request headers
//! and body out, response head and body back, any number of requests in
//! flight over the one connection.
//!
//! ```text
//! main.rs       — entry point, clap subcommands, graceful shutdown
//! config.rs     — TOML + env-var configuration
//! state.rs      — AppState shared by all handlers
//! error.rs      — tunnel error kinds
//! routes/
//!   connect.rs  — GET /_connect upgrade, agent session loop
//!   proxy.rs    — fallback handler, request multiplexer
//!   agents.rs   — GET /_agents introspection listing
//! tunnel/
//!   codec.rs    — hybrid frame layout, codec seam
//!   messages.rs — typed message grammar
//!   channel.rs  — duplex channel over one WebSocket
//!   registry.rs — sessions + host claims
//!   session.rs  — per-agent state, inbound dispatch
//! ```

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod tunnel;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use error::TunnelError;
pub use routes::router;
pub use state::AppState;
