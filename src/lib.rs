//! Webedit - serve one local file to a browser editor.
//!
//! The library holds the lifecycle pieces: port resolution, the target file
//! guard, single-session coordination, the consent cookie, the shutdown
//! supervisor and the public tunnel client. `main.rs` wires them together.

pub mod config;
pub mod consent;
pub mod error;
pub mod lifecycle;
pub mod port;
pub mod server;
pub mod session;
pub mod target;
pub mod tunnel;
