//! IPC module
//!
//! `server` answers the UI and host on the daemon socket; `client` calls
//! into the native host over its command socket.

mod client;
mod protocol;
mod server;

pub use client::HostClient;
pub use server::{Server, ServerContext};
