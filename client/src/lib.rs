//! pasteport client
//!
//! Sends open, clipboard and tmux requests to a pasteport agent, starting a
//! loopback agent in-process when the configured one cannot be reached.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod line_ending;
pub mod tunnel;

pub use client::{Client, ClientOptions};
pub use config::{FileConfig, Settings};
pub use connection::{Connector, Endpoint, FallbackPolicy};
