//! pasteport agent
//!
//! Listens for client connections, checks the peer against the allow list
//! and runs open, clipboard and tmux requests on this machine.

pub mod access;
pub mod capability;
pub mod dispatcher;
pub mod loopback;
pub mod server;

pub use access::{AllowList, RejectPolicy};
pub use capability::Capabilities;
pub use server::{Agent, AgentConfig, AgentHandle};
