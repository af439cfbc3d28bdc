//! pasteport shared library
//!
//! Wire protocol, framing, the RPC client and the error taxonomy used by
//! both the agent and the client.

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};
pub use transport::RpcClient;
