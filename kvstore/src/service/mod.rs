//! The network face of the embedding store.

mod client;
mod msg;
mod server;

pub use client::KvClient;
pub use msg::{Request, Response};
pub use server::KvServer;
