//! Background vector store daemon and its clients.
//!
//! A long-lived `vectord serve` process owns the document index and answers
//! length-prefixed JSON requests on a Unix socket. Short-lived clients start
//! it on demand through [`cmd::daemon::ServiceManager`] and talk to it through
//! [`client::VectorStoreClient`].

pub mod client;
pub mod cmd;
pub mod config;
pub mod embed;
pub mod error;
pub mod ipc;
pub mod server;
pub mod store;
pub mod types;
pub mod usock;
pub mod util;

pub use error::{Error, ErrorKind, Result};
