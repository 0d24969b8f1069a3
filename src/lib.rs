//! Pooled FTP sessions with file transfer helpers.
//!
//! [`FtpSessionFactory`] connects and logs in sessions, [`Pool`] bounds and
//! recycles them, and [`FtpClient`] runs uploads, downloads, deletes and
//! listings on borrowed sessions. The protocol client itself sits behind the
//! [`FtpSession`] trait. With the `testing` feature, `MemoryFtpSession`
//! implements it in process against a `MemoryFtpServer`.

// Module declarations
mod client;
mod config;
mod error;
pub mod logging;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod operations;
mod pool;
mod protocol;
mod session;
mod types;
mod utils;

// Public API exports
pub use client::FtpClient;
pub use config::{FtpClientConfig, PoolConfig};
pub use error::{FtpError, Result};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryFtpServer, MemoryFtpSession};
pub use pool::{ObjectFactory, Pool, PoolStats, Pooled};
pub use protocol::FtpSession;
pub use session::FtpSessionFactory;
pub use types::{ReplyCode, TransferFileType};

/// Pool of FTP sessions built by an [`FtpSessionFactory`]
pub type FtpSessionPool<S> = Pool<FtpSessionFactory<S>>;

/// A session borrowed from an [`FtpSessionPool`]
pub type PooledSession<S> = Pooled<FtpSessionFactory<S>>;
