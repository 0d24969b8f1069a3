//! The session client contract the pool manages.
//!
//! Implementations own one control connection to an FTP server. The pool
//! never shares a session between borrowers, so every method takes `&mut self`
//! and implementations need no internal locking.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::{ReplyCode, TransferFileType};

/// A stateful FTP client session
#[async_trait]
pub trait FtpSession: Send + 'static {
    /// Opens the control connection and returns the server greeting's reply code
    async fn connect(&mut self, host: &str, port: u16) -> io::Result<ReplyCode>;

    fn set_control_encoding(&mut self, encoding: &str);

    fn set_connect_timeout(&mut self, timeout: Duration);

    fn set_data_timeout(&mut self, timeout: Duration);

    /// Read timeout on the connected control socket
    fn set_so_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    fn set_buffer_size(&mut self, size: usize);

    /// Sends `TYPE`; true on a positive completion reply
    async fn set_file_type(&mut self, file_type: TransferFileType) -> io::Result<bool>;

    fn enter_local_passive_mode(&mut self);

    /// `USER`/`PASS`; true when the server accepted the credentials
    async fn login(&mut self, username: &str, password: &str) -> io::Result<bool>;

    /// `STOR`; true when the transfer completed
    async fn store_file(
        &mut self,
        remote: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> io::Result<bool>;

    /// `RETR`; true when the transfer completed
    async fn retrieve_file(
        &mut self,
        remote: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<bool>;

    /// `CWD`; true on a positive completion reply
    async fn change_working_directory(&mut self, path: &str) -> io::Result<bool>;

    /// `DELE`, returning the raw reply code
    async fn delete_file(&mut self, name: &str) -> io::Result<ReplyCode>;

    /// `NLST` of the working directory; `None` when the server refused the listing
    async fn list_names(&mut self) -> io::Result<Option<Vec<String>>>;

    /// `QUIT`; true on a positive completion reply
    async fn logout(&mut self) -> io::Result<bool>;

    async fn disconnect(&mut self) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    /// `NOOP`; true on a positive completion reply
    async fn send_noop(&mut self) -> io::Result<bool>;

    /// Reply code of the last command sent on this session
    fn reply_code(&self) -> ReplyCode;
}
