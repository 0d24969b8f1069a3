//! In-process FTP server and session.
//!
//! `MemoryFtpServer` keeps files in memory and hands out `MemoryFtpSession`s
//! that speak the [`FtpSession`] contract against it. Faults can be switched
//! on at runtime (refused greetings, failing keepalives, dropped connections,
//! failing logout) so every lifecycle branch of the pool can be driven
//! without a network.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::FtpSession;
use crate::types::{ReplyCode, TransferFileType};

#[derive(Debug, Default)]
struct ServerState {
    files: HashMap<String, Bytes>,
    dirs: BTreeSet<String>,
    users: HashMap<String, String>,
    refuse_connections: bool,
    fail_noop: bool,
    fail_logout: bool,
    /// Bumped by `drop_connections`; sessions from older generations are dead
    generation: u64,
    connects: usize,
    disconnects: usize,
    live: usize,
}

/// Shared in-memory server; clones refer to the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryFtpServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryFtpServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.state.lock().dirs.insert("/".to_string());
        server
    }

    /// Registers an account
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.state
            .lock()
            .users
            .insert(username.to_string(), password.to_string());
        self
    }

    /// A fresh, unconnected session against this server
    pub fn session(&self) -> MemoryFtpSession {
        MemoryFtpSession::new(self.clone())
    }

    /// Stores `data` at `path`, creating parent directories
    pub fn put_file(&self, path: &str, data: impl Into<Bytes>) {
        let path = normalize("/", path);
        let mut state = self.state.lock();
        add_parent_dirs(&mut state.dirs, &path);
        state.files.insert(path, data.into());
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.state.lock().files.get(&normalize("/", path)).cloned()
    }

    pub fn make_dir(&self, path: &str) {
        let path = normalize("/", path);
        let mut state = self.state.lock();
        add_parent_dirs(&mut state.dirs, &path);
        state.dirs.insert(path);
    }

    /// Answer new connections with 421
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Make NOOP fail with an I/O error
    pub fn set_fail_noop(&self, fail: bool) {
        self.state.lock().fail_noop = fail;
    }

    /// Make QUIT fail with an I/O error
    pub fn set_fail_logout(&self, fail: bool) {
        self.state.lock().fail_logout = fail;
    }

    /// Severs every open session, as a server restart would
    pub fn drop_connections(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.live = 0;
    }

    /// Connection attempts so far
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Client-initiated disconnects so far
    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Sessions currently connected
    pub fn live_sessions(&self) -> usize {
        self.state.lock().live
    }
}

fn normalize(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn add_parent_dirs(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        dirs.insert(if current.is_empty() {
            "/".to_string()
        } else {
            current.to_string()
        });
    }
}

fn connection_lost() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed by server")
}

/// One client session against a [`MemoryFtpServer`]
#[derive(Debug)]
pub struct MemoryFtpSession {
    server: MemoryFtpServer,
    connected: bool,
    generation: u64,
    logged_in: bool,
    cwd: String,
    reply: ReplyCode,
    encoding: String,
    file_type: TransferFileType,
    passive: bool,
    buffer_size: usize,
    connect_timeout: Duration,
    data_timeout: Duration,
    so_timeout: Duration,
}

impl MemoryFtpSession {
    fn new(server: MemoryFtpServer) -> Self {
        Self {
            server,
            connected: false,
            generation: 0,
            logged_in: false,
            cwd: "/".to_string(),
            reply: ReplyCode::default(),
            encoding: String::new(),
            file_type: TransferFileType::Ascii,
            passive: false,
            buffer_size: 0,
            connect_timeout: Duration::ZERO,
            data_timeout: Duration::ZERO,
            so_timeout: Duration::ZERO,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn is_passive(&self) -> bool {
        self.passive
    }

    pub fn file_type(&self) -> TransferFileType {
        self.file_type
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn working_directory(&self) -> &str {
        &self.cwd
    }

    pub fn timeouts(&self) -> (Duration, Duration, Duration) {
        (self.connect_timeout, self.data_timeout, self.so_timeout)
    }

    /// Fails if the control connection is gone
    fn ensure_open(&self) -> io::Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(connection_lost())
        }
    }

    /// Commands past login answer 530 until the session is authenticated
    fn require_login(&mut self) -> io::Result<bool> {
        self.ensure_open()?;
        if !self.logged_in {
            self.reply = ReplyCode::NOT_LOGGED_IN;
        }
        Ok(self.logged_in)
    }
}

#[async_trait]
impl FtpSession for MemoryFtpSession {
    async fn connect(&mut self, _host: &str, _port: u16) -> io::Result<ReplyCode> {
        let mut state = self.server.state.lock();
        state.connects += 1;
        state.live += 1;
        self.connected = true;
        self.generation = state.generation;
        self.reply = if state.refuse_connections {
            ReplyCode::SERVICE_NOT_AVAILABLE
        } else {
            ReplyCode::SERVICE_READY
        };
        Ok(self.reply)
    }

    fn set_control_encoding(&mut self, encoding: &str) {
        self.encoding = encoding.to_string();
    }

    fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    fn set_data_timeout(&mut self, timeout: Duration) {
        self.data_timeout = timeout;
    }

    fn set_so_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.ensure_open()?;
        self.so_timeout = timeout;
        Ok(())
    }

    fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size;
    }

    async fn set_file_type(&mut self, file_type: TransferFileType) -> io::Result<bool> {
        if !self.require_login()? {
            return Ok(false);
        }
        self.file_type = file_type;
        self.reply = ReplyCode::COMMAND_OK;
        Ok(true)
    }

    fn enter_local_passive_mode(&mut self) {
        self.passive = true;
    }

    async fn login(&mut self, username: &str, password: &str) -> io::Result<bool> {
        self.ensure_open()?;
        let accepted = self
            .server
            .state
            .lock()
            .users
            .get(username)
            .is_some_and(|expected| expected == password);
        self.logged_in = accepted;
        self.reply = if accepted {
            ReplyCode::USER_LOGGED_IN
        } else {
            ReplyCode::NOT_LOGGED_IN
        };
        Ok(accepted)
    }

    async fn store_file(
        &mut self,
        remote: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> io::Result<bool> {
        if !self.require_login()? {
            return Ok(false);
        }
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        self.ensure_open()?;

        let path = normalize(&self.cwd, remote);
        let mut state = self.server.state.lock();
        let parent_exists = path
            .rfind('/')
            .map(|idx| if idx == 0 { "/" } else { &path[..idx] })
            .is_some_and(|parent| state.dirs.contains(parent));
        if !parent_exists {
            self.reply = ReplyCode::FILE_UNAVAILABLE;
            return Ok(false);
        }
        state.files.insert(path, Bytes::from(data));
        self.reply = ReplyCode::CLOSING_DATA_CONNECTION;
        Ok(true)
    }

    async fn retrieve_file(
        &mut self,
        remote: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<bool> {
        if !self.require_login()? {
            return Ok(false);
        }
        let path = normalize(&self.cwd, remote);
        let data = self.server.state.lock().files.get(&path).cloned();
        match data {
            Some(data) => {
                dest.write_all(&data).await?;
                self.reply = ReplyCode::CLOSING_DATA_CONNECTION;
                Ok(true)
            }
            None => {
                self.reply = ReplyCode::FILE_UNAVAILABLE;
                Ok(false)
            }
        }
    }

    async fn change_working_directory(&mut self, path: &str) -> io::Result<bool> {
        if !self.require_login()? {
            return Ok(false);
        }
        let path = normalize(&self.cwd, path);
        if self.server.state.lock().dirs.contains(&path) {
            self.cwd = path;
            self.reply = ReplyCode::FILE_ACTION_OK;
            Ok(true)
        } else {
            self.reply = ReplyCode::FILE_UNAVAILABLE;
            Ok(false)
        }
    }

    async fn delete_file(&mut self, name: &str) -> io::Result<ReplyCode> {
        if !self.require_login()? {
            return Ok(self.reply);
        }
        let path = normalize(&self.cwd, name);
        self.reply = match self.server.state.lock().files.remove(&path) {
            Some(_) => ReplyCode::FILE_ACTION_OK,
            None => ReplyCode::FILE_UNAVAILABLE,
        };
        Ok(self.reply)
    }

    async fn list_names(&mut self) -> io::Result<Option<Vec<String>>> {
        if !self.require_login()? {
            return Ok(None);
        }
        let prefix = if self.cwd == "/" {
            "/".to_string()
        } else {
            format!("{}/", self.cwd)
        };
        let mut names: Vec<String> = self
            .server
            .state
            .lock()
            .files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        self.reply = ReplyCode::CLOSING_DATA_CONNECTION;
        Ok(Some(names))
    }

    async fn logout(&mut self) -> io::Result<bool> {
        self.ensure_open()?;
        if self.server.state.lock().fail_logout {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "QUIT failed"));
        }
        self.logged_in = false;
        self.reply = ReplyCode::SERVICE_CLOSING_CONTROL;
        Ok(true)
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        if self.is_connected() {
            let mut state = self.server.state.lock();
            state.disconnects += 1;
            state.live = state.live.saturating_sub(1);
        }
        self.connected = false;
        self.logged_in = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.generation == self.server.state.lock().generation
    }

    async fn send_noop(&mut self) -> io::Result<bool> {
        self.ensure_open()?;
        if self.server.state.lock().fail_noop {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "NOOP timed out"));
        }
        self.reply = ReplyCode::COMMAND_OK;
        Ok(true)
    }

    fn reply_code(&self) -> ReplyCode {
        self.reply
    }
}
