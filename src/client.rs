use std::io::Cursor;
use std::path::Path;
use tokio::io::AsyncRead;
use tracing::info;

use crate::config::FtpClientConfig;
use crate::error::{FtpError, Result};
use crate::operations::{delete, download, list, read, upload};
use crate::pool::Pool;
use crate::protocol::FtpSession;
use crate::session::FtpSessionFactory;
use crate::utils::check_session;
use crate::{FtpSessionPool, PooledSession};

/// FTP client performing file operations on sessions borrowed from a pool
///
/// Operations come in two shapes. Scoped ones (`upload_*`, `download_file`,
/// `delete_file`) borrow a session, use it and give it back before
/// returning, reporting failure as `false`. Manual ones take a session the
/// caller obtained with [`acquire_session`](Self::acquire_session) and must
/// hand back with [`release_session`](Self::release_session).
///
/// # Working directory
///
/// Sessions are reused as they are. [`list_names`](Self::list_names) and
/// [`delete_file`](Self::delete_file) change directory on the server, and the
/// next borrower of that session starts in the same directory. Relative
/// remote paths resolve against it, so pass absolute paths unless the
/// session was changed into a known directory first.
pub struct FtpClient<S: FtpSession> {
    pub(crate) pool: FtpSessionPool<S>,
}

impl<S: FtpSession> Clone for FtpClient<S> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<S: FtpSession> std::fmt::Debug for FtpClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient").field("pool", &self.pool).finish()
    }
}

impl<S: FtpSession> FtpClient<S> {
    /// Wraps an existing pool
    pub fn new(pool: FtpSessionPool<S>) -> Self {
        Self { pool }
    }

    /// Builds the session factory and pool described by `config`
    ///
    /// # Arguments
    ///
    /// * `config` - Server, login, transfer and pool settings
    /// * `connector` - Produces a fresh, unconnected protocol client
    ///
    /// # Errors
    ///
    /// Returns [`FtpError::Config`] if the configuration is invalid. No
    /// connection is opened here; sessions are created on first use.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let server = MemoryFtpServer::new().with_user("deploy", "secret");
    /// let client = FtpClient::connect(config, move || server.session())?;
    /// ```
    pub fn connect(
        config: FtpClientConfig,
        connector: impl Fn() -> S + Send + Sync + 'static,
    ) -> Result<Self> {
        config.validate()?;
        info!(host = %config.host, port = config.port, "Creating FTP client");
        let pool_config = config.pool.clone();
        let factory = FtpSessionFactory::new(config, connector);
        Ok(Self::new(Pool::new(factory, pool_config)?))
    }

    /// The pool sessions are borrowed from
    pub fn pool(&self) -> &FtpSessionPool<S> {
        &self.pool
    }

    /// Uploads a local file to the remote server
    ///
    /// # Arguments
    ///
    /// * `local_path` - Path to the local file
    /// * `remote_name` - Destination name, relative to the session's working directory
    ///
    /// # Returns
    ///
    /// `true` if the server stored the file, `false` otherwise
    ///
    /// # Example
    ///
    /// ```ignore
    /// let ok = client.upload_file(Path::new("/local/report.csv"), "report.csv").await;
    /// ```
    pub async fn upload_file(&self, local_path: impl AsRef<Path>, remote_name: &str) -> bool {
        upload::upload_file(self, local_path.as_ref(), remote_name).await
    }

    /// Uploads everything `reader` yields as `remote_name`
    ///
    /// # Returns
    ///
    /// `true` if the server stored the data, `false` otherwise
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut data: &[u8] = b"hello";
    /// let ok = client.upload_stream(&mut data, "hello.txt").await;
    /// ```
    pub async fn upload_stream<R>(&self, reader: &mut R, remote_name: &str) -> bool
    where
        R: AsyncRead + Unpin + Send,
    {
        upload::upload_stream(self, reader, remote_name).await
    }

    /// Downloads a remote file, creating the destination's parent directories
    ///
    /// # Arguments
    ///
    /// * `remote_path` - Path to the remote file
    /// * `dest_path` - Local destination path
    ///
    /// # Returns
    ///
    /// `true` if the file was written locally, `false` otherwise
    ///
    /// # Example
    ///
    /// ```ignore
    /// let ok = client.download_file("/outbox/report.csv", "/tmp/in/report.csv").await;
    /// ```
    pub async fn download_file(&self, remote_path: &str, dest_path: impl AsRef<Path>) -> bool {
        download::download_file(self, remote_path, dest_path.as_ref()).await
    }

    /// Deletes `file_name` in `remote_path`
    ///
    /// # Returns
    ///
    /// `true` whenever the delete command reached the server, including when
    /// the server answered that the file does not exist. `false` only when no
    /// session was available or the exchange failed.
    pub async fn delete_file(&self, remote_path: &str, file_name: &str) -> bool {
        delete::delete_file(self, remote_path, file_name).await
    }

    /// Borrows a session for a sequence of manual operations
    ///
    /// # Errors
    ///
    /// - any error from [`Pool::borrow`]
    /// - [`FtpError::NotReady`] if the session's last reply was not a positive
    ///   completion; that session has already been returned to the pool
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut session = client.acquire_session().await?;
    /// let names = client.list_names(&mut session, "/outbox").await;
    /// client.release_session(Some(session)).await;
    /// ```
    pub async fn acquire_session(&self) -> Result<PooledSession<S>> {
        let session = self.pool.borrow().await?;
        if !check_session(&*session) {
            let reply_code = session.reply_code();
            self.pool.release(Some(session)).await;
            return Err(FtpError::NotReady { reply_code });
        }
        Ok(session)
    }

    /// Lists file names in `remote_path` on a caller-held session
    ///
    /// # Returns
    ///
    /// The names, or `None` on any failure
    pub async fn list_names(
        &self,
        session: &mut PooledSession<S>,
        remote_path: &str,
    ) -> Option<Vec<String>> {
        list::list_names(&mut **session, remote_path).await
    }

    /// Reads a remote file into `buffer` on a caller-held session
    ///
    /// # Returns
    ///
    /// A reader over a copy of `buffer` once the file has been appended to
    /// it, or `None` if the session is not ready or the retrieval failed
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut buffer = Vec::new();
    /// if let Some(mut reader) = client.read_as_stream(&mut buffer, &mut session, "data.json").await {
    ///     let mut text = String::new();
    ///     reader.read_to_string(&mut text).await?;
    /// }
    /// ```
    pub async fn read_as_stream(
        &self,
        buffer: &mut Vec<u8>,
        session: &mut PooledSession<S>,
        remote_file: &str,
    ) -> Option<Cursor<Vec<u8>>> {
        read::read_as_stream(buffer, &mut **session, remote_file).await
    }

    /// Returns a session obtained from [`acquire_session`](Self::acquire_session); `None` is a no-op
    pub async fn release_session(&self, session: Option<PooledSession<S>>) {
        self.pool.release(session).await
    }

    /// Shuts the pool down, destroying idle sessions
    ///
    /// Sessions still borrowed are destroyed when they come back.
    pub async fn close(&self) {
        self.pool.shutdown().await
    }
}
