use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::FtpClientConfig;
use crate::error::{FtpError, Result};
use crate::pool::ObjectFactory;
use crate::protocol::FtpSession;
use crate::types::FtpClientConfigArc;

type Connector<S> = Box<dyn Fn() -> S + Send + Sync>;

/// Creates, validates and destroys FTP sessions for the pool
///
/// The factory is the only place sessions are connected and torn down. It
/// is handed to [`Pool::new`](crate::Pool::new) and never called directly by
/// transfer code.
pub struct FtpSessionFactory<S: FtpSession> {
    config: FtpClientConfigArc,
    connector: Connector<S>,
}

impl<S: FtpSession> std::fmt::Debug for FtpSessionFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSessionFactory")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .finish()
    }
}

impl<S: FtpSession> FtpSessionFactory<S> {
    /// Creates a factory that builds unconnected clients with `connector`
    ///
    /// # Example
    ///
    /// ```ignore
    /// let server = MemoryFtpServer::new().with_user("deploy", "secret");
    /// let factory = FtpSessionFactory::new(config, move || server.session());
    /// ```
    pub fn new(config: FtpClientConfig, connector: impl Fn() -> S + Send + Sync + 'static) -> Self {
        Self {
            config: config.into(),
            connector: Box::new(connector),
        }
    }

    pub fn config(&self) -> &FtpClientConfig {
        &self.config
    }

    /// Connects and logs in a new session
    ///
    /// # Returns
    ///
    /// A connected session with encoding, timeouts, buffer size, transfer type
    /// and passive mode applied. Unless `strict_login` is set, a rejected
    /// login does not fail creation: the session is returned unauthenticated
    /// and its last reply code reflects the rejection.
    ///
    /// # Errors
    ///
    /// - [`FtpError::ConnectionRefused`] if the greeting is not a positive
    ///   completion; the session is disconnected first
    /// - [`FtpError::AuthFailure`] if the login is rejected and `strict_login` is set
    /// - [`FtpError::Transport`] on any I/O failure during the handshake
    pub async fn create(&self) -> Result<S> {
        let config = &self.config;
        let mut session = (self.connector)();
        session.set_control_encoding(&config.encoding);
        session.set_connect_timeout(config.connect_timeout());
        session.set_data_timeout(config.data_timeout());

        debug!(host = %config.host, port = config.port, "Connecting to FTP server");
        let reply_code = session
            .connect(&config.host, config.port)
            .await
            .map_err(|e| {
                error!(host = %config.host, port = config.port, error = %e, "Create ftp connection failed");
                FtpError::transport("connect", e)
            })?;

        if !reply_code.is_positive_completion() {
            if let Err(e) = session.disconnect().await {
                warn!(error = %e, "Failed to disconnect refused session");
            }
            warn!(%reply_code, host = %config.host, "FTP server refused connection");
            return Err(FtpError::ConnectionRefused {
                host: config.host.clone(),
                port: config.port,
                reply_code,
            });
        }

        match self.handshake(&mut session).await {
            Ok(()) => {
                info!(host = %config.host, port = config.port, "Create ftp connection success");
                Ok(session)
            }
            Err(err) => {
                if !matches!(err, FtpError::AuthFailure { .. }) {
                    error!(host = %config.host, error = %err, "Create ftp connection failed");
                }
                self.destroy(session).await;
                Err(err)
            }
        }
    }

    /// Post-connect setup: socket timeout, login, transfer settings.
    async fn handshake(&self, session: &mut S) -> Result<()> {
        let config = &self.config;
        session
            .set_so_timeout(config.so_timeout())
            .map_err(|e| FtpError::transport("set socket timeout", e))?;

        let logged_in = session
            .login(&config.username, &config.password)
            .await
            .map_err(|e| FtpError::transport("login", e))?;
        if !logged_in {
            let reply_code = session.reply_code();
            warn!(username = %config.username, %reply_code, "FTP client login failed");
            if config.strict_login {
                return Err(FtpError::AuthFailure {
                    username: config.username.clone(),
                    reply_code,
                });
            }
        }

        session.set_buffer_size(config.buffer_size);
        session
            .set_file_type(config.transfer_file_type)
            .await
            .map_err(|e| FtpError::transport("set file type", e))?;
        if config.passive_mode {
            session.enter_local_passive_mode();
        }
        Ok(())
    }

    /// Logs out and disconnects, logging failures instead of returning them
    pub async fn destroy(&self, mut session: S) {
        if session.is_connected() {
            if let Err(e) = session.logout().await {
                error!(error = %e, "FTP client logout failed");
            }
        }
        if session.is_connected() {
            if let Err(e) = session.disconnect().await {
                error!(error = %e, "Close ftp client failed");
            }
        }
        debug!("FTP session destroyed");
    }

    /// Sends a NOOP and reports why the session is unusable, if it is
    pub async fn keepalive(&self, session: &mut S) -> Result<()> {
        match session.send_noop().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(FtpError::ValidationFailure {
                reply_code: session.reply_code(),
            }),
            Err(e) => Err(FtpError::transport("noop", e)),
        }
    }

    /// True only if the NOOP keepalive succeeds
    pub async fn validate(&self, session: &mut S) -> bool {
        match self.keepalive(session).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to validate client");
                false
            }
        }
    }
}

#[async_trait]
impl<S: FtpSession> ObjectFactory for FtpSessionFactory<S> {
    type Object = S;

    async fn create(&self) -> Result<S> {
        FtpSessionFactory::create(self).await
    }

    async fn destroy(&self, session: S) {
        FtpSessionFactory::destroy(self, session).await
    }

    async fn validate(&self, session: &mut S) -> bool {
        FtpSessionFactory::validate(self, session).await
    }

    fn is_broken(&self, session: &S) -> bool {
        !session.is_connected()
    }
}
