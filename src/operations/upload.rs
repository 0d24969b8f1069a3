use std::path::Path;
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::{error, info, warn};

use crate::client::FtpClient;
use crate::protocol::FtpSession;
use crate::utils::check_session;

/// Uploads a local file to the remote server
///
/// Opens `local_path` before borrowing so a missing local file never takes a
/// session out of the pool, then delegates to [`upload_stream`].
///
/// # Returns
///
/// `true` if the file was stored, `false` on any failure (logged)
pub(crate) async fn upload_file<S: FtpSession>(
    client: &FtpClient<S>,
    local_path: &Path,
    remote_name: &str,
) -> bool {
    let mut local_file = match fs::File::open(local_path).await {
        Ok(file) => file,
        Err(e) => {
            error!(local = ?local_path, error = %e, "Failed to open local file");
            return false;
        }
    };
    info!("Local file opened: {:?}", local_path);
    upload_stream(client, &mut local_file, remote_name).await
}

/// Stores the contents of `reader` as `remote_name` on a pooled session
///
/// 1. Borrows a session from the pool
/// 2. Checks the session's last reply code
/// 3. Streams `reader` to the server
/// 4. Returns the session to the pool, whatever happened before
///
/// # Returns
///
/// `true` if the server accepted the upload, `false` on any failure (logged)
pub(crate) async fn upload_stream<S, R>(
    client: &FtpClient<S>,
    reader: &mut R,
    remote_name: &str,
) -> bool
where
    S: FtpSession,
    R: AsyncRead + Unpin + Send,
{
    let upload_time = Instant::now();
    let mut session = match client.pool.borrow().await {
        Ok(session) => Some(session),
        Err(e) => {
            error!(remote = remote_name, error = %e, "Failed to borrow session for upload");
            None
        }
    };

    let stored = match session.as_mut() {
        Some(session) if check_session(&**session) => {
            match session.store_file(remote_name, reader).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!(remote = remote_name, reply_code = %session.reply_code(), "Server rejected upload");
                    false
                }
                Err(e) => {
                    error!(remote = remote_name, error = %e, "Upload failed");
                    false
                }
            }
        }
        _ => false,
    };
    client.pool.release(session).await;

    if stored {
        info!(
            "File {:?} uploaded. Time taken {:?}",
            remote_name,
            upload_time.elapsed()
        );
    }
    stored
}
