use std::path::Path;
use std::time::Instant;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, info, warn};

use crate::client::FtpClient;
use crate::protocol::FtpSession;
use crate::utils::check_session;

/// Downloads a remote file to local storage
///
/// 1. Creates the parent directories of `dest_path`
/// 2. Creates (truncates) the local file
/// 3. Borrows a session and checks its last reply code
/// 4. Retrieves the remote file through a buffered writer and flushes it
/// 5. Returns the session to the pool on every branch
///
/// # Arguments
///
/// * `client` - The transfer client owning the pool
/// * `remote_path` - Path to the remote file
/// * `dest_path` - Local destination path
///
/// # Returns
///
/// `true` if the whole file was written locally, `false` on any failure.
/// A failed download may leave a partial or empty local file behind.
pub(crate) async fn download_file<S: FtpSession>(
    client: &FtpClient<S>,
    remote_path: &str,
    dest_path: &Path,
) -> bool {
    let download_time = Instant::now();
    if let Some(parent) = dest_path.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            error!(local = ?dest_path, error = %e, "Failed to create parent directory");
            return false;
        }
    }
    let local_file = match fs::File::create(dest_path).await {
        Ok(file) => file,
        Err(e) => {
            error!(local = ?dest_path, error = %e, "Failed to create local file");
            return false;
        }
    };
    info!("Local file created: {:?}", dest_path);
    let mut writer = BufWriter::new(local_file);

    let mut session = match client.pool.borrow().await {
        Ok(session) => Some(session),
        Err(e) => {
            error!(remote = remote_path, error = %e, "Failed to borrow session for download");
            None
        }
    };

    let retrieved = match session.as_mut() {
        Some(session) if check_session(&**session) => {
            match session.retrieve_file(remote_path, &mut writer).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!(remote = remote_path, reply_code = %session.reply_code(), "Server rejected download");
                    false
                }
                Err(e) => {
                    error!(remote = remote_path, error = %e, "Download failed");
                    false
                }
            }
        }
        _ => false,
    };
    client.pool.release(session).await;

    if !retrieved {
        return false;
    }
    if let Err(e) = writer.flush().await {
        error!(local = ?dest_path, error = %e, "Failed to flush local file");
        return false;
    }

    info!(
        "File {:?} downloaded. Time taken {:?}",
        remote_path,
        download_time.elapsed()
    );
    true
}
