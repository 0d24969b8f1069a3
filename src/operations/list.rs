use tracing::{error, warn};

use crate::protocol::FtpSession;

/// Lists the file names of a remote directory on a caller-held session
///
/// # Arguments
///
/// * `session` - A borrowed session; stays borrowed afterwards
/// * `remote_path` - Directory to change into before NLST
///
/// # Returns
///
/// The names as reported by the server, or `None` if the directory change
/// or the listing failed. The session's working directory is left at
/// `remote_path` on success.
pub(crate) async fn list_names<S: FtpSession>(
    session: &mut S,
    remote_path: &str,
) -> Option<Vec<String>> {
    match session.change_working_directory(remote_path).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(remote = remote_path, reply_code = %session.reply_code(), "Failed to change directory");
            return None;
        }
        Err(e) => {
            error!(remote = remote_path, error = %e, "Failed to change directory");
            return None;
        }
    }

    match session.list_names().await {
        Ok(Some(names)) => Some(names),
        Ok(None) => {
            warn!(remote = remote_path, reply_code = %session.reply_code(), "Server rejected listing");
            None
        }
        Err(e) => {
            error!(remote = remote_path, error = %e, "Failed to list remote directory");
            None
        }
    }
}
