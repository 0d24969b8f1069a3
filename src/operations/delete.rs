use tracing::{debug, error, warn};

use crate::client::FtpClient;
use crate::protocol::FtpSession;
use crate::utils::check_session;

/// Deletes `file_name` inside `remote_path`
///
/// The DELE reply is only logged: a missing file still counts as success as
/// long as the command reached the server. A failed directory change is
/// logged and DELE is sent relative to the current directory.
pub(crate) async fn delete_file<S: FtpSession>(
    client: &FtpClient<S>,
    remote_path: &str,
    file_name: &str,
) -> bool {
    let mut session = match client.pool.borrow().await {
        Ok(session) => Some(session),
        Err(e) => {
            error!(remote = remote_path, error = %e, "Failed to borrow session for delete");
            None
        }
    };

    let sent = match session.as_mut() {
        Some(session) if check_session(&**session) => {
            match session.change_working_directory(remote_path).await {
                Ok(true) => {}
                Ok(false) => warn!(remote = remote_path, reply_code = %session.reply_code(), "Failed to change directory"),
                Err(e) => warn!(remote = remote_path, error = %e, "Failed to change directory"),
            }
            match session.delete_file(file_name).await {
                Ok(reply_code) => {
                    debug!(remote = remote_path, file = file_name, %reply_code, "Delete command sent");
                    true
                }
                Err(e) => {
                    error!(remote = remote_path, file = file_name, error = %e, "Delete failed");
                    false
                }
            }
        }
        _ => false,
    };
    client.pool.release(session).await;
    sent
}
