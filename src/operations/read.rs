use std::io::Cursor;
use tracing::{error, warn};

use crate::protocol::FtpSession;
use crate::utils::check_session;

/// Retrieves `remote_file` into `buffer` and returns a reader over it.
///
/// Bytes are appended to `buffer`; the returned cursor reads a copy of the
/// whole buffer, so the caller keeps the original.
pub(crate) async fn read_as_stream<S: FtpSession>(
    buffer: &mut Vec<u8>,
    session: &mut S,
    remote_file: &str,
) -> Option<Cursor<Vec<u8>>> {
    if !check_session(&*session) {
        return None;
    }
    match session.retrieve_file(remote_file, &mut *buffer).await {
        Ok(true) => Some(Cursor::new(buffer.clone())),
        Ok(false) => {
            warn!(remote = remote_file, reply_code = %session.reply_code(), "Server rejected download");
            None
        }
        Err(e) => {
            error!(remote = remote_file, error = %e, "Failed to read remote file");
            None
        }
    }
}
