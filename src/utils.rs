use tracing::warn;

use crate::protocol::FtpSession;

/// Readiness check run before every transfer on a borrowed session.
///
/// Lighter than the pool's NOOP validation: it only looks at the last reply
/// code, which stays negative when the session's login (or the command that
/// followed it) was rejected.
pub(crate) fn check_session<S: FtpSession>(session: &S) -> bool {
    let reply_code = session.reply_code();
    if !reply_code.is_positive_completion() {
        warn!(%reply_code, "FTP server refused connection");
        return false;
    }
    true
}
