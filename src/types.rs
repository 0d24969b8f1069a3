use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::FtpClientConfig;

/// Three-digit FTP reply code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ReplyCode(pub u16);

impl ReplyCode {
    pub const COMMAND_OK: Self = Self(200);
    pub const SERVICE_READY: Self = Self(220);
    pub const SERVICE_CLOSING_CONTROL: Self = Self(221);
    pub const CLOSING_DATA_CONNECTION: Self = Self(226);
    pub const USER_LOGGED_IN: Self = Self(230);
    pub const FILE_ACTION_OK: Self = Self(250);
    pub const NEED_PASSWORD: Self = Self(331);
    pub const SERVICE_NOT_AVAILABLE: Self = Self(421);
    pub const NOT_LOGGED_IN: Self = Self(530);
    pub const FILE_UNAVAILABLE: Self = Self(550);

    /// 1xx: action started, expect another reply
    pub fn is_positive_preliminary(self) -> bool {
        (100..200).contains(&self.0)
    }

    /// 2xx: the requested action completed
    pub fn is_positive_completion(self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 3xx: accepted, more information needed
    pub fn is_positive_intermediate(self) -> bool {
        (300..400).contains(&self.0)
    }

    /// 4xx: not accepted, may succeed if retried
    pub fn is_negative_transient(self) -> bool {
        (400..500).contains(&self.0)
    }

    /// 5xx: not accepted and will not succeed if retried
    pub fn is_negative_permanent(self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ReplyCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

/// Representation used for file transfers (`TYPE I` / `TYPE A`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferFileType {
    #[default]
    Binary,
    Ascii,
}

/// Internal configuration wrapper with Arc for shared ownership
#[derive(Debug, Clone)]
pub(crate) struct FtpClientConfigArc {
    pub(crate) inner: Arc<FtpClientConfig>,
}

impl From<FtpClientConfig> for FtpClientConfigArc {
    fn from(config: FtpClientConfig) -> Self {
        Self {
            inner: Arc::new(config),
        }
    }
}

impl std::ops::Deref for FtpClientConfigArc {
    type Target = FtpClientConfig;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_code_categories() {
        assert!(ReplyCode(150).is_positive_preliminary());
        assert!(ReplyCode::SERVICE_READY.is_positive_completion());
        assert!(ReplyCode::NEED_PASSWORD.is_positive_intermediate());
        assert!(ReplyCode::SERVICE_NOT_AVAILABLE.is_negative_transient());
        assert!(ReplyCode::NOT_LOGGED_IN.is_negative_permanent());

        assert!(!ReplyCode::NOT_LOGGED_IN.is_positive_completion());
        assert!(!ReplyCode(0).is_positive_completion());
        assert!(!ReplyCode(300).is_positive_completion());
    }

    #[test]
    fn transfer_type_uses_lowercase_names() {
        let ty: TransferFileType = serde_json::from_str("\"ascii\"").unwrap();
        assert_eq!(ty, TransferFileType::Ascii);
        assert_eq!(
            serde_json::to_string(&TransferFileType::Binary).unwrap(),
            "\"binary\""
        );
    }
}
