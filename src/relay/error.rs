//! Error taxonomy for the relay pipeline.

use std::fmt;

use crate::relay::progress::format_size;

/// Errors that can end a relay attempt.
///
/// All of these are caught at the top of the per-message pipeline and turned
/// into a single user-facing message; none may crash the dispatcher. Cleanup
/// failures are logged where they happen and never reach this type.
#[derive(Debug)]
pub enum RelayError {
    /// The message text is not a link on the accepted host list.
    InvalidLink,
    /// The unlocking API was unreachable, returned a bad status, or its
    /// response was missing the expected fields.
    Extraction(String),
    /// The file's known size exceeds the transfer ceiling. Rejected before
    /// any bytes are streamed.
    TooLarge { size: u64, limit: u64 },
    /// Network or storage failure while streaming from the direct link.
    Download { reason: String, direct_url: String },
    /// The chat platform rejected the delivery. The direct link is still
    /// usable as a fallback.
    Upload { reason: String, direct_url: String },
}

impl RelayError {
    /// The direct link to offer as a fallback, when one was resolved.
    pub fn direct_url(&self) -> Option<&str> {
        match self {
            Self::Download { direct_url, .. } | Self::Upload { direct_url, .. } => {
                Some(direct_url.as_str())
            }
            _ => None,
        }
    }

    /// One user-facing message per failure, distinguishing download from
    /// upload so the user knows whether the direct link is worth trying.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidLink => {
                "❌ Invalid TeraBox link!\n\nSend a share link from terabox.com or one of its mirrors."
                    .to_string()
            }
            Self::Extraction(_) => "❌ Failed to extract the link. Try again later.".to_string(),
            Self::TooLarge { size, limit } => format!(
                "❌ File is too large ({}). The limit is {}.",
                format_size(*size),
                format_size(*limit)
            ),
            Self::Download { .. } => {
                "❌ Download failed. The direct link below may still work.".to_string()
            }
            Self::Upload { .. } => {
                "❌ Upload to Telegram failed. You can still use the direct link below.".to_string()
            }
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLink => write!(f, "not a supported link"),
            Self::Extraction(reason) => write!(f, "link extraction failed: {reason}"),
            Self::TooLarge { size, limit } => {
                write!(f, "file too large: {size} bytes (limit {limit})")
            }
            Self::Download { reason, .. } => write!(f, "download failed: {reason}"),
            Self::Upload { reason, .. } => write!(f, "upload failed: {reason}"),
        }
    }
}

impl std::error::Error for RelayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_failure_keeps_direct_url() {
        let err = RelayError::Download {
            reason: "connection reset".to_string(),
            direct_url: "https://d.example/file".to_string(),
        };
        assert_eq!(err.direct_url(), Some("https://d.example/file"));
        assert!(err.user_message().contains("Download failed"));
    }

    #[test]
    fn test_upload_failure_distinct_from_download() {
        let err = RelayError::Upload {
            reason: "413".to_string(),
            direct_url: "https://d.example/file".to_string(),
        };
        assert!(err.user_message().contains("Upload"));
        assert!(!err.user_message().contains("Download failed"));
    }

    #[test]
    fn test_too_large_has_no_fallback_link() {
        let err = RelayError::TooLarge {
            size: 3 * 1024 * 1024 * 1024,
            limit: 2 * 1024 * 1024 * 1024,
        };
        assert_eq!(err.direct_url(), None);
        assert!(err.user_message().contains("3 GB"));
        assert!(err.user_message().contains("2 GB"));
    }
}
