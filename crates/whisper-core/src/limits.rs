//! Size policy applied before a message is encoded
//!
//! The codec itself only enforces the 4-byte length fields. These limits keep
//! archives to sizes a recipient can reasonably be expected to accept.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use whisper_crypto::Message;

use crate::error::{WhisperError, WhisperResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_recipients: usize,
    pub max_title_bytes: usize,
    pub max_content_bytes: usize,
    pub max_attachment_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_recipients: 16,
            max_title_bytes: 1 << 10,
            max_content_bytes: 1 << 20,
            max_attachment_bytes: 128 << 20,
        }
    }
}

impl Limits {
    /// Check `message` against these limits, including the on-disk size of
    /// every attachment.
    pub fn check(&self, message: &Message) -> WhisperResult<()> {
        if message.recipients.is_empty() {
            return Err(WhisperError::Limit("at least one recipient is required".into()));
        }
        if message.recipients.len() > self.max_recipients {
            return Err(WhisperError::Limit(format!(
                "{} recipients exceeds the maximum of {}",
                message.recipients.len(),
                self.max_recipients
            )));
        }
        check_len("title", message.title.len(), self.max_title_bytes)?;
        check_len("content", message.content.len(), self.max_content_bytes)?;

        let mut attachment_bytes = 0u64;
        for path in message.images.iter().chain(&message.videos) {
            attachment_bytes += self.check_attachment(path)?;
        }
        debug!(
            recipients = message.recipients.len(),
            attachments = message.images.len() + message.videos.len(),
            attachment_bytes,
            "message within limits"
        );
        Ok(())
    }

    pub fn check_attachment(&self, path: &Path) -> WhisperResult<u64> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(WhisperError::Limit(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let size = meta.len();
        let max = self.max_attachment_bytes.min(u64::from(u32::MAX));
        if size > max {
            return Err(WhisperError::Limit(format!(
                "{} is {size} bytes, over the {max} byte attachment limit",
                path.display()
            )));
        }
        Ok(size)
    }
}

fn check_len(field: &str, len: usize, max: usize) -> WhisperResult<()> {
    if len > max {
        return Err(WhisperError::Limit(format!(
            "{field} is {len} bytes, over the {max} byte limit"
        )));
    }
    Ok(())
}
