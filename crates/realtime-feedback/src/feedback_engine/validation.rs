//! Change event validation

use crate::error::FeedbackError;
use crate::feedback::ChangeEvent;
use crate::utils::TextUtils;

pub const MAX_FILE_PATH_BYTES: usize = 4096;

/// Reject malformed events before any session state is touched.
pub fn validate_change(event: &ChangeEvent, max_content_bytes: usize) -> Result<(), FeedbackError> {
    if event.session_id.is_empty() {
        return Err(FeedbackError::invalid("session id is required"));
    }
    if event.file_path.trim().is_empty() {
        return Err(FeedbackError::invalid("file path is required"));
    }
    if event.file_path.len() > MAX_FILE_PATH_BYTES {
        return Err(FeedbackError::invalid(format!(
            "file path exceeds {} bytes",
            MAX_FILE_PATH_BYTES
        )));
    }
    if event.content.len() > max_content_bytes {
        return Err(FeedbackError::invalid(format!(
            "content of {} bytes exceeds the {} byte limit",
            event.content.len(),
            max_content_bytes
        )));
    }
    if event.content.contains('\0') {
        return Err(FeedbackError::invalid("content contains NUL bytes"));
    }

    let content = TextUtils::normalize_line_endings(&event.content);
    let line = TextUtils::line_at(&content, event.cursor.line as usize).ok_or_else(|| {
        FeedbackError::invalid(format!(
            "cursor line {} is beyond the last line ({})",
            event.cursor.line,
            TextUtils::line_count(&content) - 1
        ))
    })?;
    let line_len = TextUtils::char_len(line);
    if event.cursor.column as usize > line_len {
        return Err(FeedbackError::invalid(format!(
            "cursor column {} is beyond the end of line {} ({} chars)",
            event.cursor.column, event.cursor.line, line_len
        )));
    }

    if let Some(trigger) = event.trigger_character {
        if trigger.is_whitespace() || trigger.is_control() {
            return Err(FeedbackError::invalid("trigger character must be printable"));
        }
    }

    Ok(())
}
