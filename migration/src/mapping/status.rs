//! Legacy message status normalisation.

use hearth_types::MessageStatus;

/// Collapse the legacy status vocabulary to the three persisted statuses.
///
/// In-flight statuses (`sending`, `pending`, `searching`, `processing`)
/// can only appear in an export if the app was closed mid-stream; whatever
/// content made it into blocks is kept, so they normalise to `success`.
#[must_use]
pub fn normalize_status(status: Option<&str>) -> MessageStatus {
    match status {
        Some("error") => MessageStatus::Error,
        Some("paused") => MessageStatus::Paused,
        _ => MessageStatus::Success,
    }
}
