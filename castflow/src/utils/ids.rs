//! Identifier generation for runs and schedules.

use uuid::Uuid;

use super::{compact_stamp, Timestamp};

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Builds a readable, collision-resistant identifier.
///
/// The shape is `{prefix}_{label}_{YYYYmmdd_HHMMSS}_{8 hex}`; the suffix
/// keeps ids distinct when two runs for the same label start within one
/// second. The prefix is omitted when empty.
#[must_use]
pub fn readable_id(prefix: &str, label: &str, at: &Timestamp) -> String {
    let suffix = generate_uuid().simple().to_string();
    let label = sanitize_label(label);
    let short = &suffix[..8];
    if prefix.is_empty() {
        format!("{label}_{}_{short}", compact_stamp(at))
    } else {
        format!("{prefix}_{label}_{}_{short}", compact_stamp(at))
    }
}

/// Returns true if `id` is safe to use as a file stem.
#[must_use]
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}
