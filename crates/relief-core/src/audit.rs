//! Append-only audit trail management.
//!
//! A trail is an ordered list of [`AuditEntry`] values. It only ever
//! grows by [`append_entry`], a pure function that returns a new list
//! and never touches its input, so two holders of the same trail can
//! never alias each other's history.
//!
//! # Invariants
//!
//! - The first entry of a trail created by this crate is `create`.
//! - Timestamps are non-decreasing. An entry stamped earlier than its
//!   predecessor (clock skew between writers) takes the predecessor's
//!   timestamp instead.
//! - Entries are never removed or reordered.

use chrono::{DateTime, Utc};
use relief_types::{AuditEntry, ChangeAction};

/// A trail that violates one of the module invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrailError {
    /// The trail has no entries.
    #[error("audit trail is empty")]
    Empty,

    /// The first entry is not a `create`.
    #[error("audit trail starts with {found:?} instead of create")]
    MissingCreate {
        /// The action found at position 0.
        found: ChangeAction,
    },

    /// An entry is stamped before its predecessor.
    #[error("audit trail entry {index} goes back in time")]
    OutOfOrder {
        /// Position of the offending entry.
        index: usize,
    },
}

/// Return `existing` with one entry for `action` appended.
///
/// An absent trail (legacy or malformed record) is treated as empty.
/// `actor` is recorded verbatim; validating it is the caller's job.
pub fn append_entry(
    existing: Option<&[AuditEntry]>,
    action: ChangeAction,
    actor: &str,
    timestamp: DateTime<Utc>,
) -> Vec<AuditEntry> {
    let existing = existing.unwrap_or_default();
    let timestamp = existing
        .last()
        .map_or(timestamp, |last| last.timestamp.max(timestamp));

    let mut trail = Vec::with_capacity(existing.len().saturating_add(1));
    trail.extend_from_slice(existing);
    trail.push(AuditEntry {
        action,
        user_id: actor.to_owned(),
        timestamp,
    });
    trail
}

/// The trail of a freshly created record.
pub fn new_trail(actor: &str, timestamp: DateTime<Utc>) -> Vec<AuditEntry> {
    append_entry(None, ChangeAction::Create, actor, timestamp)
}

/// Check a trail against the module invariants.
///
/// # Errors
///
/// Returns the first [`TrailError`] found, scanning from the start.
pub fn validate_trail(trail: &[AuditEntry]) -> Result<(), TrailError> {
    let first = trail.first().ok_or(TrailError::Empty)?;
    if first.action != ChangeAction::Create {
        return Err(TrailError::MissingCreate {
            found: first.action,
        });
    }

    for (i, pair) in trail.windows(2).enumerate() {
        if let [prev, next] = pair
            && next.timestamp < prev.timestamp
        {
            return Err(TrailError::OutOfOrder {
                index: i.saturating_add(1),
            });
        }
    }

    Ok(())
}
