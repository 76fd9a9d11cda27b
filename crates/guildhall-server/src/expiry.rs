// SPDX-License-Identifier: MIT

use chrono::Utc;
use guildhall_core::SessionStatus;
use guildhall_store::SessionMetadata;

/// Read-path-only status projection (SPEC_FULL.md §E, Open Question 2): an
/// `idle`/`completed` session whose last activity is older than
/// `ttl_hours` reports as `expired` to readers without ever being
/// persisted that way, so it never races a concurrent `runQuery`.
pub fn effective_status(meta: &SessionMetadata, ttl_hours: u64) -> SessionStatus {
    if matches!(meta.status, SessionStatus::Idle | SessionStatus::Completed) {
        let age = Utc::now().signed_duration_since(meta.last_activity_at);
        if age > chrono::Duration::hours(ttl_hours as i64) {
            return SessionStatus::Expired;
        }
    }
    meta.status
}
