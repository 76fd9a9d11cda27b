// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

/// A session's lifecycle state (spec §3 "Session"). Shared between the
/// persistence layer and the event/translator layer so both speak the same
/// wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Expired,
    Error,
}
