// SPDX-License-Identifier: MIT

use axum::http::StatusCode;
use thiserror::Error;

/// Errors the Agent Session Manager can return. Each carries the status
/// code its HTTP handler should answer with (spec §7: "Session-manager
/// errors of this kind carry an explicit status code attribute").
#[derive(Debug, Error)]
pub enum SessionManagerError {
    #[error("session {0:?} not found")]
    NotFound(String),
    #[error("session {0:?} already has a running query")]
    AlreadyRunning(String),
    #[error("no query is running for session {0:?}")]
    NotRunning(String),
    #[error("session {0:?} has expired; start a new session")]
    Expired(String),
    #[error("unknown guild member {0:?}")]
    UnknownMember(String),
    #[error(transparent)]
    Store(#[from] guildhall_store::StoreError),
    #[error(transparent)]
    Lifecycle(#[from] guildhall_mcp::LifecycleError),
}

impl SessionManagerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyRunning(_) => StatusCode::CONFLICT,
            Self::NotRunning(_) => StatusCode::CONFLICT,
            Self::Expired(_) => StatusCode::CONFLICT,
            Self::UnknownMember(_) => StatusCode::BAD_REQUEST,
            Self::Store(guildhall_store::StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Lifecycle(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
