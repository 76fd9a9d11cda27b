// SPDX-License-Identifier: MIT

mod jobs;
mod lock_table;
mod sessions;

pub use jobs::{JobMetadata, JobStatus, JobStore};
pub use sessions::{MessageRole, MetadataPatch, SessionMetadata, SessionStore, StoreError, StoredMessage};
