// SPDX-License-Identifier: MIT

mod bridge;

pub use bridge::{JobFilter, WorkerDispatchBridge};
