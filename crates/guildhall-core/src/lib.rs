// SPDX-License-Identifier: MIT

mod bus;
mod event;
mod translator;

pub use bus::{EventBus, Unsubscribe};
pub use event::{Event, SessionStatus};
pub use translator::translate;
