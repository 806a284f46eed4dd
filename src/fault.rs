//! Escalation path for internal logic defects.
//!
//! Request errors travel through `FileDataError`; this module is for states
//! that only a bug in our own code can produce. Continuing after one risks
//! writing data under the wrong key, so the current task is torn down.

use std::fmt::Display;

/// Log the defect and panic the current task.
#[track_caller]
pub fn invalid_internal_state(detail: impl Display) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%location, "invalid internal state: {detail}");
    panic!("invalid internal state: {detail}");
}
