//! Pipeline runs.
//!
//! # Module Structure
//!
//! | Module    | Purpose                                              |
//! |-----------|------------------------------------------------------|
//! | `run`     | State machine driving the stages of one run          |
//! | `stages`  | Real build/package/deploy/verify wiring              |
//! | `lock`    | Concurrency groups and cancellation                  |
//! | `report`  | JSON run reports under `<state>/runs`                |
//! | `trigger` | Push/manual events and which of them start a run     |
//! | `error`   | Stage failure taxonomy                               |

mod error;
mod lock;
mod report;
mod run;
mod stages;
mod trigger;

pub use error::{StageError, chain, is_cancellation};
pub use lock::{RunLease, install_interrupt_handler};
pub use report::{RunReport, RunStatus, new_run_id, short_sha};
pub use run::{Run, Scope};
pub use stages::LiveStages;
pub use trigger::Trigger;
