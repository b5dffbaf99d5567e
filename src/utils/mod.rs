//! Helpers shared by the pipeline stages.

pub mod exec;
pub mod git;
