//! Binary-side orchestration: run flow, progress rendering, exit codes.

pub(crate) mod exit_handler;
pub(crate) mod progress_manager;
pub(crate) mod runtime;
