//! Command handlers.
//!
//! Each handler builds the engine pieces its command needs, runs one task
//! to completion and formats the outcome for the terminal. Ctrl-C stops the
//! running task instead of killing the process.

pub mod fetch_tool;
pub mod install;
