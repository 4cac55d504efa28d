//! I/O boundaries: filesystem, git, subprocesses and the session host.

pub mod config;
pub mod git;
pub mod host;
pub mod plan;
pub mod process;
pub mod prompt;
pub mod report_log;
pub mod skills;
pub mod todo_store;
