//! Delegation reliability and phase-execution engine.
//!
//! A coordinator hands tasks to agent sessions it does not control, decides
//! when each session is done or stuck, retries on a fallback model, and
//! validates finished work before accepting it.
//!
//! - **[`core`]**: pure logic (todo parsing, contracts, signals, scope and
//!   frontend checks). No I/O.
//! - **[`io`]**: side effects (config, git, subprocesses, the session host).
//!
//! Orchestration lives at the crate root: [`poller`] watches one session,
//! [`retry`] wraps it with fallback retries, [`launcher`] starts sessions,
//! [`delegate`] is the single-task call surface, and [`phase`] runs a whole
//! phase, with [`validate`] gating each finished task and [`report`]
//! summarizing the result.

pub mod core;
pub mod delegate;
pub mod exit_codes;
pub mod io;
pub mod launcher;
pub mod logging;
pub mod phase;
pub mod poller;
pub mod report;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
