//! Task execution engine for autonomous robot agents.
//!
//! A robot execution walks a fixed pipeline of phases (inspiration, goals,
//! tasks, run, delivery, learning). Each phase asks an assistant, a tool or a
//! subprocess for work; the run phase drives multi-turn assistant
//! conversations and checks every output with a two-layer validator.
//!
//! - **[`core`]**: Pure, deterministic logic (types, assertions, rule parsing,
//!   verdict merging, plan parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, subprocess backends,
//!   prompt rendering, delivery channels, execution records).
//!
//! Orchestration modules ([`pipeline`], [`phases`], [`task_runner`],
//! [`validator`]) coordinate core logic with I/O behind the backend traits.

pub mod context;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod phases;
pub mod pipeline;
pub mod robot;
pub mod task_runner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validator;
