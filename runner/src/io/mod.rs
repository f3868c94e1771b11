//! Side-effecting collaborators: subprocesses, assistant and tool backends,
//! delivery channels, prompt rendering, config and execution records.

pub mod assistant;
pub mod config;
pub mod delivery;
pub mod execution_log;
pub mod process;
pub mod prompt;
pub mod robot_store;
pub mod tools;
