//! Deterministic, pure logic shared by the execution engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod assertion;
pub mod budget;
pub mod feedback;
pub mod heuristics;
pub mod json;
pub mod plan;
pub mod rules;
pub mod types;
pub mod verdict;
