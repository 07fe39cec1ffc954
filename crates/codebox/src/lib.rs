//! Codebox: an execution engine for code submitted by chat agents.
//!
//! The engine turns an untrusted Python snippet into a bounded, observable
//! execution. It screens the text against an advisory policy, runs it in a
//! dedicated interpreter process with a curated capability table, captures
//! stdout and generated files (including rendered charts), and returns a
//! single [`ExecutionOutcome`] no matter how the run ended.
//!
//! The policy gate is signature-based filtering, not isolation. Nothing in
//! this crate is a security boundary against a determined author.

#![forbid(unsafe_code)]
// Library documentation is in progress. Public API types have docs;
// internal types will be documented in future releases.
#![allow(missing_docs)]

pub mod capability;
pub mod chart;
pub mod config;
pub mod history;
pub mod model;
pub mod policy;
pub mod report;
pub mod runner;
pub mod worker;

pub use crate::model::*;
pub use crate::runner::{Engine, EngineError, EngineResult, ErrorCode};
