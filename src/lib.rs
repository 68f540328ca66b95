//! Local, agent-neutral learning memory for AI coding assistants: a curated
//! playbook of rules plus per-session diary, time-decayed scoring, and
//! reflection-driven curation.
//!
//! This crate ships no LLM provider and no `cass` binary; both are
//! abstracted behind the `Oracle` and `HistoryTool` traits so a host can
//! supply its own implementation and call [`pipeline::run_reflect`]
//! directly.

pub mod cli;
pub mod config;
pub mod context;
pub mod curation;
pub mod error;
pub mod history;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod reflection;
pub mod safety;
pub mod scoring;
pub mod storage;
pub mod validation;
