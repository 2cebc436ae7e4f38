//! Orchestration engine for long-running, multi-threaded seed searches.
//!
//! A [`search::SearchRegistry`] hands out [`search::SearchInstance`]s. Each
//! instance runs one job at a time on a kernel supplied by an injected
//! [`kernel::KernelFactory`], stores every result it reports, and fans
//! throttled progress out to any number of subscribers (the web API in
//! [`web`], the terminal surface in [`terminal`]).

pub mod config;
pub mod diagnostics;
pub mod kernel;
pub mod search;
pub mod telemetry;
pub mod terminal;
pub mod utils;
pub mod web;
