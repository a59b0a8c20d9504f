//! remedy library crate
//!
//! Collects defects from analyzers, type checkers and test runners, then
//! repairs them one at a time: generate candidate fixes, apply the chosen one,
//! verify against the regression suite and roll back on failure.

pub mod apply;
pub mod collect;
pub mod command;
pub mod config;
pub mod defect;
pub mod error;
pub mod fix;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod prioritize;
pub mod reasoning;
pub mod report;
pub mod store;
pub mod util;
pub mod verify;
