//! Core types and the reviewer assignment policy.
//!
//! This crate is free of I/O: it defines the data model shared by the
//! workflow engine and the CLI, and the pure selection rules that decide who
//! reviews a pull request.

pub mod model;
pub mod policy;

pub use model::*;
pub use policy::{select_initial_reviewers, select_replacement, NoCandidate, MAX_INITIAL_REVIEWERS};
