//! NodeFit: Kubernetes operator for in-place pod limit right-sizing
//!
//! This crate provides an operator that watches pods opted in via
//! `nodefit.io/*` annotations and resizes their container limits to fit
//! the real capacity of the node they were scheduled onto, without
//! restarting the workload.

pub mod controller;
pub mod error;

pub use crate::error::{Error, Result};
