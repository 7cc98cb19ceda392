//! Command handlers for the CLI
//!
//! - `check` -- lifecycle smoke sequence against one server

pub mod check;
