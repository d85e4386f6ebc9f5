//! Command line tools for Tidepool
//!
//! The `tidepool` binary runs a durable emitter over stdin and inspects
//! partition files offline. The pieces live here so they can be tested
//! without spawning the binary.

pub mod commands;
pub mod config;
