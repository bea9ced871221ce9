//! # flashcheck
//!
//! Station side of post-flash validation: serial links, session runners,
//! configuration, the CLI and the read-only query API. The pure logic lives
//! in `flashcheck-core`.

pub mod api;
pub mod cli;
pub mod config;
pub mod link;
pub mod runner;
