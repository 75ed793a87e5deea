//! Command-line interface for queue-probe.
//!
//! Parses the connection and queue options, opens the store connection and
//! the control-plane mailbox, and runs the probe.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
