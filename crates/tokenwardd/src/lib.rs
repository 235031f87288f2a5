//! Library half of the daemon so subcommands can be driven from tests.

pub mod daemon;
