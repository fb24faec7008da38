//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod restart;
pub mod run;
pub mod runs;
pub mod stop;
