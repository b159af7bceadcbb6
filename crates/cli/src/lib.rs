//! Command-line front end for cdptun: the `tunnel` side that drives a remote
//! browser and the `operator` relay it reports to.

pub mod cli;
pub mod commands;
pub mod discover;
pub mod error;
pub mod logging;
pub mod operator;
