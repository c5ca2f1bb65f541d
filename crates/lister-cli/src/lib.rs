//! Library side of the `lister` command-line tool.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod render;
