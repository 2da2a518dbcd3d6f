// src/lib.rs

pub mod cli;
pub mod commands;
pub mod logging;

use anyhow::Result;

use crate::cli::{Cli, Command};
use crate::commands::Phase;

/// High-level entry point used by `main.rs`.
pub fn run(args: Cli) -> Result<()> {
    match &args.command {
        Command::Full(show) => commands::show(Phase::Full, show),
        Command::Target(show) => commands::show(Phase::Target, show),
        Command::TargetGraph(show) => commands::show(Phase::TargetGraph, show),
        Command::Optimized(show) => commands::show(Phase::Optimized, show),
        Command::Morphed(show) => commands::show(Phase::Morphed, show),
        Command::Decision(decision) => commands::decision(decision),
    }
}
