// src/main.rs

use taskdag_cli::{cli, logging, run};

fn main() {
    // Exit codes: 0 on success, 1 on any generation failure; clap exits
    // with 2 on invalid usage.
    if let Err(err) = run_main() {
        eprintln!("taskdag error: {err:?}");
        std::process::exit(1);
    }
}

fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args)
}
