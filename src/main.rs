mod backoff;
mod cli;
mod clock;
mod config;
mod exclude;
mod interrupt;
mod logging;
mod model;
mod policy;
mod processor;
mod queue;
mod slaveapi;
mod state;
mod supervisor;

use std::process;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();

    if let Err(e) = cli::run(&cli) {
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}
