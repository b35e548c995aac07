use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use overflow_lab::cli::{exit_code, run_allocation, AllocationArgs, SizeCheck};

/// Allocate an int array after checking the size computation cannot wrap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    allocation: AllocationArgs,
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();
    let config = args.allocation.load_config()?;

    let outcome = run_allocation(
        SizeCheck::Checked,
        &config,
        &mut io::stdin().lock(),
        &mut io::stdout().lock(),
    )?;
    Ok(exit_code(outcome.exit_code()))
}
