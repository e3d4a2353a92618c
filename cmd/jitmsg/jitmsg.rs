use clap::Parser;

mod cli;
mod initializers;

use crate::cli::CLI;
use crate::initializers::init_tracing;

fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();
    init_tracing(&opts)?;
    command.run()
}
