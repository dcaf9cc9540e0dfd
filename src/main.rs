use clap::Parser;
use color_eyre::Result;

use tunwarden::cli::args::Args;
use tunwarden::cli::commands;

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    commands::handle(args)
}
