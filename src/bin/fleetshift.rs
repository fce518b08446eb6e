//! Shim binary that calls into the `fleetshift_operator` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;
use fleetshift_operator::cli::Cli;

fn main() -> Result<()> {
    // Delegate to library entrypoint
    fleetshift_operator::inner_main(Cli::parse())
}
