//! Ingester CLI entry point.

use ingester_lib::cli::{self, Cli};
use ingester_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
