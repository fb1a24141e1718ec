use clap::Parser;
use nestegg::api::{Cli, run};
use tracing::error;

#[tokio::main]
async fn main() {
    nestegg::logging::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
