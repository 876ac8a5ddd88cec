use anyhow::Result;
use clap::Parser;
use dropgate::{cli, commands};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize logging. Diagnostics go through tracing on stderr; the
    // operator-facing output (public URL, completion message) stays on plain
    // stdout. Only use ANSI when outputting to a TTY (not when piped to file).
    let use_color = atty::is(atty::Stream::Stderr);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(use_color)
        .init();

    let result = commands::cmd_share(cli).await;

    // Handle errors
    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    result
}
