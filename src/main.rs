mod cli;
mod countdown;
mod error;
mod foreground;
mod launch;
mod logging;
mod metrics;
mod model;
mod orchestrator;
mod queue;
mod storage;
mod template;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_text = match &args.command {
        None => args.run.text,
        Some(cli::Command::Run(run)) => run.text,
        Some(_) => true,
    };

    match cli::run(args).await {
        Ok(()) => {
            // The stdin reader thread may still be blocked on a read; don't wait for it.
            if is_text {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}
