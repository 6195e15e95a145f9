//! Frameseek CLI - keyframe search with iterative query refinement.

use anyhow::Result;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

use commands::Cli;

/// Initialize tracing with optional file logging.
///
/// In JSON mode all tracing output goes to stderr with ANSI disabled so
/// stdout carries only the JSON document. The returned guard flushes the
/// file writer and must live until exit.
fn init_tracing(
    log_file: Option<&std::path::Path>,
    json_mode: bool,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    let default_filter = if verbose {
        "frameseek=debug,frameseek_core=debug,frameseek_embedding=debug,frameseek_redis=debug"
    } else {
        "frameseek=info,frameseek_core=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!json_mode);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(env_filter).with(console).init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref(), cli.json_output(), cli.verbose)?;
    cli.execute().await
}
