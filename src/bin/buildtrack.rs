//! buildtrack CLI binary
//!
//! Command-line interface for build directory tracking and garbage collection.

use anyhow::Context;
use buildtrack::logging::init_logging;
use buildtrack::tooling::cli::{Cli, CliContext};
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<String> {
    let context = CliContext::new(cli.work_dir.clone(), cli.config.clone())
        .context("Error initializing workspace")?;

    let logging = cli.logging_config(&context.config().logging, &cli.work_dir)?;
    init_logging(Some(&logging))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let token = CancellationToken::new();
    let context = context.with_cancellation(token.clone());

    runtime.block_on(async move {
        let signal_token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current item");
                signal_token.cancel();
            }
        });

        let output = tokio::task::spawn_blocking(move || context.execute(&cli.command))
            .await
            .context("Command task failed")??;
        Ok(output)
    })
}
