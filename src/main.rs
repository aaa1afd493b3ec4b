#![allow(clippy::enum_variant_names, clippy::module_inception)]

use std::{fs::OpenOptions, sync::Mutex};

use clap::Parser as _;
use snafu::ResultExt;
use tracing::debug;
use tracing_subscriber::fmt::writer::MakeWriterExt as _;

use crate::{
    application::{
        Application, ApplicationError, ConfigSnafu, LogFileSnafu, RuntimeConfig,
    },
    cli::Cli,
};

mod application;
mod cli;
mod config;
mod ext;
mod scheduler;
mod sync;

#[compio::main]
#[snafu::report]
async fn main() -> Result<(), ApplicationError> {
    let cli_args = Cli::parse();
    let runtime_config = RuntimeConfig::load(cli_args).await.context(ConfigSnafu)?;
    setup_tracing(&runtime_config).context(LogFileSnafu)?;
    debug!("Resolved runtime configuration: {runtime_config:?}");

    Application::run(runtime_config).await?;

    Ok(())
}

/// Console output always; with `--log`, every line is appended to that file too.
fn setup_tracing(config: &RuntimeConfig) -> std::io::Result<()> {
    let Some(level) = config.log_level.to_tracing_level() else {
        return Ok(());
    };
    let builder = tracing_subscriber::fmt().with_max_level(level).compact();

    match &config.log {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}
