//! jidl - command-line industrial data logger.
//!
//! Loads a configuration file, optionally autostarts logging, and then
//! waits for single-character commands on stdin: `s` starts the logging,
//! `p` pauses it, `q` quits. Ctrl-C runs the same shutdown path as `q`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use jidl_core::app::{App, AppOptions, NoDrivers};
use jidl_core::config::{LoggerConfig, SinkKind};
use jidl_core::error::ConfigError;
use jidl_core::sink::{DummySink, Sink};
use jidl_sink_sqlite::SqliteSink;

/// Industrial data logger.
#[derive(Debug, Parser)]
#[command(name = "jidl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file to load
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Start logging immediately after loading
    #[arg(short = 'a', long = "autostart")]
    autostart: bool,

    /// Allow start/stop through the IPC server
    #[arg(short = 'r', long = "remote-control")]
    remote_control: bool,
}

fn make_sink(config: &LoggerConfig) -> Result<Arc<dyn Sink>, ConfigError> {
    match config.kind {
        SinkKind::Dummy => Ok(Arc::new(DummySink::new(&config.name, config.dir.clone()))),
        SinkKind::Sqlite => Ok(Arc::new(SqliteSink::new(&config.name, &config.dir)?)),
        // Network SQL stores need drivers this build does not carry.
        SinkKind::MariaDb | SinkKind::MonetDb => {
            Err(ConfigError::UnsupportedSink(config.kind.name().to_string()))
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let options = AppOptions {
        autostart: cli.autostart,
        remote_control: cli.remote_control,
    };

    let app = match App::load(&cli.config, options, &make_sink, &NoDrivers).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: cannot load {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&app).await {
        eprintln!("Error: {e}");
        app.shutdown().await;
        std::process::exit(1);
    }

    println!("Shutting down...");
    app.shutdown().await;
}

async fn run(app: &App) -> anyhow::Result<()> {
    if app.options.autostart {
        app.logger
            .start(None)
            .await
            .context("cannot start logging")?;
        tracing::info!("logging started");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Enter [s] to start logging, [p] to pause, [q] to quit.");
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            line = lines.next_line() => line.context("cannot read stdin")?,
        };
        let Some(line) = line else {
            // stdin closed: keep the logger running until a signal.
            tokio::signal::ctrl_c().await.ok();
            return Ok(());
        };

        match line.trim() {
            "s" => {
                if let Err(e) = app.logger.start(None).await {
                    println!("Cannot start logging: {e}");
                }
            }
            "p" => app.logger.stop().await,
            "q" => return Ok(()),
            "" => {}
            other => println!("Unknown command: {other}"),
        }
    }
}
