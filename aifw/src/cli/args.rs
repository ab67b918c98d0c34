/*
 * SPDX-FileCopyrightText: 2026 aifw contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tracing::Level;

use crate::cli::firmware;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Convert D-Link AI series firmware between recovery and factory images.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub firmware: firmware::FirmwareCli,

    /// Lowest log message severity to output.
    #[arg(long, value_name = "LEVEL", default_value_t, value_enum)]
    pub log_level: LogLevel,
}

pub fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_writer(io::stdout)
        .with_max_level(Level::from(level))
        .with_target(false)
        .without_time()
        .init();
}

pub fn main(logging_initialized: &AtomicBool) -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print().context("Failed to print usage")?;

            // --help and --version are not failures.
            if !e.use_stderr() {
                return Ok(());
            }
            bail!("Invalid command line arguments");
        }
    };

    init_logging(cli.log_level);
    logging_initialized.store(true, Ordering::SeqCst);

    firmware::firmware_main(&cli.firmware)
}
