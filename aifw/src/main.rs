// SPDX-FileCopyrightText: 2026 aifw contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    process::ExitCode,
    sync::atomic::{AtomicBool, Ordering},
};

use tracing::error;

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    match aifw::cli::args::main(&LOGGING_INITIALIZED) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
                error!("{e:#}");
            } else {
                println!("{e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
