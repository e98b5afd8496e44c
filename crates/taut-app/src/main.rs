#![forbid(unsafe_code)]
#![deny(unreachable_pub, rustdoc::broken_intra_doc_links)]

//! `tautd` — headless BitTorrent daemon binary.
//!
//! Wires persistence, the session engine, and signal handling together;
//! everything interesting lives in the library crates.

use std::process::ExitCode;

mod bootstrap;
mod env;
mod error;

#[tokio::main]
async fn main() -> ExitCode {
    match bootstrap::run_app().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Logging may not be up if bootstrap failed early; stderr is
            // the only reliable channel for a fatal.
            eprintln!("tautd: fatal: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(err.exit_code())
        }
    }
}
