//! Entry point for the local directory volume plugin.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match dockplug_localvol::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr().lock(), "dockplug-localvol: {error}"));
            ExitCode::FAILURE
        }
    }
}
