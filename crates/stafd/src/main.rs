//! `stafd` entrypoint.
//!
//! Configuration comes from `STAFD_*` variables, the configuration file and
//! the command line; see [`stafd::run_daemon`].

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match stafd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => match writeln!(io::stderr().lock(), "stafd: {error}") {
            Ok(()) | Err(_) => ExitCode::FAILURE,
        },
    }
}
